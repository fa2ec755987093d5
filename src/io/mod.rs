//! Reading input volumes from HDF5 and TIFF files.

use std::path::{Path, PathBuf};

use crate::record::SpaceUnit;
use crate::volume::VolumeData;

pub mod h5;
pub mod tif;

pub const H5_EXTENSIONS: &[&str] = &["h5", "hdf5"];
pub const TIFF_EXTENSIONS: &[&str] = &["tiff", "tif"];

/// A volume as stored in a file, with whatever calibration the file carries.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedVolume {
    pub data: VolumeData,
    /// (Z, Y, X); `[1.0; 3]` if the file has none.
    pub voxel_size: [f64; 3],
    pub unit: SpaceUnit,
}

pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

/// Resolve `input` to the files to convert.
///
/// A file must have one of `extensions`; a directory is searched (not
/// recursively) for files that do, and must contain at least one.
pub fn discover(input: &Path, extensions: &'static [&'static str]) -> crate::Result<Vec<PathBuf>> {
    if !input.exists() {
        return Err(crate::Error::InputNotFound(input.to_path_buf()));
    }
    if !input.is_dir() {
        if has_extension(input, extensions) {
            return Ok(vec![input.to_path_buf()]);
        }
        return Err(crate::Error::invalid(format!(
            "{} does not have one of the extensions {extensions:?}",
            input.display()
        )));
    }

    let dir = glob::Pattern::escape(&input.to_string_lossy());
    let mut files = Vec::new();
    for ext in extensions {
        let pattern = format!("{dir}/*.{ext}");
        for entry in glob::glob(&pattern).map_err(crate::Error::wrap)? {
            let path = entry.map_err(crate::Error::wrap)?;
            if path.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    files.dedup();
    if files.is_empty() {
        return Err(crate::Error::NoInputFiles {
            path: input.to_path_buf(),
            extensions,
        });
    }
    log::info!("found {} files in {}", files.len(), input.display());
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            discover(&dir.path().join("missing"), TIFF_EXTENSIONS),
            Err(crate::Error::InputNotFound(_))
        ));
        assert!(matches!(
            discover(dir.path(), TIFF_EXTENSIONS),
            Err(crate::Error::NoInputFiles { .. })
        ));

        for name in ["b.tif", "a.tiff", "c.h5", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let found = discover(dir.path(), TIFF_EXTENSIONS).unwrap();
        assert_eq!(found, vec![dir.path().join("a.tiff"), dir.path().join("b.tif")]);
        assert_eq!(
            discover(&dir.path().join("c.h5"), H5_EXTENSIONS).unwrap(),
            vec![dir.path().join("c.h5")]
        );
        assert!(matches!(
            discover(&dir.path().join("notes.txt"), H5_EXTENSIONS),
            Err(crate::Error::InvalidInput(_))
        ));
    }
}
