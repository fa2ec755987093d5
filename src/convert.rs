//! Conversion of HDF5 and TIFF files into OME-Zarr images.
//!
//! Each input file becomes a store `<zarr_dir>/<file stem>.zarr` holding one
//! image group, with its label if one was given.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::io::{self, H5_EXTENSIONS, LoadedVolume, TIFF_EXTENSIONS};
use crate::layout::AxisLayout;
use crate::metadata::PyramidConfig;
use crate::record::{CustomAxis, ImageRecord, LabelRecord};
use crate::writer::OmeZarrWriter;

fn default_layout() -> AxisLayout {
    AxisLayout::label()
}

fn default_image_key() -> String {
    "raw".to_string()
}

fn default_label_key() -> String {
    "label".to_string()
}

/// Parameters for converting HDF5 files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct H5ConvertParams {
    /// A file, or a directory of files, to convert.
    pub input_path: PathBuf,
    pub zarr_dir: PathBuf,
    #[serde(default = "default_image_key")]
    pub image_key: String,
    /// Dataset holding a label volume, in the same file.
    #[serde(default)]
    pub label_key: Option<String>,
    #[serde(default = "default_layout")]
    pub layout: AxisLayout,
    /// Group names in the output; the dataset keys if unset.
    #[serde(default)]
    pub new_image_key: Option<String>,
    #[serde(default)]
    pub new_label_key: Option<String>,
    #[serde(default)]
    pub custom_axis: CustomAxis,
    #[serde(default)]
    pub pyramid: PyramidConfig,
    #[serde(default)]
    pub writer: OmeZarrWriter,
}

impl H5ConvertParams {
    pub fn new(input_path: impl Into<PathBuf>, zarr_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            zarr_dir: zarr_dir.into(),
            image_key: default_image_key(),
            label_key: None,
            layout: default_layout(),
            new_image_key: None,
            new_label_key: None,
            custom_axis: CustomAxis::default(),
            pyramid: PyramidConfig::default(),
            writer: OmeZarrWriter::default(),
        }
    }

    pub fn from_json_file(path: &Path) -> crate::Result<Self> {
        crate::read_json_file(path)
    }
}

/// Parameters for converting TIFF files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TiffConvertParams {
    /// A file, or a directory of files, to convert.
    pub image_path: PathBuf,
    pub zarr_dir: PathBuf,
    /// A label file matching `image_path`; only allowed for a single file.
    #[serde(default)]
    pub label_path: Option<PathBuf>,
    #[serde(default = "default_layout")]
    pub layout: AxisLayout,
    #[serde(default = "default_image_key")]
    pub new_image_key: String,
    #[serde(default = "default_label_key")]
    pub new_label_key: String,
    #[serde(default)]
    pub custom_axis: CustomAxis,
    #[serde(default)]
    pub pyramid: PyramidConfig,
    #[serde(default)]
    pub writer: OmeZarrWriter,
}

impl TiffConvertParams {
    pub fn new(image_path: impl Into<PathBuf>, zarr_dir: impl Into<PathBuf>) -> Self {
        Self {
            image_path: image_path.into(),
            zarr_dir: zarr_dir.into(),
            label_path: None,
            layout: default_layout(),
            new_image_key: default_image_key(),
            new_label_key: default_label_key(),
            custom_axis: CustomAxis::default(),
            pyramid: PyramidConfig::default(),
            writer: OmeZarrWriter::default(),
        }
    }

    pub fn from_json_file(path: &Path) -> crate::Result<Self> {
        crate::read_json_file(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageTypes {
    #[serde(rename = "is_3D")]
    pub is_3d: bool,
}

/// One image written by a conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertedImage {
    pub zarr_url: PathBuf,
    pub types: ImageTypes,
}

struct Target<'a> {
    zarr_dir: &'a Path,
    layout: &'a AxisLayout,
    custom_axis: &'a CustomAxis,
    pyramid: &'a PyramidConfig,
    writer: &'a OmeZarrWriter,
}

impl Target<'_> {
    fn write(
        &self,
        source: &Path,
        image_key: &str,
        image: LoadedVolume,
        label: Option<(&str, LoadedVolume)>,
    ) -> crate::Result<ConvertedImage> {
        let mut record = ImageRecord::new(
            image_key,
            image.data,
            self.layout,
            image.voxel_size,
            image.unit,
        )?;
        if let Some((label_key, label)) = label {
            let label = LabelRecord::new(
                label_key,
                label.data,
                self.layout,
                image.voxel_size,
                image.unit,
            )?;
            record = record.with_label(label)?;
        }
        let record = record.with_override(self.custom_axis)?;

        let stem = source
            .file_stem()
            .ok_or_else(|| crate::Error::invalid(format!("{} has no file name", source.display())))?;
        let mut store_name = stem.to_os_string();
        store_name.push(".zarr");
        let store_root = self.zarr_dir.join(store_name);

        let zarr_url = self
            .writer
            .create(&store_root, image_key, Some(image_key), &record, self.pyramid)?;
        log::info!("converted {} to {}", source.display(), zarr_url.display());
        Ok(ConvertedImage {
            zarr_url,
            types: ImageTypes {
                is_3d: self.layout.is_3d(),
            },
        })
    }
}

/// Convert one HDF5 file, or every HDF5 file in a directory.
pub fn convert_h5(params: &H5ConvertParams) -> crate::Result<Vec<ConvertedImage>> {
    params.pyramid.validate()?;
    let files = io::discover(&params.input_path, H5_EXTENSIONS)?;
    let target = Target {
        zarr_dir: &params.zarr_dir,
        layout: &params.layout,
        custom_axis: &params.custom_axis,
        pyramid: &params.pyramid,
        writer: &params.writer,
    };
    let image_key = params.new_image_key.as_deref().unwrap_or(&params.image_key);

    let mut out = Vec::with_capacity(files.len());
    for file in &files {
        let image = io::h5::read_h5(file, &params.image_key)?;
        let label = match &params.label_key {
            Some(key) => {
                let label_key = params.new_label_key.as_deref().unwrap_or(key);
                Some((label_key, io::h5::read_h5(file, key)?))
            }
            None => None,
        };
        out.push(target.write(file, image_key, image, label)?);
    }
    Ok(out)
}

/// Convert one TIFF file (with an optional label file), or every TIFF file in
/// a directory.
pub fn convert_tiff(params: &TiffConvertParams) -> crate::Result<Vec<ConvertedImage>> {
    params.pyramid.validate()?;
    if !params.image_path.exists() {
        return Err(crate::Error::InputNotFound(params.image_path.clone()));
    }
    if let Some(label_path) = &params.label_path {
        if !label_path.exists() {
            return Err(crate::Error::InputNotFound(label_path.clone()));
        }
        if params.image_path.is_dir() {
            return Err(crate::Error::NotImplemented(
                "a label file cannot be paired with a directory of images".to_string(),
            ));
        }
    }
    let files = io::discover(&params.image_path, TIFF_EXTENSIONS)?;
    let target = Target {
        zarr_dir: &params.zarr_dir,
        layout: &params.layout,
        custom_axis: &params.custom_axis,
        pyramid: &params.pyramid,
        writer: &params.writer,
    };

    let mut out = Vec::with_capacity(files.len());
    for file in &files {
        let image = io::tif::read_tiff(file)?;
        let label = match &params.label_path {
            Some(path) => Some((params.new_label_key.as_str(), io::tif::read_tiff(path)?)),
            None => None,
        };
        out.push(target.write(file, &params.new_image_key, image, label)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_from_json() {
        let params: TiffConvertParams = serde_json::from_str(
            r#"{
                "image_path": "/data/stack.tif",
                "zarr_dir": "/out",
                "layout": "CZYX",
                "custom_axis": {"axis": [{"axis_name": "z", "scale": 2.0}]},
                "pyramid": {"number_of_levels": 2}
            }"#,
        )
        .unwrap();
        assert_eq!(params.new_image_key, "raw");
        assert_eq!(params.new_label_key, "label");
        assert_eq!(params.layout.to_string(), "CZYX");
        assert_eq!(params.pyramid.number_of_levels, 2);
        assert_eq!(params.pyramid.scaling_factor_xy, 2.0);

        let h5: H5ConvertParams =
            serde_json::from_str(r#"{"input_path": "a.h5", "zarr_dir": "out"}"#).unwrap();
        assert_eq!(h5, H5ConvertParams::new("a.h5", "out"));
        assert!(serde_json::from_str::<H5ConvertParams>(r#"{"input_path": "a.h5", "zarr_dir": "out", "layout": "QYX"}"#).is_err());
    }

    #[test]
    fn result_record() {
        let converted = ConvertedImage {
            zarr_url: PathBuf::from("/out/a.zarr/raw"),
            types: ImageTypes { is_3d: false },
        };
        let value = serde_json::to_value(&converted).unwrap();
        assert_eq!(value["types"]["is_3D"], false);
        assert_eq!(value["zarr_url"], "/out/a.zarr/raw");
    }

    #[test]
    fn missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let params = TiffConvertParams::new(dir.path().join("nope.tif"), dir.path());
        assert!(matches!(
            convert_tiff(&params),
            Err(crate::Error::InputNotFound(_))
        ));
        let params = H5ConvertParams::new(dir.path().join("nope.h5"), dir.path());
        assert!(matches!(
            convert_h5(&params),
            Err(crate::Error::InputNotFound(_))
        ));
    }
}
