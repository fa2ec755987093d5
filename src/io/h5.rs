//! HDF5 datasets, calibrated by an `element_size_um` attribute.
//!
//! Needs the `hdf5` feature; without it every call fails with
//! [crate::Error::NotImplemented].

use std::path::Path;

use super::LoadedVolume;
#[cfg(feature = "hdf5")]
use crate::record::SpaceUnit;
use crate::volume::VolumeData;

pub const VOXEL_SIZE_ATTR: &str = "element_size_um";

#[cfg(feature = "hdf5")]
mod imp {
    use hdf5::types::{FloatSize, H5Type, IntSize, TypeDescriptor};
    use hdf5::{Dataset, File};

    use super::*;
    use crate::volume::Voxel;

    fn read_typed<T: H5Type + Voxel>(dataset: &Dataset) -> crate::Result<VolumeData>
    where
        VolumeData: From<ndarray::ArrayD<T>>,
    {
        let data = dataset.read_raw::<T>()?;
        Ok(VolumeData::from_shape_vec(&dataset.shape(), data)?.into())
    }

    pub(super) fn read(path: &Path, key: &str) -> crate::Result<LoadedVolume> {
        let file = File::open(path)?;
        let dataset = file.dataset(key)?;
        let data = match dataset.dtype()?.to_descriptor()? {
            TypeDescriptor::Unsigned(IntSize::U1) => read_typed::<u8>(&dataset)?,
            TypeDescriptor::Unsigned(IntSize::U2) => read_typed::<u16>(&dataset)?,
            TypeDescriptor::Unsigned(IntSize::U4) => read_typed::<u32>(&dataset)?,
            TypeDescriptor::Integer(IntSize::U1 | IntSize::U2 | IntSize::U4) => {
                read_typed::<i32>(&dataset)?
            }
            TypeDescriptor::Float(FloatSize::U4) => read_typed::<f32>(&dataset)?,
            TypeDescriptor::Float(FloatSize::U8) => read_typed::<f64>(&dataset)?,
            other => {
                return Err(crate::Error::invalid(format!(
                    "unsupported HDF5 type {other:?} for {key}"
                )));
            }
        };

        let voxel_size = match dataset.attr(VOXEL_SIZE_ATTR) {
            Ok(attr) => match attr.read_raw::<f64>()?.as_slice() {
                &[z, y, x] => [z, y, x],
                other => {
                    return Err(crate::Error::invalid(format!(
                        "{VOXEL_SIZE_ATTR} of {key} has {} values, expected 3",
                        other.len()
                    )));
                }
            },
            Err(_) => {
                log::debug!("{key} in {} has no {VOXEL_SIZE_ATTR}", path.display());
                [1.0; 3]
            }
        };
        Ok(LoadedVolume {
            data,
            voxel_size,
            unit: SpaceUnit::Micrometer,
        })
    }

    fn write_typed<T: H5Type + Voxel>(
        file: &File,
        key: &str,
        data: &ndarray::ArrayD<T>,
    ) -> crate::Result<Dataset> {
        let dataset = file.new_dataset::<T>().shape(data.shape().to_vec()).create(key)?;
        let samples: Vec<T> = data.iter().copied().collect();
        dataset.write_raw(samples.as_slice())?;
        Ok(dataset)
    }

    pub(super) fn write(
        path: &Path,
        key: &str,
        data: &VolumeData,
        voxel_size: [f64; 3],
    ) -> crate::Result<()> {
        let file = if path.exists() {
            File::append(path)?
        } else {
            File::create(path)?
        };
        let dataset = crate::with_volume!(data, a => write_typed(&file, key, a)?);
        dataset
            .new_attr::<f64>()
            .shape(3)
            .create(VOXEL_SIZE_ATTR)?
            .write_raw(voxel_size.as_slice())?;
        Ok(())
    }
}

/// Read dataset `key` of the HDF5 file at `path`.
pub fn read_h5(path: &Path, key: &str) -> crate::Result<LoadedVolume> {
    if !path.is_file() {
        return Err(crate::Error::InputNotFound(path.to_path_buf()));
    }
    #[cfg(feature = "hdf5")]
    {
        imp::read(path, key)
    }
    #[cfg(not(feature = "hdf5"))]
    {
        Err(crate::Error::NotImplemented(format!(
            "reading {key} from {}: built without HDF5 support",
            path.display()
        )))
    }
}

/// Add dataset `key` to the HDF5 file at `path`, creating the file if needed.
pub fn write_h5(path: &Path, key: &str, data: &VolumeData, voxel_size: [f64; 3]) -> crate::Result<()> {
    #[cfg(feature = "hdf5")]
    {
        imp::write(path, key, data, voxel_size)
    }
    #[cfg(not(feature = "hdf5"))]
    {
        let _ = (data, voxel_size);
        Err(crate::Error::NotImplemented(format!(
            "writing {key} to {}: built without HDF5 support",
            path.display()
        )))
    }
}
