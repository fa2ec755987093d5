//! Thin helpers over a filesystem-backed zarr hierarchy.

use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use ndarray::{ArrayD, IxDyn};
use zarrs::array::{Array, ArrayBuilder, ArraySubset};
use zarrs::filesystem::FilesystemStore;
use zarrs::group::{Group, GroupBuilder};
use zarrs::storage::{ReadableWritableListableStorage, StorePrefix, WritableStorageTraits};

use crate::metadata::Compression;
use crate::volume::{VolumeData, Voxel};

pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// Open (creating if necessary) a filesystem store rooted at `path`.
pub fn open_store(path: &Path) -> crate::Result<ReadableWritableListableStorage> {
    std::fs::create_dir_all(path)?;
    let store = FilesystemStore::new(path).map_err(crate::Error::wrap)?;
    Ok(Arc::new(store))
}

/// Join node names into an absolute node path.
pub fn node_path<S: AsRef<str>>(parts: &[S]) -> String {
    let mut out = String::new();
    for p in parts {
        let p = p.as_ref().trim_matches('/');
        if !p.is_empty() {
            out.push('/');
            out.push_str(p);
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Delete everything below `path`, including the node itself.
pub fn erase_node(store: &ReadableWritableListableStorage, path: &str) -> crate::Result<()> {
    let trimmed = path.trim_matches('/');
    let prefix = if trimmed.is_empty() {
        StorePrefix::root()
    } else {
        StorePrefix::new(format!("{trimmed}/")).map_err(crate::Error::wrap)?
    };
    store.erase_prefix(&prefix)?;
    Ok(())
}

/// Write group metadata at `path`, replacing existing attributes.
pub fn write_group(
    store: &ReadableWritableListableStorage,
    path: &str,
    attributes: Attributes,
) -> crate::Result<()> {
    GroupBuilder::new()
        .attributes(attributes)
        .build(store.clone(), path)?
        .store_metadata()?;
    Ok(())
}

pub fn group_exists(store: &ReadableWritableListableStorage, path: &str) -> bool {
    Group::open(store.clone(), path).is_ok()
}

pub fn read_group_attributes(
    store: &ReadableWritableListableStorage,
    path: &str,
) -> crate::Result<Attributes> {
    let group = Group::open(store.clone(), path)?;
    Ok(group.attributes().clone())
}

/// Create an array with the given chunking and write its metadata.
pub fn create_array<T: Voxel>(
    store: &ReadableWritableListableStorage,
    path: &str,
    shape: &[usize],
    chunk_shape: &[usize],
    dimension_names: &[&str],
    compression: Compression,
) -> crate::Result<()> {
    let shape: Vec<u64> = shape.iter().map(|&n| n as u64).collect();
    let chunk_shape: Vec<u64> = chunk_shape.iter().map(|&n| n.max(1) as u64).collect();
    let mut builder = ArrayBuilder::new(shape, chunk_shape, T::data_type(), T::fill_value());
    if let Some(codec) = compression.to_bytes_to_bytes_codec()? {
        builder.bytes_to_bytes_codecs(vec![codec]);
    }
    builder.dimension_names(Some(dimension_names.to_vec()));
    let array = builder.build(store.clone(), path)?;
    array.store_metadata()?;
    log::debug!("created {} array {path} of shape {:?}", T::NAME, array.shape());
    Ok(())
}

/// Create an array chunked as `(1, .., 1, Y, X)` and fill it with `data`.
pub fn write_array<T: Voxel>(
    store: &ReadableWritableListableStorage,
    path: &str,
    data: &ArrayD<T>,
    dimension_names: &[&str],
    compression: Compression,
) -> crate::Result<()> {
    let shape = data.shape();
    let chunk_shape = plane_chunks(shape);
    create_array::<T>(store, path, shape, &chunk_shape, dimension_names, compression)?;
    write_region(store, path, &vec![0; shape.len()], data)
}

/// One chunk per (Y, X) plane.
pub fn plane_chunks(shape: &[usize]) -> Vec<usize> {
    let n = shape.len();
    shape
        .iter()
        .enumerate()
        .map(|(i, &d)| if i + 2 >= n { d } else { 1 })
        .collect()
}

fn subset(start: &[u64], shape: &[usize]) -> ArraySubset {
    let ranges: Vec<Range<u64>> = start
        .iter()
        .zip(shape)
        .map(|(&s, &n)| s..s + n as u64)
        .collect();
    ArraySubset::new_with_ranges(&ranges)
}

/// Write `data` into the existing array at `path` with its origin at `start`.
pub fn write_region<T: Voxel>(
    store: &ReadableWritableListableStorage,
    path: &str,
    start: &[u64],
    data: &ArrayD<T>,
) -> crate::Result<()> {
    let array = Array::open(store.clone(), path)?;
    if start.len() != array.dimensionality() || data.ndim() != start.len() {
        return Err(crate::Error::invalid(format!(
            "cannot write {}-d data at {start:?} into {}-d array {path}",
            data.ndim(),
            array.dimensionality()
        )));
    }
    let elements: Vec<T> = data.iter().copied().collect();
    array.store_array_subset(&subset(start, data.shape()), &elements)?;
    Ok(())
}

/// Shape of the array at `path`.
pub fn array_shape(store: &ReadableWritableListableStorage, path: &str) -> crate::Result<Vec<usize>> {
    let array = Array::open(store.clone(), path)?;
    Ok(array.shape().iter().map(|&n| n as usize).collect())
}

/// Zarr V3 data type name of the array at `path`.
pub fn array_dtype(store: &ReadableWritableListableStorage, path: &str) -> crate::Result<String> {
    let array = Array::open(store.clone(), path)?;
    array
        .data_type()
        .name_v3()
        .map(|n| n.into_owned())
        .ok_or_else(|| crate::Error::general(format!("array {path} has no V3 data type name")))
}

/// Read `ranges` of the array at `path` as elements of type `T`.
///
/// `T` must match the stored data type.
pub fn read_region<T: Voxel>(
    store: &ReadableWritableListableStorage,
    path: &str,
    ranges: &[Range<u64>],
) -> crate::Result<ArrayD<T>> {
    let array = Array::open(store.clone(), path)?;
    let subset = ArraySubset::new_with_ranges(ranges);
    let elements = array.retrieve_array_subset::<Vec<T>>(&subset)?;
    let shape: Vec<usize> = ranges.iter().map(|r| (r.end - r.start) as usize).collect();
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), elements)?)
}

/// Read `ranges` of the array at `path` in its stored data type.
pub fn read_volume(
    store: &ReadableWritableListableStorage,
    path: &str,
    ranges: &[Range<u64>],
) -> crate::Result<VolumeData> {
    let dtype = array_dtype(store, path)?;
    let volume = match dtype.as_str() {
        "uint8" => read_region::<u8>(store, path, ranges)?.into(),
        "uint16" => read_region::<u16>(store, path, ranges)?.into(),
        "uint32" => read_region::<u32>(store, path, ranges)?.into(),
        "int32" => read_region::<i32>(store, path, ranges)?.into(),
        "float32" => read_region::<f32>(store, path, ranges)?.into(),
        "float64" => read_region::<f64>(store, path, ranges)?.into(),
        s => {
            return Err(crate::Error::invalid(format!(
                "unsupported data type {s} in {path}"
            )));
        }
    };
    Ok(volume)
}

/// Ranges covering the whole of `shape`.
pub fn full_ranges(shape: &[usize]) -> Vec<Range<u64>> {
    shape.iter().map(|&n| 0..n as u64).collect()
}
