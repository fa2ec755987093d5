//! Read access to an existing OME-Zarr image group, and creation of labels
//! inside it.

use std::ops::Range;
use std::path::{Path, PathBuf};

use ndarray::{Array3, ArrayD, Ix3};
use zarrs::storage::ReadableWritableListableStorage;

use crate::layout::AxisName;
use crate::metadata::{Compression, Multiscale, OmeAttributes};
use crate::pyramid::resample_nearest;
use crate::roi::{Roi, RoiTable};
use crate::storage;
use crate::volume::{VolumeData, Voxel};
use crate::with_volume;

const LABELS_GROUP: &str = "labels";

/// Find the first pair of levels, one from each pyramid, with equal pixel sizes.
pub fn match_resolution(a: &Multiscale, b: &Multiscale) -> crate::Result<(usize, usize)> {
    for level_a in 0..a.num_levels() {
        let px_a = a.pixel_sizes_zyx(level_a)?;
        for level_b in 0..b.num_levels() {
            let px_b = b.pixel_sizes_zyx(level_b)?;
            if px_a.iter().zip(&px_b).all(|(x, y)| (x - y).abs() <= 1e-9 * x.abs().max(1.0)) {
                return Ok((level_a, level_b));
            }
        }
    }
    Err(crate::Error::invalid("no matching resolution found"))
}

fn level_path(group: &str, multiscale: &Multiscale, level: usize) -> crate::Result<String> {
    let dataset = multiscale.datasets.get(level).ok_or_else(|| {
        crate::Error::invalid(format!(
            "level {level} is not available, the image has {} levels",
            multiscale.num_levels()
        ))
    })?;
    Ok(storage::node_path(&[group, dataset.path.as_str()]))
}

/// A handle on an OME-Zarr image group on disk.
pub struct OmeZarrImage {
    url: PathBuf,
    store: ReadableWritableListableStorage,
    multiscale: Multiscale,
}

impl OmeZarrImage {
    /// Open the image group at `url`.
    pub fn open(url: &Path) -> crate::Result<Self> {
        if !url.is_dir() {
            return Err(crate::Error::InputNotFound(url.to_path_buf()));
        }
        let store = storage::open_store(url)?;
        let attrs = OmeAttributes::from_attributes(&storage::read_group_attributes(&store, "/")?)?;
        let multiscale = attrs.multiscale()?.clone();
        Ok(Self {
            url: url.to_path_buf(),
            store,
            multiscale,
        })
    }

    pub fn url(&self) -> &Path {
        &self.url
    }

    pub fn store(&self) -> &ReadableWritableListableStorage {
        &self.store
    }

    pub fn multiscale(&self) -> &Multiscale {
        &self.multiscale
    }

    pub fn num_levels(&self) -> usize {
        self.multiscale.num_levels()
    }

    pub fn level_shape(&self, level: usize) -> crate::Result<Vec<usize>> {
        let path = level_path("/", &self.multiscale, level)?;
        storage::array_shape(&self.store, &path)
    }

    pub fn pixel_sizes_zyx(&self, level: usize) -> crate::Result<[f64; 3]> {
        self.multiscale.pixel_sizes_zyx(level)
    }

    /// Read a region of `level` in its stored data type.
    pub fn read(&self, level: usize, ranges: &[Range<u64>]) -> crate::Result<VolumeData> {
        let path = level_path("/", &self.multiscale, level)?;
        storage::read_volume(&self.store, &path, ranges)
    }

    /// Read the whole of `level`.
    pub fn read_level(&self, level: usize) -> crate::Result<VolumeData> {
        let shape = self.level_shape(level)?;
        self.read(level, &storage::full_ranges(&shape))
    }

    /// Ranges over every axis of `level` covered by `roi`; non-spatial axes
    /// are taken whole.
    pub fn roi_ranges(&self, level: usize, roi: &Roi) -> crate::Result<Vec<Range<u64>>> {
        let shape = self.level_shape(level)?;
        let pixel_sizes = self.pixel_sizes_zyx(level)?;
        let spatial_shape = [AxisName::Z, AxisName::Y, AxisName::X]
            .map(|a| self.multiscale.axis_index(a).map_or(1, |i| shape[i]));
        let spatial = roi.pixel_ranges(pixel_sizes, spatial_shape)?;

        Ok(self
            .multiscale
            .axes
            .iter()
            .zip(&shape)
            .map(|(axis, &n)| {
                [AxisName::Z, AxisName::Y, AxisName::X]
                    .into_iter()
                    .find(|a| axis.name == a.as_str())
                    .and_then(AxisName::spatial_index)
                    .map_or(0..n as u64, |i| spatial[i].clone())
            })
            .collect())
    }

    pub fn read_roi(&self, level: usize, roi: &Roi) -> crate::Result<VolumeData> {
        let ranges = self.roi_ranges(level, roi)?;
        self.read(level, &ranges)
    }

    pub fn list_labels(&self) -> crate::Result<Vec<String>> {
        let group = storage::node_path(&[LABELS_GROUP]);
        if !storage::group_exists(&self.store, &group) {
            return Ok(Vec::new());
        }
        let attrs = OmeAttributes::from_attributes(&storage::read_group_attributes(
            &self.store,
            &group,
        )?)?;
        Ok(attrs.labels.unwrap_or_default())
    }

    pub fn list_tables(&self) -> crate::Result<Vec<String>> {
        RoiTable::list(&self.store)
    }

    pub fn roi_table(&self, name: &str) -> crate::Result<RoiTable> {
        RoiTable::read(&self.store, name)
    }

    pub fn write_roi_table(&self, table: &RoiTable) -> crate::Result<()> {
        table.write(&self.store)
    }

    /// Open an existing label.
    pub fn label(&self, name: &str) -> crate::Result<MultiscaleLabel> {
        if !self.list_labels()?.iter().any(|l| l == name) {
            return Err(crate::Error::invalid(format!(
                "image {} has no label {name:?}",
                self.url.display()
            )));
        }
        MultiscaleLabel::open(self.store.clone(), name)
    }

    /// Create an empty uint32 label with this image's pyramid, minus any
    /// non-spatial axes. An existing label of the same name is reused.
    pub fn create_label(&self, name: &str) -> crate::Result<MultiscaleLabel> {
        let labels_group = storage::node_path(&[LABELS_GROUP]);
        let mut labels = self.list_labels()?;
        let group = storage::node_path(&[LABELS_GROUP, name]);
        if labels.iter().any(|l| l == name) && storage::group_exists(&self.store, &group) {
            log::info!("reusing label {name}");
            return MultiscaleLabel::open(self.store.clone(), name);
        }
        if !labels.iter().any(|l| l == name) {
            labels.push(name.to_string());
        }
        storage::write_group(
            &self.store,
            &labels_group,
            OmeAttributes::labels(labels).to_attributes()?,
        )?;

        let mut multiscale = self.multiscale.spatial();
        multiscale.name = Some(name.to_string());
        let keep: Vec<bool> = self
            .multiscale
            .axes
            .iter()
            .map(|a| multiscale.axes.contains(a))
            .collect();
        let dims: Vec<&str> = multiscale.axes.iter().map(|a| a.name.as_str()).collect();

        storage::erase_node(&self.store, &group)?;
        storage::write_group(
            &self.store,
            &group,
            OmeAttributes::label(multiscale.clone()).to_attributes()?,
        )?;
        for level in 0..self.num_levels() {
            let shape: Vec<usize> = self
                .level_shape(level)?
                .into_iter()
                .zip(&keep)
                .filter_map(|(n, k)| k.then_some(n))
                .collect();
            let path = level_path(&group, &multiscale, level)?;
            storage::create_array::<u32>(
                &self.store,
                &path,
                &shape,
                &storage::plane_chunks(&shape),
                &dims,
                Compression::Raw,
            )?;
        }
        log::info!("created label {name} with {} levels", multiscale.num_levels());
        MultiscaleLabel::open(self.store.clone(), name)
    }
}

/// A label pyramid inside an image group.
pub struct MultiscaleLabel {
    store: ReadableWritableListableStorage,
    group: String,
    multiscale: Multiscale,
}

impl MultiscaleLabel {
    fn open(store: ReadableWritableListableStorage, name: &str) -> crate::Result<Self> {
        let group = storage::node_path(&[LABELS_GROUP, name]);
        let attrs = OmeAttributes::from_attributes(&storage::read_group_attributes(&store, &group)?)?;
        if attrs.image_label.is_none() {
            log::warn!("label {name} has no image-label metadata");
        }
        let multiscale = attrs.multiscale()?.clone();
        Ok(Self {
            store,
            group,
            multiscale,
        })
    }

    pub fn multiscale(&self) -> &Multiscale {
        &self.multiscale
    }

    pub fn level_shape(&self, level: usize) -> crate::Result<Vec<usize>> {
        let path = level_path(&self.group, &self.multiscale, level)?;
        storage::array_shape(&self.store, &path)
    }

    /// Read a level as uint32 ids whatever the stored integer type.
    pub fn read_level(&self, level: usize) -> crate::Result<ArrayD<u32>> {
        let path = level_path(&self.group, &self.multiscale, level)?;
        let shape = storage::array_shape(&self.store, &path)?;
        let volume = storage::read_volume(&self.store, &path, &storage::full_ranges(&shape))?;
        Ok(match volume {
            VolumeData::UInt32(a) => a,
            v => with_volume!(&v, a => a.mapv(|x| x.to_f64() as u32)),
        })
    }

    /// Write ids into `level` with their origin at `start`.
    pub fn write_region(&self, level: usize, start: &[u64], data: &ArrayD<u32>) -> crate::Result<()> {
        let path = level_path(&self.group, &self.multiscale, level)?;
        storage::write_region(&self.store, &path, start, data)
    }

    /// Rebuild every other level from `from_level` by nearest-neighbour
    /// resampling.
    pub fn consolidate(&self, from_level: usize) -> crate::Result<()> {
        let source = self.read_level(from_level)?;
        let source: Array3<u32> = source.into_dimensionality::<Ix3>().map_err(|_| {
            crate::Error::UnsupportedDimensionality(format!(
                "label {} is not (Z, Y, X)",
                self.group
            ))
        })?;
        for level in (0..self.multiscale.num_levels()).filter(|l| *l != from_level) {
            let shape = self.level_shape(level)?;
            let target = [shape[0], shape[1], shape[2]];
            let resampled = resample_nearest(source.view(), target).into_dyn();
            self.write_region(level, &[0, 0, 0], &resampled)?;
            log::debug!("consolidated level {level} of {}", self.group);
        }
        log::info!("consolidated {} from level {from_level}", self.group);
        Ok(())
    }
}
