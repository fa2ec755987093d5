//! Writing image records as OME-Zarr multiscale pyramids.

use std::path::{Path, PathBuf};

use ndarray::{ArrayD, Axis as NdAxis};
use serde::{Deserialize, Serialize};
use zarrs::storage::ReadableWritableListableStorage;

use crate::layout::{AxisLayout, AxisName};
use crate::metadata::{Axis, Compression, OmeAttributes, Omero, PyramidConfig, build_multiscale};
use crate::pyramid::{Aggregation, coarsen};
use crate::record::ImageRecord;
use crate::storage::{self, Attributes};
use crate::volume::{VolumeData, Voxel};
use crate::{map_volume, with_volume};

/// Writes [ImageRecord]s, and their labels, into a filesystem store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OmeZarrWriter {
    /// Reduction used when building image pyramid levels.
    /// Labels are always downsampled by nearest neighbour.
    pub aggregation: Aggregation,
    pub compression: Compression,
}

impl OmeZarrWriter {
    pub fn new(aggregation: Aggregation, compression: Compression) -> Self {
        Self {
            aggregation,
            compression,
        }
    }

    /// Write `image` to the group `path` of the store at `store_root`.
    ///
    /// Anything already at `path` is deleted first.
    /// Returns the location of the image group.
    pub fn create(
        &self,
        store_root: &Path,
        path: &str,
        name: Option<&str>,
        image: &ImageRecord,
        config: &PyramidConfig,
    ) -> crate::Result<PathBuf> {
        config.validate()?;

        let axes_kept = kept_axes(&AxisLayout::image(), image.source_layout(), config);
        let store = storage::open_store(store_root)?;
        if !storage::group_exists(&store, "/") {
            storage::write_group(&store, "/", Attributes::new())?;
        }
        let group = storage::node_path(&[path]);
        storage::erase_node(&store, &group)?;

        let full_scale = image.scale();
        let (axes, scale) = axes_and_scale(&AxisLayout::image(), &axes_kept, &full_scale, image);
        let multiscale = build_multiscale(name, axes, &scale, config)?;
        let omero = image.channel_names().map(Omero::from_names);
        storage::write_group(
            &store,
            &group,
            OmeAttributes::image(multiscale.clone(), omero).to_attributes()?,
        )?;

        let data = squeeze(image.data().clone(), &AxisLayout::image(), &axes_kept);
        let dims: Vec<&str> = axes_kept.iter().map(|a| a.as_str()).collect();
        with_volume!(&data, a => self.write_levels(
            &store,
            &group,
            a,
            &dims,
            multiscale.num_levels(),
            config.xy_shrink(),
            self.aggregation,
        ))?;
        log::info!(
            "wrote image {} with {} levels to {}",
            image.key(),
            multiscale.num_levels(),
            store_root.join(path).display()
        );

        if let Some(label) = image.label() {
            let label_axes = kept_axes(&AxisLayout::label(), label.source_layout(), config);
            let labels_group = storage::node_path(&[group.as_str(), "labels"]);
            let label_group = storage::node_path(&[labels_group.as_str(), label.key()]);
            storage::write_group(
                &store,
                &labels_group,
                OmeAttributes::labels(vec![label.key().to_string()]).to_attributes()?,
            )?;

            let (axes, scale) =
                axes_and_scale(&AxisLayout::label(), &label_axes, &label.scale(), image);
            let label_multiscale = build_multiscale(Some(label.key()), axes, &scale, config)?;
            storage::write_group(
                &store,
                &label_group,
                OmeAttributes::label(label_multiscale.clone()).to_attributes()?,
            )?;

            let data = squeeze(label.data().clone(), &AxisLayout::label(), &label_axes);
            let dims: Vec<&str> = label_axes.iter().map(|a| a.as_str()).collect();
            with_volume!(&data, a => self.write_levels(
                &store,
                &label_group,
                a,
                &dims,
                label_multiscale.num_levels(),
                config.xy_shrink(),
                Aggregation::Nearest,
            ))?;
            log::info!("wrote label {}", label.key());
        }

        Ok(store_root.join(path))
    }

    #[allow(clippy::too_many_arguments)]
    fn write_levels<T: Voxel>(
        &self,
        store: &ReadableWritableListableStorage,
        group: &str,
        base: &ArrayD<T>,
        dims: &[&str],
        levels: usize,
        shrink: usize,
        aggregation: Aggregation,
    ) -> crate::Result<()> {
        let mut current = base.clone();
        for level in 0..levels {
            if level > 0 {
                current = coarsen(&current, shrink, aggregation)?;
            }
            let path = storage::node_path(&[group, &level.to_string()]);
            log::debug!("level {level} shape {:?}", current.shape());
            storage::write_array(store, &path, &current, dims, self.compression)?;
        }
        Ok(())
    }
}

/// Axes of `canonical` that are written: all of them, or only those present
/// in the source layout when singleton axes are not requested.
fn kept_axes(
    canonical: &AxisLayout,
    source: &AxisLayout,
    config: &PyramidConfig,
) -> Vec<AxisName> {
    canonical
        .axes()
        .iter()
        .copied()
        .filter(|a| config.create_all_axes || source.contains(*a))
        .collect()
}

fn axes_and_scale(
    canonical: &AxisLayout,
    kept: &[AxisName],
    scale: &[f64],
    image: &ImageRecord,
) -> (Vec<Axis>, Vec<f64>) {
    canonical
        .axes()
        .iter()
        .zip(scale)
        .filter(|(a, _)| kept.contains(a))
        .map(|(a, s)| (Axis::new(*a, image.unit()), *s))
        .unzip()
}

/// Drop the singleton axes of `canonical` that are not in `kept`.
fn squeeze(data: VolumeData, canonical: &AxisLayout, kept: &[AxisName]) -> VolumeData {
    let drop: Vec<usize> = canonical
        .axes()
        .iter()
        .enumerate()
        .filter(|(_, a)| !kept.contains(a))
        .map(|(i, _)| i)
        .rev()
        .collect();
    map_volume!(data, a => {
        let mut a = a;
        for &i in &drop {
            a = a.index_axis_move(NdAxis(i), 0);
        }
        a
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::OmeZarrImage;
    use crate::record::{LabelRecord, SpaceUnit};
    use ndarray::IxDyn;

    fn record(shape: &[usize], layout: &str) -> ImageRecord {
        ImageRecord::new(
            "raw",
            ArrayD::<u8>::from_elem(IxDyn(shape), 5).into(),
            &layout.parse().unwrap(),
            [0.5, 0.25, 0.25],
            SpaceUnit::Micrometer,
        )
        .unwrap()
    }

    #[test]
    fn pyramid_shapes_and_scales() {
        let dir = tempfile::tempdir().unwrap();
        let url = OmeZarrWriter::default()
            .create(
                dir.path(),
                "raw",
                Some("raw"),
                &record(&[3, 16, 20], "ZYX"),
                &PyramidConfig::default(),
            )
            .unwrap();
        assert_eq!(url, dir.path().join("raw"));

        let image = OmeZarrImage::open(&url).unwrap();
        assert_eq!(image.num_levels(), 4);
        assert_eq!(image.level_shape(0).unwrap(), vec![1, 3, 16, 20]);
        assert_eq!(image.level_shape(2).unwrap(), vec![1, 3, 4, 5]);
        let ms = image.multiscale();
        assert_eq!(ms.scale(0).unwrap(), &[1.0, 0.5, 0.25, 0.25]);
        assert_eq!(ms.scale(1).unwrap(), &[1.0, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn squeezed_axes() {
        let dir = tempfile::tempdir().unwrap();
        let config = PyramidConfig {
            number_of_levels: 2,
            create_all_axes: false,
            ..Default::default()
        };
        let url = OmeZarrWriter::default()
            .create(dir.path(), "img", None, &record(&[8, 8], "YX"), &config)
            .unwrap();
        let image = OmeZarrImage::open(&url).unwrap();
        assert_eq!(image.multiscale().axis_names(), ["y", "x"]);
        assert_eq!(image.level_shape(1).unwrap(), vec![4, 4]);
    }

    #[test]
    fn label_written_beside_image() {
        let dir = tempfile::tempdir().unwrap();
        let label = LabelRecord::new(
            "label",
            ArrayD::<u32>::from_elem(IxDyn(&[3, 8, 8]), 2).into(),
            &"ZYX".parse().unwrap(),
            [0.5, 0.25, 0.25],
            SpaceUnit::Micrometer,
        )
        .unwrap();
        let rec = record(&[3, 8, 8], "ZYX").with_label(label).unwrap();
        let url = OmeZarrWriter::new(Aggregation::Max, Compression::Gzip { level: -1 })
            .create(dir.path(), "raw", None, &rec, &PyramidConfig::default())
            .unwrap();

        let image = OmeZarrImage::open(&url).unwrap();
        assert_eq!(image.list_labels().unwrap(), vec!["label".to_string()]);
        let label = image.label("label").unwrap();
        assert_eq!(label.multiscale().num_levels(), 4);
        assert_eq!(label.multiscale().axis_names(), ["z", "y", "x"]);
        let level1 = label.read_level(1).unwrap();
        assert_eq!(level1.shape(), &[3, 4, 4]);
        assert!(level1.iter().all(|v| *v == 2));
    }

    #[test]
    fn overwrite_on_create() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OmeZarrWriter::default();
        let config = PyramidConfig::default();
        writer
            .create(dir.path(), "raw", None, &record(&[2, 8, 8], "ZYX"), &config)
            .unwrap();
        let url = writer
            .create(dir.path(), "raw", None, &record(&[1, 4, 4], "ZYX"), &config)
            .unwrap();
        let image = OmeZarrImage::open(&url).unwrap();
        assert_eq!(image.level_shape(0).unwrap(), vec![1, 1, 4, 4]);
    }
}
