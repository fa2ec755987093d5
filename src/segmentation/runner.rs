use std::ops::Range;
use std::path::{Path, PathBuf};

use ndarray::{Array3, ArrayD, Axis, Ix3};
use serde::{Deserialize, Serialize};

use super::{
    ModelCatalog, PredictionConfig, Predictor, SegmentationBackend, SegmentationConfig,
    standard_workflow,
};
use crate::compat::{CompatibilityReport, REQUIRED_BACKEND_VERSION, check_compatibility};
use crate::image::{MultiscaleLabel, OmeZarrImage};
use crate::roi::RoiTable;

/// Parameters of one segmentation task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationRequest {
    /// Index into the channel axis.
    pub channel: usize,
    /// Pyramid level to segment at.
    pub level: usize,
    /// Segment each region of this table separately; the whole level if unset.
    pub table_name: Option<String>,
    pub prediction: PredictionConfig,
    pub segmentation: SegmentationConfig,
    /// Defaults to `plantseg_<segmentation type>`.
    pub label_name: Option<String>,
}

impl SegmentationRequest {
    pub fn from_json_file(path: &Path) -> crate::Result<Self> {
        crate::read_json_file(path)
    }

    pub fn label_name(&self) -> String {
        self.label_name
            .clone()
            .unwrap_or_else(|| format!("plantseg_{}", self.segmentation.segmentation_type))
    }
}

/// Runs prediction and segmentation over an OME-Zarr image and writes the
/// result as a label of that image.
pub struct SegmentationRunner<P, B> {
    predictor: P,
    backend: B,
    catalog: ModelCatalog,
    compatibility: CompatibilityReport,
}

impl<P: Predictor, B: SegmentationBackend> SegmentationRunner<P, B> {
    /// Fails with [crate::Error::Incompatible] if the backend's version is not
    /// supported.
    pub fn new(predictor: P, backend: B, catalog: ModelCatalog) -> crate::Result<Self> {
        let compatibility =
            check_compatibility(REQUIRED_BACKEND_VERSION, &backend.version())?.into_result()?;
        log::debug!("segmentation backend {} accepted", compatibility.found);
        Ok(Self {
            predictor,
            backend,
            catalog,
            compatibility,
        })
    }

    pub fn compatibility(&self) -> &CompatibilityReport {
        &self.compatibility
    }

    /// Segment the image at `store_url`, loading the ROI table named in the
    /// request if there is one.
    pub fn run(&self, store_url: &Path, request: &SegmentationRequest) -> crate::Result<PathBuf> {
        let image = OmeZarrImage::open(store_url)?;
        let table = match &request.table_name {
            Some(name) => Some(image.roi_table(name)?),
            None => None,
        };
        self.run_image(&image, table.as_ref(), request)
    }

    /// Segment with an explicit table, ignoring `request.table_name`.
    pub fn run_with_table(
        &self,
        store_url: &Path,
        table: Option<&RoiTable>,
        request: &SegmentationRequest,
    ) -> crate::Result<PathBuf> {
        let image = OmeZarrImage::open(store_url)?;
        self.run_image(&image, table, request)
    }

    fn run_image(
        &self,
        image: &OmeZarrImage,
        table: Option<&RoiTable>,
        request: &SegmentationRequest,
    ) -> crate::Result<PathBuf> {
        let model = request.prediction.validate(&self.catalog)?;
        let level = request.level;
        // fails for a level the image does not have
        image.level_shape(level)?;

        let label_name = request.label_name();
        let label = image.create_label(&label_name)?;

        let segment = |data: ArrayD<f32>| -> crate::Result<Array3<u32>> {
            let volume = select_channel(data, request.channel)?;
            let labels = standard_workflow(
                &self.predictor,
                &self.backend,
                volume.view(),
                &request.prediction,
                model.as_ref(),
                &request.segmentation,
            )?;
            if labels.shape() != volume.shape() {
                return Err(crate::Error::ShapeMismatch {
                    layout: "ZYX".to_string(),
                    left: labels.shape().to_vec(),
                    right: volume.shape().to_vec().into(),
                });
            }
            Ok(labels)
        };

        match table {
            None => {
                log::info!("segmenting level {level} of {}", image.url().display());
                let labels = segment(image.read_level(level)?.to_f32())?;
                label.write_region(level, &[0, 0, 0], &labels.into_dyn())?;
            }
            Some(table) => self.run_rois(image, &label, table, level, segment)?,
        }

        label.consolidate(level)?;
        Ok(image.url().join("labels").join(&label_name))
    }

    fn run_rois(
        &self,
        image: &OmeZarrImage,
        label: &MultiscaleLabel,
        table: &RoiTable,
        level: usize,
        segment: impl Fn(ArrayD<f32>) -> crate::Result<Array3<u32>>,
    ) -> crate::Result<()> {
        log::info!("segmenting {} regions of table {}", table.len(), table.name);
        let mut stitcher = IdStitcher::default();
        let mut written: Vec<[Range<u64>; 3]> = Vec::with_capacity(table.len());

        for roi in table.iter() {
            let ranges = image.roi_ranges(level, roi)?;
            let spatial: [Range<u64>; 3] = match &ranges[ranges.len().saturating_sub(3)..] {
                [z, y, x] => [z.clone(), y.clone(), x.clone()],
                _ => {
                    return Err(crate::Error::UnsupportedDimensionality(format!(
                        "image at {} has fewer than 3 axes",
                        image.url().display()
                    )));
                }
            };
            if written.iter().any(|w| overlaps(w, &spatial)) {
                log::warn!("ROI {} overlaps an earlier region and overwrites it", roi.name);
            }

            let labels = segment(image.read(level, &ranges)?.to_f32())?;
            let labels = stitcher.offset(labels)?;
            let start = spatial.clone().map(|r| r.start);
            label.write_region(level, &start, &labels.into_dyn())?;
            log::info!("wrote ROI {} (next id {})", roi.name, stitcher.next_id());
            written.push(spatial);
        }
        Ok(())
    }
}

fn overlaps(a: &[Range<u64>; 3], b: &[Range<u64>; 3]) -> bool {
    a.iter().zip(b).all(|(a, b)| a.start < b.end && b.start < a.end)
}

/// Reduce a (C, Z, Y, X) or (1, C, Z, Y, X) volume to the (Z, Y, X) volume of
/// one channel.
pub fn select_channel<T>(data: ArrayD<T>, channel: usize) -> crate::Result<Array3<T>> {
    let shape = data.shape().to_vec();
    let data = match shape.as_slice() {
        [1, _, _, _, _] => data.index_axis_move(Axis(0), 0),
        [n, _, _, _, _] => {
            return Err(crate::Error::UnsupportedDimensionality(format!(
                "5-D input must have a leading axis of size 1, got {n}"
            )));
        }
        _ => data,
    };
    if data.ndim() != 4 {
        return Err(crate::Error::UnsupportedDimensionality(format!(
            "expected (C, Z, Y, X) input, got shape {:?}",
            data.shape()
        )));
    }
    let channels = data.shape()[0];
    if channel >= channels {
        return Err(crate::Error::OutOfBounds(format!(
            "channel {channel} of an image with {channels} channels"
        )));
    }
    data.index_axis_move(Axis(0), channel)
        .into_dimensionality::<Ix3>()
        .map_err(Into::into)
}

/// Makes label ids unique across independently segmented regions.
///
/// Ids of each region are shifted by a running offset, which then moves past
/// the largest id written so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdStitcher {
    max_seg_id: u32,
}

impl Default for IdStitcher {
    fn default() -> Self {
        Self { max_seg_id: 1 }
    }
}

impl IdStitcher {
    /// The offset the next region will receive.
    pub fn next_id(&self) -> u32 {
        self.max_seg_id
    }

    pub fn offset(&mut self, mut labels: Array3<u32>) -> crate::Result<Array3<u32>> {
        let offset = self.max_seg_id;
        let mut max = offset;
        for v in labels.iter_mut() {
            *v = v
                .checked_add(offset)
                .ok_or_else(|| crate::Error::general("label ids overflow uint32"))?;
            max = max.max(*v);
        }
        self.max_seg_id = max
            .checked_add(1)
            .ok_or_else(|| crate::Error::general("label ids overflow uint32"))?;
        Ok(labels)
    }
}
