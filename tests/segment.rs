use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use ndarray::{Array3, ArrayD, ArrayView3, IxDyn};
use ngff_seg::image::OmeZarrImage;
use ngff_seg::metadata::PyramidConfig;
use ngff_seg::record::{ImageRecord, SpaceUnit};
use ngff_seg::roi::{Roi, RoiTable};
use ngff_seg::segmentation::{
    AgglomerationInput, Device, ModelCatalog, PredictionConfig, Predictor, ResolvedModel,
    SegmentationBackend, SegmentationConfig, SegmentationRequest, SegmentationRunner,
    SegmentationType,
};
use ngff_seg::writer::OmeZarrWriter;
use ngff_seg::{Error, Result};

fn init() {
    env_logger::try_init().ok();
}

/// Labels every voxel by its x coordinate modulo 3, so each region holds ids
/// 0, 1 and 2.
struct StripeBackend;

impl SegmentationBackend for StripeBackend {
    fn version(&self) -> String {
        "1.8.1".to_string()
    }

    fn dt_watershed(&self, pmaps: ArrayView3<f32>, _threshold: f64) -> Result<Array3<u32>> {
        Ok(Array3::from_shape_fn(pmaps.dim(), |(_, _, x)| (x % 3) as u32))
    }

    fn gasp(&self, input: &AgglomerationInput<'_>) -> Result<Array3<u32>> {
        Ok(input.superpixels.to_owned())
    }

    fn mutex_ws(&self, input: &AgglomerationInput<'_>) -> Result<Array3<u32>> {
        Ok(input.superpixels.to_owned())
    }

    fn multicut(&self, input: &AgglomerationInput<'_>) -> Result<Array3<u32>> {
        Ok(input.superpixels.to_owned())
    }
}

struct NoPredictor;

impl Predictor for NoPredictor {
    fn predict(
        &self,
        _volume: ArrayView3<f32>,
        _model: &ResolvedModel,
        _device: Device,
        _patch: [usize; 3],
    ) -> Result<Array3<f32>> {
        Err(Error::general("prediction should have been skipped"))
    }
}

fn write_image(root: &Path) -> PathBuf {
    let data = ArrayD::from_shape_fn(IxDyn(&[2, 12, 12]), |d| (d[1] * 12 + d[2]) as u8);
    let record = ImageRecord::new(
        "raw",
        data.into(),
        &"ZYX".parse().unwrap(),
        [1.0, 0.5, 0.5],
        SpaceUnit::Micrometer,
    )
    .expect("image record");
    let config = PyramidConfig {
        number_of_levels: 2,
        ..Default::default()
    };
    OmeZarrWriter::default()
        .create(root, "raw", Some("raw"), &record, &config)
        .expect("write image")
}

fn skip_request() -> SegmentationRequest {
    SegmentationRequest {
        prediction: PredictionConfig {
            skip: true,
            ..Default::default()
        },
        segmentation: SegmentationConfig {
            segmentation_type: SegmentationType::DtWatershed,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn runner() -> SegmentationRunner<NoPredictor, StripeBackend> {
    SegmentationRunner::new(NoPredictor, StripeBackend, ModelCatalog::default())
        .expect("compatible backend")
}

#[test]
fn test_roi_ids_are_unique() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let url = write_image(dir.path());
    let image = OmeZarrImage::open(&url).unwrap();

    // three 4-pixel wide strips over the top half, in micrometers
    let rois: Vec<Roi> = (0..3)
        .map(|i| Roi::new(format!("FOV_{i}"), [0.0, 0.0, 2.0 * i as f64], [2.0, 3.0, 2.0]))
        .collect();
    image
        .write_roi_table(&RoiTable::new("FOV_ROI_table", rois))
        .unwrap();

    let request = SegmentationRequest {
        table_name: Some("FOV_ROI_table".into()),
        ..skip_request()
    };
    let label_url = runner().run(&url, &request).expect("segment");
    assert_eq!(label_url, url.join("labels").join("plantseg_dt_watershed"));

    let labels = image.label("plantseg_dt_watershed").unwrap().read_level(0).unwrap();
    assert_eq!(labels.shape(), &[2, 12, 12]);

    let mut previous_max = 0;
    for i in 0..3 {
        let ids: BTreeSet<u32> = labels
            .indexed_iter()
            .filter(|(d, _)| d[1] < 6 && d[2] / 4 == i)
            .map(|(_, v)| *v)
            .collect();
        assert_eq!(ids.len(), 3);
        let (first, last) = (*ids.first().unwrap(), *ids.last().unwrap());
        assert!(first > previous_max);
        previous_max = last;
    }

    let all: BTreeSet<u32> = labels.iter().copied().filter(|v| *v != 0).collect();
    assert_eq!(all.len(), 9);
    // nothing outside the regions
    assert!(labels.indexed_iter().all(|(d, v)| d[1] < 6 || *v == 0));

    // the coarser level is rebuilt from level 0
    let coarse = image.label("plantseg_dt_watershed").unwrap().read_level(1).unwrap();
    assert_eq!(coarse.shape(), &[2, 6, 6]);
    assert_eq!(coarse[[0, 0, 0]], labels[[0, 0, 0]]);
}

#[test]
fn test_overlapping_rois_last_writer_wins() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let url = write_image(dir.path());
    let image = OmeZarrImage::open(&url).unwrap();

    // pixels x in 0..8, then x in 2..8 on top of it
    let rois = vec![
        Roi::new("first", [0.0, 0.0, 0.0], [2.0, 3.0, 4.0]),
        Roi::new("second", [0.0, 0.0, 1.0], [2.0, 3.0, 3.0]),
    ];
    image
        .write_roi_table(&RoiTable::new("overlap", rois))
        .unwrap();

    let request = SegmentationRequest {
        table_name: Some("overlap".into()),
        label_name: Some("overlap".into()),
        ..skip_request()
    };
    runner().run(&url, &request).expect("segment");

    let labels = image.label("overlap").unwrap().read_level(0).unwrap();
    for z in 0..2 {
        for y in 0..6 {
            let row: Vec<u32> = (0..12).map(|x| labels[[z, y, x]]).collect();
            // the first region keeps only x < 2; the second holds ids 4, 5, 6
            assert_eq!(row, [1, 2, 4, 5, 6, 4, 5, 6, 0, 0, 0, 0]);
        }
    }
}

#[test]
fn test_whole_image_without_table() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let url = write_image(dir.path());
    let request = SegmentationRequest {
        label_name: Some("cells".into()),
        ..skip_request()
    };
    runner().run(&url, &request).expect("segment");

    let image = OmeZarrImage::open(&url).unwrap();
    let labels = image.label("cells").unwrap().read_level(0).unwrap();
    assert!(labels.indexed_iter().all(|(d, v)| *v == (d[2] % 3) as u32));
}

#[test]
fn test_prediction_needs_known_model() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let url = write_image(dir.path());
    let request = SegmentationRequest {
        prediction: PredictionConfig::default(),
        ..skip_request()
    };
    assert!(matches!(
        runner().run(&url, &request),
        Err(Error::InvalidInput(_))
    ));
}

#[test]
fn test_request_from_json() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("request.json");
    std::fs::write(
        &path,
        r#"{"channel": 0, "level": 1, "table_name": "FOV_ROI_table",
            "prediction": {"skip": true},
            "segmentation": {"segmentation_type": "mutex_ws", "beta": 0.4}}"#,
    )
    .unwrap();
    let request = SegmentationRequest::from_json_file(&path).unwrap();
    assert_eq!(request.level, 1);
    assert_eq!(request.segmentation.beta, 0.4);
    assert_eq!(request.label_name(), "plantseg_mutex_ws");
    assert!(matches!(
        SegmentationRequest::from_json_file(&dir.path().join("missing.json")),
        Err(Error::InputNotFound(_))
    ));
}
