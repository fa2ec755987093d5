#![cfg(feature = "hdf5")]

use ndarray::{ArrayD, IxDyn};
use ngff_seg::convert::{H5ConvertParams, convert_h5};
use ngff_seg::image::OmeZarrImage;
use ngff_seg::io::h5::write_h5;
use ngff_seg::metadata::PyramidConfig;

fn init() {
    env_logger::try_init().ok();
}

#[test]
fn test_h5_with_label() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("sample.h5");
    let raw = ArrayD::from_shape_fn(IxDyn(&[3, 16, 16]), |d| (d[0] + d[1] + d[2]) as f32);
    let label = ArrayD::from_shape_fn(IxDyn(&[3, 16, 16]), |d| (d[2] / 8) as u16);
    write_h5(&input, "raw", &raw.into(), [1.0, 0.25, 0.25]).expect("write raw");
    write_h5(&input, "segmentation", &label.into(), [1.0, 0.25, 0.25]).expect("write label");

    let out = dir.path().join("out");
    let params = H5ConvertParams {
        label_key: Some("segmentation".into()),
        new_label_key: Some("cells".into()),
        pyramid: PyramidConfig {
            number_of_levels: 2,
            ..Default::default()
        },
        ..H5ConvertParams::new(&input, &out)
    };
    let converted = convert_h5(&params).expect("convert");
    assert_eq!(converted.len(), 1);
    assert_eq!(converted[0].zarr_url, out.join("sample.zarr").join("raw"));
    assert!(converted[0].types.is_3d);

    let image = OmeZarrImage::open(&converted[0].zarr_url).unwrap();
    assert_eq!(image.pixel_sizes_zyx(0).unwrap(), [1.0, 0.25, 0.25]);
    assert_eq!(image.pixel_sizes_zyx(1).unwrap(), [1.0, 0.5, 0.5]);
    assert_eq!(image.list_labels().unwrap(), vec!["cells".to_string()]);
    let cells = image.label("cells").unwrap().read_level(1).unwrap();
    assert_eq!(cells.shape(), &[3, 8, 8]);
    assert_eq!(cells[[0, 0, 7]], 1);
}
