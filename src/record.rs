//! In-memory image and label records in canonical layout.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::layout::{AxisLayout, AxisName, normalize};
use crate::map_volume;
use crate::volume::VolumeData;

/// NGFF spatial unit names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpaceUnit {
    Angstrom,
    Attometer,
    Centimeter,
    Decimeter,
    Exameter,
    Femtometer,
    Foot,
    Gigameter,
    Hectometer,
    Inch,
    Kilometer,
    Megameter,
    Meter,
    #[default]
    Micrometer,
    Mile,
    Millimeter,
    Nanometer,
    Parsec,
    Petameter,
    Picometer,
    Terameter,
    Yard,
    Yoctometer,
    Yottameter,
    Zeptometer,
    Zettameter,
}

impl SpaceUnit {
    pub fn as_str(&self) -> &'static str {
        use SpaceUnit::*;
        match self {
            Angstrom => "angstrom",
            Attometer => "attometer",
            Centimeter => "centimeter",
            Decimeter => "decimeter",
            Exameter => "exameter",
            Femtometer => "femtometer",
            Foot => "foot",
            Gigameter => "gigameter",
            Hectometer => "hectometer",
            Inch => "inch",
            Kilometer => "kilometer",
            Megameter => "megameter",
            Meter => "meter",
            Micrometer => "micrometer",
            Mile => "mile",
            Millimeter => "millimeter",
            Nanometer => "nanometer",
            Parsec => "parsec",
            Petameter => "petameter",
            Picometer => "picometer",
            Terameter => "terameter",
            Yard => "yard",
            Yoctometer => "yoctometer",
            Yottameter => "yottameter",
            Zeptometer => "zeptometer",
            Zettameter => "zettameter",
        }
    }
}

impl fmt::Display for SpaceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpaceUnit {
    type Err = crate::Error;

    /// Accepts NGFF names as well as the abbreviations found in file headers.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let unit = match normalized.as_str() {
            "um" | "µm" | "μm" | "micron" | "microns" => SpaceUnit::Micrometer,
            "nm" => SpaceUnit::Nanometer,
            "mm" => SpaceUnit::Millimeter,
            "cm" => SpaceUnit::Centimeter,
            "m" => SpaceUnit::Meter,
            "a" | "å" => SpaceUnit::Angstrom,
            "pm" => SpaceUnit::Picometer,
            other => serde_json::from_value(serde_json::Value::String(other.to_string()))
                .map_err(|_| crate::Error::invalid(format!("unknown spatial unit {s:?}")))?,
        };
        Ok(unit)
    }
}

/// User-supplied scale for one axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisScale {
    pub axis_name: AxisName,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

/// Metadata corrections applied on top of what was read from the input file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomAxis {
    pub axis: Vec<AxisScale>,
    /// Replaces the unit read from the input when set.
    pub spatial_units: Option<SpaceUnit>,
    pub channel_names: Vec<String>,
}

/// Voxel sizes with a product of ~1 are what readers report when the file
/// carries no calibration.
pub fn is_calibrated(voxel_size: &[f64; 3]) -> bool {
    let prod: f64 = voxel_size.iter().product();
    (prod - 1.0).abs() > 1e-8 + 1e-5
}

/// Apply axis overrides to a voxel size.
///
/// If `voxel_size` is uncalibrated, every spatial axis of `source` must be
/// covered by an override.
fn override_voxel_size(
    voxel_size: [f64; 3],
    source: &AxisLayout,
    custom: &CustomAxis,
) -> crate::Result<[f64; 3]> {
    let mut out = voxel_size;
    for a in &custom.axis {
        match a.axis_name.spatial_index() {
            Some(i) => out[i] = a.scale,
            None if a.scale != 1.0 => {
                return Err(crate::Error::invalid(format!(
                    "channel axis scale is fixed at 1, got {}",
                    a.scale
                )));
            }
            None => (),
        }
        if !(a.scale > 0.0) {
            return Err(crate::Error::invalid(format!(
                "scale for axis {:?} must be positive, got {}",
                a.axis_name.as_char(),
                a.scale
            )));
        }
    }
    if !is_calibrated(&voxel_size) {
        for axis in source.axes().iter().filter(|a| a.is_spatial()) {
            if !custom.axis.iter().any(|a| a.axis_name == *axis) {
                return Err(crate::Error::MissingCalibration {
                    axis: axis.as_char(),
                });
            }
        }
    }
    Ok(out)
}

/// A label volume in `ZYX` layout.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelRecord {
    key: String,
    data: VolumeData,
    source_layout: AxisLayout,
    voxel_size: [f64; 3],
    unit: SpaceUnit,
}

impl LabelRecord {
    /// `layout` may contain a channel axis, which is dropped before normalizing.
    pub fn new(
        key: impl Into<String>,
        data: VolumeData,
        layout: &AxisLayout,
        voxel_size: [f64; 3],
        unit: SpaceUnit,
    ) -> crate::Result<Self> {
        let source_layout = layout.without_channel();
        let target = AxisLayout::label();
        let data = map_volume!(data, a => normalize(a, &source_layout, voxel_size, &target)?.0);
        Ok(Self {
            key: key.into(),
            data,
            source_layout,
            voxel_size,
            unit,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn data(&self) -> &VolumeData {
        &self.data
    }

    pub fn voxel_size(&self) -> [f64; 3] {
        self.voxel_size
    }

    pub fn unit(&self) -> SpaceUnit {
        self.unit
    }

    /// Scale per `ZYX` axis.
    pub fn scale(&self) -> Vec<f64> {
        self.voxel_size.to_vec()
    }

    pub fn source_layout(&self) -> &AxisLayout {
        &self.source_layout
    }

    pub fn has_valid_voxel_size(&self) -> bool {
        is_calibrated(&self.voxel_size)
    }

    pub fn with_override(&self, custom: &CustomAxis) -> crate::Result<Self> {
        Ok(Self {
            voxel_size: override_voxel_size(self.voxel_size, &self.source_layout, custom)?,
            unit: custom.spatial_units.unwrap_or(self.unit),
            ..self.clone()
        })
    }
}

/// An image volume in `CZYX` layout, optionally paired with a label.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    key: String,
    data: VolumeData,
    source_layout: AxisLayout,
    voxel_size: [f64; 3],
    unit: SpaceUnit,
    channel_names: Option<Vec<String>>,
    label: Option<LabelRecord>,
}

impl ImageRecord {
    pub fn new(
        key: impl Into<String>,
        data: VolumeData,
        layout: &AxisLayout,
        voxel_size: [f64; 3],
        unit: SpaceUnit,
    ) -> crate::Result<Self> {
        let target = AxisLayout::image();
        let data = map_volume!(data, a => normalize(a, layout, voxel_size, &target)?.0);
        if !is_calibrated(&voxel_size) {
            log::warn!("voxel size {voxel_size:?} looks uncalibrated");
        }
        Ok(Self {
            key: key.into(),
            data,
            source_layout: layout.clone(),
            voxel_size,
            unit,
            channel_names: None,
            label: None,
        })
    }

    /// Attach a label, whose spatial shape must match the image's.
    pub fn with_label(self, label: LabelRecord) -> crate::Result<Self> {
        let image_spatial = &self.data.shape()[1..];
        if image_spatial != label.data.shape() {
            return Err(crate::Error::ShapeMismatch {
                layout: self.source_layout.to_string(),
                left: image_spatial.to_vec(),
                right: label.data.shape().to_vec().into(),
            });
        }
        Ok(Self {
            label: Some(label),
            ..self
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn data(&self) -> &VolumeData {
        &self.data
    }

    pub fn label(&self) -> Option<&LabelRecord> {
        self.label.as_ref()
    }

    pub fn voxel_size(&self) -> [f64; 3] {
        self.voxel_size
    }

    pub fn unit(&self) -> SpaceUnit {
        self.unit
    }

    pub fn channel_names(&self) -> Option<&[String]> {
        self.channel_names.as_deref()
    }

    pub fn num_channels(&self) -> usize {
        self.data.shape()[0]
    }

    /// Scale per `CZYX` axis; the channel scale is always 1.
    pub fn scale(&self) -> Vec<f64> {
        let [z, y, x] = self.voxel_size;
        vec![1.0, z, y, x]
    }

    pub fn source_layout(&self) -> &AxisLayout {
        &self.source_layout
    }

    pub fn is_3d(&self) -> bool {
        self.source_layout.is_3d()
    }

    pub fn has_valid_voxel_size(&self) -> bool {
        is_calibrated(&self.voxel_size)
    }

    /// A corrected copy of this record; the paired label receives the same
    /// spatial correction.
    pub fn with_override(&self, custom: &CustomAxis) -> crate::Result<Self> {
        let voxel_size = override_voxel_size(self.voxel_size, &self.source_layout, custom)?;
        let unit = custom.spatial_units.unwrap_or(self.unit);
        let channel_names = if custom.channel_names.is_empty() {
            self.channel_names.clone()
        } else if custom.channel_names.len() != self.num_channels() {
            return Err(crate::Error::invalid(format!(
                "got {} channel names for {} channels",
                custom.channel_names.len(),
                self.num_channels()
            )));
        } else {
            Some(custom.channel_names.clone())
        };
        let label = self
            .label
            .as_ref()
            .map(|l| LabelRecord {
                voxel_size,
                unit,
                ..l.clone()
            });
        Ok(Self {
            voxel_size,
            unit,
            channel_names,
            label,
            ..self.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    fn zyx(shape: &[usize], voxel_size: [f64; 3]) -> ImageRecord {
        ImageRecord::new(
            "raw",
            ArrayD::<u8>::zeros(IxDyn(shape)).into(),
            &"ZYX".parse().unwrap(),
            voxel_size,
            SpaceUnit::Micrometer,
        )
        .unwrap()
    }

    fn label(shape: &[usize]) -> LabelRecord {
        LabelRecord::new(
            "label",
            ArrayD::<u32>::zeros(IxDyn(shape)).into(),
            &"ZYX".parse().unwrap(),
            [1.0; 3],
            SpaceUnit::Micrometer,
        )
        .unwrap()
    }

    #[test]
    fn calibration_check() {
        assert!(!zyx(&[2, 4, 4], [1.0, 1.0, 1.0]).has_valid_voxel_size());
        assert!(zyx(&[2, 4, 4], [0.5, 0.25, 0.25]).has_valid_voxel_size());
    }

    #[test]
    fn image_is_czyx() {
        let rec = zyx(&[2, 4, 5], [0.5, 0.25, 0.25]);
        assert_eq!(rec.data().shape(), &[1, 2, 4, 5]);
        assert_eq!(rec.scale(), vec![1.0, 0.5, 0.25, 0.25]);
    }

    #[test]
    fn label_must_match_spatial_shape() {
        let rec = zyx(&[2, 4, 5], [0.5, 0.25, 0.25]);
        assert!(rec.clone().with_label(label(&[2, 4, 5])).is_ok());
        let err = rec.with_label(label(&[2, 4, 4])).unwrap_err();
        match err {
            crate::Error::ShapeMismatch { left, right, .. } => {
                assert_eq!(left, vec![2, 4, 5]);
                assert_eq!(right, crate::ExpectedShape::Shape(vec![2, 4, 4]));
            }
            e => panic!("unexpected error {e}"),
        }
    }

    #[test]
    fn uncalibrated_needs_every_spatial_axis() {
        let rec = zyx(&[2, 4, 5], [1.0; 3]);
        let partial = CustomAxis {
            axis: vec![
                AxisScale {
                    axis_name: AxisName::Y,
                    scale: 0.2,
                },
                AxisScale {
                    axis_name: AxisName::X,
                    scale: 0.2,
                },
            ],
            ..Default::default()
        };
        assert!(matches!(
            rec.with_override(&partial),
            Err(crate::Error::MissingCalibration { axis: 'z' })
        ));

        let mut full = partial.clone();
        full.axis.push(AxisScale {
            axis_name: AxisName::Z,
            scale: 1.5,
        });
        let fixed = rec.with_override(&full).unwrap();
        assert_eq!(fixed.voxel_size(), [1.5, 0.2, 0.2]);
        // the source record is unchanged
        assert_eq!(rec.voxel_size(), [1.0; 3]);
    }

    #[test]
    fn yx_only_needs_yx_override() {
        let rec = ImageRecord::new(
            "raw",
            ArrayD::<u8>::zeros(IxDyn(&[4, 5])).into(),
            &"YX".parse().unwrap(),
            [1.0; 3],
            SpaceUnit::Micrometer,
        )
        .unwrap();
        let custom: CustomAxis = serde_json::from_str(
            r#"{"axis": [{"axis_name": "y", "scale": 0.3}, {"axis_name": "x", "scale": 0.3}]}"#,
        )
        .unwrap();
        let fixed = rec.with_override(&custom).unwrap();
        assert_eq!(fixed.voxel_size(), [1.0, 0.3, 0.3]);
        assert!(!fixed.is_3d());
    }

    #[test]
    fn channel_names_must_match() {
        let rec = ImageRecord::new(
            "raw",
            ArrayD::<u8>::zeros(IxDyn(&[2, 4, 5])).into(),
            &"CYX".parse().unwrap(),
            [1.0, 0.5, 0.5],
            SpaceUnit::Micrometer,
        )
        .unwrap();
        let custom = CustomAxis {
            channel_names: vec!["nuclei".into()],
            ..Default::default()
        };
        assert!(matches!(
            rec.with_override(&custom),
            Err(crate::Error::InvalidInput(_))
        ));
        let custom = CustomAxis {
            channel_names: vec!["nuclei".into(), "membrane".into()],
            ..Default::default()
        };
        let named = rec.with_override(&custom).unwrap();
        assert_eq!(named.channel_names().unwrap().len(), 2);
    }

    #[test]
    fn override_keeps_file_unit() {
        let rec = ImageRecord::new(
            "raw",
            ArrayD::<u8>::zeros(IxDyn(&[2, 4, 5])).into(),
            &"ZYX".parse().unwrap(),
            [200.0, 50.0, 50.0],
            SpaceUnit::Nanometer,
        )
        .unwrap();
        let kept = rec.with_override(&CustomAxis::default()).unwrap();
        assert_eq!(kept.unit(), SpaceUnit::Nanometer);

        let custom: CustomAxis = serde_json::from_str(r#"{"spatial_units": "micrometer"}"#).unwrap();
        let replaced = rec.with_override(&custom).unwrap();
        assert_eq!(replaced.unit(), SpaceUnit::Micrometer);
        assert_eq!(replaced.voxel_size(), [200.0, 50.0, 50.0]);
    }

    #[test]
    fn unit_abbreviations() {
        assert_eq!("um".parse::<SpaceUnit>().unwrap(), SpaceUnit::Micrometer);
        assert_eq!("µm".parse::<SpaceUnit>().unwrap(), SpaceUnit::Micrometer);
        assert_eq!("nanometer".parse::<SpaceUnit>().unwrap(), SpaceUnit::Nanometer);
        assert!("parsecs".parse::<SpaceUnit>().is_err());
    }
}
