use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zarrs::array::codec::{Bz2Codec, Bz2CompressionLevel, GzipCodec};

use crate::layout::AxisName;
use crate::record::SpaceUnit;

/// NGFF version written to the `ome` attribute namespace.
pub const NGFF_VERSION: &str = "0.5";

/// Key of the NGFF attribute namespace in zarr.json attributes.
const OME_KEY: &str = "ome";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisType {
    Channel,
    Space,
    Time,
}

/// Representation of an NGFF axis descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub name: String,
    #[serde(rename = "type")]
    pub axis_type: AxisType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<SpaceUnit>,
}

impl Axis {
    pub fn new(name: AxisName, unit: SpaceUnit) -> Self {
        if name.is_spatial() {
            Self {
                name: name.as_str().to_string(),
                axis_type: AxisType::Space,
                unit: Some(unit),
            }
        } else {
            Self {
                name: name.as_str().to_string(),
                axis_type: AxisType::Channel,
                unit: None,
            }
        }
    }

    fn is(&self, name: AxisName) -> bool {
        self.name == name.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum CoordinateTransformation {
    Scale { scale: Vec<f64> },
    Translation { translation: Vec<f64> },
}

/// One pyramid level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    /// Path of the level's array relative to the multiscale group.
    pub path: String,
    pub coordinate_transformations: Vec<CoordinateTransformation>,
}

impl Dataset {
    pub fn scale(&self) -> Option<&[f64]> {
        self.coordinate_transformations.iter().find_map(|t| match t {
            CoordinateTransformation::Scale { scale } => Some(scale.as_slice()),
            _ => None,
        })
    }
}

/// Representation of NGFF multiscale metadata.
///
/// Immutable once built; written verbatim into the group attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Multiscale {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub axes: Vec<Axis>,
    pub datasets: Vec<Dataset>,
}

impl Multiscale {
    pub fn num_levels(&self) -> usize {
        self.datasets.len()
    }

    pub fn level_paths(&self) -> impl Iterator<Item = &str> {
        self.datasets.iter().map(|d| d.path.as_str())
    }

    pub fn axis_names(&self) -> Vec<&str> {
        self.axes.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn axis_index(&self, name: AxisName) -> Option<usize> {
        self.axes.iter().position(|a| a.is(name))
    }

    pub fn unit(&self) -> Option<SpaceUnit> {
        self.axes.iter().find_map(|a| a.unit)
    }

    pub fn scale(&self, level: usize) -> crate::Result<&[f64]> {
        self.datasets
            .get(level)
            .and_then(Dataset::scale)
            .ok_or_else(|| crate::Error::invalid(format!("no scale for level {level}")))
    }

    /// (Z, Y, X) pixel size at `level`; missing spatial axes count as 1.
    pub fn pixel_sizes_zyx(&self, level: usize) -> crate::Result<[f64; 3]> {
        let scale = self.scale(level)?;
        let mut out = [1.0; 3];
        for (axis, s) in self.axes.iter().zip(scale) {
            let idx = [AxisName::Z, AxisName::Y, AxisName::X]
                .into_iter()
                .find(|n| axis.is(*n))
                .and_then(AxisName::spatial_index);
            if let Some(i) = idx {
                out[i] = *s;
            }
        }
        Ok(out)
    }

    /// The same pyramid restricted to its spatial axes, as used by labels.
    pub fn spatial(&self) -> Self {
        let keep: Vec<bool> = self
            .axes
            .iter()
            .map(|a| a.axis_type == AxisType::Space)
            .collect();
        let filter = |v: &[f64]| -> Vec<f64> {
            v.iter()
                .zip(&keep)
                .filter_map(|(s, k)| k.then_some(*s))
                .collect()
        };
        Self {
            name: self.name.clone(),
            axes: self
                .axes
                .iter()
                .zip(&keep)
                .filter_map(|(a, k)| k.then(|| a.clone()))
                .collect(),
            datasets: self
                .datasets
                .iter()
                .map(|d| Dataset {
                    path: d.path.clone(),
                    coordinate_transformations: d
                        .coordinate_transformations
                        .iter()
                        .map(|t| match t {
                            CoordinateTransformation::Scale { scale } => {
                                CoordinateTransformation::Scale {
                                    scale: filter(scale),
                                }
                            }
                            CoordinateTransformation::Translation { translation } => {
                                CoordinateTransformation::Translation {
                                    translation: filter(translation),
                                }
                            }
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OmeroChannel {
    pub label: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Omero {
    pub channels: Vec<OmeroChannel>,
}

impl Omero {
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        Self {
            channels: names
                .iter()
                .map(|n| OmeroChannel {
                    label: n.as_ref().to_string(),
                    color: "#ffffff".to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSource {
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageLabel {
    pub source: LabelSource,
}

impl Default for ImageLabel {
    fn default() -> Self {
        Self {
            source: LabelSource {
                image: "../../".to_string(),
            },
        }
    }
}

/// Contents of the `ome` attribute namespace.
///
/// The same structure describes images, `labels` groups and label images;
/// absent members are omitted on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OmeAttributes {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiscales: Option<Vec<Multiscale>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub omero: Option<Omero>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(
        rename = "image-label",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub image_label: Option<ImageLabel>,
}

impl Default for OmeAttributes {
    fn default() -> Self {
        Self {
            version: NGFF_VERSION.to_string(),
            multiscales: None,
            omero: None,
            labels: None,
            image_label: None,
        }
    }
}

impl OmeAttributes {
    pub fn image(multiscale: Multiscale, omero: Option<Omero>) -> Self {
        Self {
            multiscales: Some(vec![multiscale]),
            omero,
            ..Default::default()
        }
    }

    pub fn label(multiscale: Multiscale) -> Self {
        Self {
            multiscales: Some(vec![multiscale]),
            image_label: Some(ImageLabel::default()),
            ..Default::default()
        }
    }

    pub fn labels(names: Vec<String>) -> Self {
        Self {
            labels: Some(names),
            ..Default::default()
        }
    }

    /// The first multiscale, which is the only one this crate writes.
    pub fn multiscale(&self) -> crate::Result<&Multiscale> {
        self.multiscales
            .as_ref()
            .and_then(|m| m.first())
            .ok_or_else(|| crate::Error::invalid("group has no multiscale metadata"))
    }

    /// Parse from zarr.json attributes.
    pub fn from_attributes(
        attributes: &serde_json::Map<String, serde_json::Value>,
    ) -> crate::Result<Self> {
        let value = attributes
            .get(OME_KEY)
            .ok_or_else(|| crate::Error::invalid("no NGFF attributes found"))?;
        Ok(Self::deserialize(value)?)
    }

    /// Serialize into zarr.json attributes.
    pub fn to_attributes(&self) -> crate::Result<serde_json::Map<String, serde_json::Value>> {
        let mut out = serde_json::Map::new();
        out.insert(OME_KEY.to_string(), serde_json::to_value(self)?);
        Ok(out)
    }
}

/// Pyramid construction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PyramidConfig {
    pub number_of_levels: usize,
    pub scaling_factor_xy: f64,
    pub scaling_factor_z: f64,
    /// Keep singleton axes the source did not have.
    pub create_all_axes: bool,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            number_of_levels: 4,
            scaling_factor_xy: 2.0,
            scaling_factor_z: 1.0,
            create_all_axes: true,
        }
    }
}

impl PyramidConfig {
    pub fn validate(&self) -> crate::Result<()> {
        for (name, f) in [
            ("scaling_factor_xy", self.scaling_factor_xy),
            ("scaling_factor_z", self.scaling_factor_z),
        ] {
            if !(1.0..=10.0).contains(&f) {
                return Err(crate::Error::invalid(format!(
                    "{name} must be in [1, 10], got {f}"
                )));
            }
        }
        if self.scaling_factor_z != 1.0 {
            return Err(crate::Error::NotImplemented(
                "downsampling along Z".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of arrays written; a request for 0 levels still writes the base.
    pub fn levels(&self) -> usize {
        self.number_of_levels.max(1)
    }

    /// Integer shrink factor applied to the array dimensions.
    pub fn xy_shrink(&self) -> usize {
        self.scaling_factor_xy as usize
    }
}

/// Build multiscale metadata for a pyramid over `axes` starting at `base_scale`.
///
/// Y and X scales are multiplied by the XY factor at each level, Z by the Z factor.
pub fn build_multiscale(
    name: Option<&str>,
    axes: Vec<Axis>,
    base_scale: &[f64],
    config: &PyramidConfig,
) -> crate::Result<Multiscale> {
    config.validate()?;
    if axes.len() != base_scale.len() {
        return Err(crate::Error::invalid(format!(
            "{} axes but {} scale values",
            axes.len(),
            base_scale.len()
        )));
    }
    let factors: Vec<f64> = axes
        .iter()
        .map(|a| {
            if a.is(AxisName::Y) || a.is(AxisName::X) {
                config.scaling_factor_xy
            } else if a.is(AxisName::Z) {
                config.scaling_factor_z
            } else {
                1.0
            }
        })
        .collect();

    let mut scale = base_scale.to_vec();
    let mut datasets = Vec::with_capacity(config.levels());
    for level in 0..config.levels() {
        log::debug!("level {level} scale {scale:?}");
        datasets.push(Dataset {
            path: level.to_string(),
            coordinate_transformations: vec![CoordinateTransformation::Scale {
                scale: scale.clone(),
            }],
        });
        for (s, f) in scale.iter_mut().zip(&factors) {
            *s *= f;
        }
    }

    Ok(Multiscale {
        name: name.map(str::to_string),
        axes,
        datasets,
    })
}

/// Chunk compression for written arrays.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Copy)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Compression {
    /// Uncompressed.
    #[default]
    Raw,
    Bzip2 {
        /// Default 9. Must be in the range 1..=9.
        #[serde(default = "default_bzip2_block_size")]
        block_size: u8,
    },
    Gzip {
        /// Default -1, meaning "implementation default" (6).
        #[serde(default = "default_gzip_level")]
        level: i8,
    },
}

fn default_bzip2_block_size() -> u8 {
    9
}

fn default_gzip_level() -> i8 {
    -1
}

impl Compression {
    /// Convert to a bytes-to-bytes codec, if any.
    pub fn to_bytes_to_bytes_codec(
        &self,
    ) -> crate::Result<Option<Arc<dyn zarrs_codec::BytesToBytesCodecTraits>>> {
        match self {
            Compression::Raw => Ok(None),
            Compression::Bzip2 { block_size } => Ok(Some(Arc::new(Bz2Codec::new(
                Bz2CompressionLevel::new(*block_size as u32)
                    .map_err(|n| crate::Error::invalid(format!("invalid bz2 block size {n}")))?,
            )))),
            Compression::Gzip { level } => {
                let lvl_int: u32 = match level {
                    -1 => 6,
                    n if *n >= 0 => *n as u32,
                    n => {
                        return Err(crate::Error::invalid(format!(
                            "invalid gzip compression level {n}"
                        )));
                    }
                };
                Ok(Some(Arc::new(
                    GzipCodec::new(lvl_int).map_err(crate::Error::wrap)?,
                )))
            }
        }
    }
}
