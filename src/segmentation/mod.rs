//! Boundary prediction and segmentation, behind backend traits.
//!
//! The neural network and the graph partitioning algorithms live outside this
//! crate; [Predictor] and [SegmentationBackend] are the seams where they plug
//! in. [standard_workflow] chains them the way a single volume is processed.

use std::fmt;
use std::path::{Path, PathBuf};

use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};

pub mod runner;

pub use runner::{SegmentationRequest, SegmentationRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    #[default]
    Cuda,
}

/// Where the prediction network comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ModelSource {
    /// A model from the built-in zoo, by name.
    Zoo { name: String },
    /// A model from the BioImage.IO repository, by id.
    BioImageIo { id: String },
    /// A directory holding `config.yaml` and `model.pth`.
    Local { path: PathBuf },
}

impl Default for ModelSource {
    fn default() -> Self {
        Self::Zoo {
            name: "generic_confocal_3D_unet".to_string(),
        }
    }
}

/// A model whose identity has been checked against the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedModel {
    Zoo(String),
    BioImageIo(String),
    Local { config: PathBuf, weights: PathBuf },
}

/// Snapshot of the models available to a [Predictor], taken once when the
/// runner is built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCatalog {
    pub zoo: Vec<String>,
    pub bioimageio: Vec<String>,
}

impl ModelCatalog {
    pub fn resolve(&self, source: &ModelSource) -> crate::Result<ResolvedModel> {
        match source {
            ModelSource::Zoo { name } => {
                if self.zoo.iter().any(|m| m == name) {
                    Ok(ResolvedModel::Zoo(name.clone()))
                } else {
                    Err(crate::Error::invalid(format!("unknown zoo model {name:?}")))
                }
            }
            ModelSource::BioImageIo { id } => {
                if self.bioimageio.iter().any(|m| m == id) {
                    Ok(ResolvedModel::BioImageIo(id.clone()))
                } else {
                    Err(crate::Error::invalid(format!("unknown BioImage.IO model {id:?}")))
                }
            }
            ModelSource::Local { path } => resolve_local(path),
        }
    }
}

fn resolve_local(path: &Path) -> crate::Result<ResolvedModel> {
    let config = path.join("config.yaml");
    let weights = path.join("model.pth");
    for p in [&config, &weights] {
        if !p.is_file() {
            return Err(crate::Error::InputNotFound(p.clone()));
        }
    }
    Ok(ResolvedModel::Local { config, weights })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    pub model: ModelSource,
    pub device: Device,
    /// (Z, Y, X) patch size.
    pub patch: [usize; 3],
    /// Segment the raw volume directly.
    pub skip: bool,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            model: ModelSource::default(),
            device: Device::default(),
            patch: [80, 160, 160],
            skip: false,
        }
    }
}

impl PredictionConfig {
    /// Resolve the model, or `None` when prediction is skipped.
    pub fn validate(&self, catalog: &ModelCatalog) -> crate::Result<Option<ResolvedModel>> {
        if self.patch.contains(&0) {
            return Err(crate::Error::invalid(format!(
                "patch size must be positive, got {:?}",
                self.patch
            )));
        }
        if self.skip {
            return Ok(None);
        }
        catalog.resolve(&self.model).map(Some)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentationType {
    #[default]
    Gasp,
    MutexWs,
    Multicut,
    DtWatershed,
}

impl SegmentationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentationType::Gasp => "gasp",
            SegmentationType::MutexWs => "mutex_ws",
            SegmentationType::Multicut => "multicut",
            SegmentationType::DtWatershed => "dt_watershed",
        }
    }

    /// The agglomeration step run on top of the watershed superpixels.
    pub fn agglomeration<B: SegmentationBackend>(self) -> Agglomeration<B> {
        match self {
            SegmentationType::Gasp => Agglomeration::Run(B::gasp),
            SegmentationType::MutexWs => Agglomeration::Run(B::mutex_ws),
            SegmentationType::Multicut => Agglomeration::Run(B::multicut),
            SegmentationType::DtWatershed => Agglomeration::ReuseSuperpixels,
        }
    }
}

impl fmt::Display for SegmentationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub ws_threshold: f64,
    pub segmentation_type: SegmentationType,
    pub beta: f64,
    pub post_minsize: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            ws_threshold: 0.5,
            segmentation_type: SegmentationType::default(),
            beta: 0.6,
            post_minsize: 100,
        }
    }
}

/// Arguments shared by every agglomeration algorithm.
#[derive(Debug, Clone, Copy)]
pub struct AgglomerationInput<'a> {
    pub boundary_pmaps: ArrayView3<'a, f32>,
    pub superpixels: ArrayView3<'a, u32>,
    pub beta: f64,
    pub post_minsize: usize,
}

pub type AgglomerateFn<B> = fn(&B, &AgglomerationInput<'_>) -> crate::Result<Array3<u32>>;

pub enum Agglomeration<B> {
    Run(AgglomerateFn<B>),
    /// Use the watershed superpixels as the final segmentation.
    ReuseSuperpixels,
}

/// Runs a boundary prediction network over a volume.
pub trait Predictor {
    fn predict(
        &self,
        volume: ArrayView3<f32>,
        model: &ResolvedModel,
        device: Device,
        patch: [usize; 3],
    ) -> crate::Result<Array3<f32>>;
}

/// Superpixel and agglomeration algorithms.
///
/// Returned ids start near 0 for every call.
pub trait SegmentationBackend {
    /// Version string checked once when a runner is built.
    fn version(&self) -> String;

    fn dt_watershed(&self, boundary_pmaps: ArrayView3<f32>, threshold: f64)
    -> crate::Result<Array3<u32>>;

    fn gasp(&self, input: &AgglomerationInput<'_>) -> crate::Result<Array3<u32>>;

    fn mutex_ws(&self, input: &AgglomerationInput<'_>) -> crate::Result<Array3<u32>>;

    fn multicut(&self, input: &AgglomerationInput<'_>) -> crate::Result<Array3<u32>>;
}

/// Segment `boundary_pmaps`: watershed superpixels, then agglomeration.
pub fn segment<B: SegmentationBackend>(
    backend: &B,
    boundary_pmaps: ArrayView3<f32>,
    config: &SegmentationConfig,
) -> crate::Result<Array3<u32>> {
    let superpixels = backend.dt_watershed(boundary_pmaps, config.ws_threshold)?;
    match config.segmentation_type.agglomeration::<B>() {
        Agglomeration::Run(f) => f(
            backend,
            &AgglomerationInput {
                boundary_pmaps: boundary_pmaps.view(),
                superpixels: superpixels.view(),
                beta: config.beta,
                post_minsize: config.post_minsize,
            },
        ),
        Agglomeration::ReuseSuperpixels => Ok(superpixels),
    }
}

/// Prediction (unless skipped) followed by segmentation.
///
/// `model` must be `Some` unless `prediction.skip` is set.
pub fn standard_workflow<P: Predictor, B: SegmentationBackend>(
    predictor: &P,
    backend: &B,
    volume: ArrayView3<f32>,
    prediction: &PredictionConfig,
    model: Option<&ResolvedModel>,
    segmentation: &SegmentationConfig,
) -> crate::Result<Array3<u32>> {
    let labels = match (prediction.skip, model) {
        (true, _) => {
            log::info!("skipping prediction");
            segment(backend, volume, segmentation)?
        }
        (false, Some(model)) => {
            let pmaps = predictor.predict(volume, model, prediction.device, prediction.patch)?;
            log::info!("prediction done");
            segment(backend, pmaps.view(), segmentation)?
        }
        (false, None) => return Err(crate::Error::invalid("no model given for prediction")),
    };
    log::info!("segmentation done");
    Ok(labels)
}
