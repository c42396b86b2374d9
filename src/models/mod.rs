//! Typed model wrappers, one per family.

pub mod image;
pub mod rerank;
pub mod sparse;
pub mod text;

pub use image::ImageEmbedding;
pub use rerank::TextRerank;
pub use sparse::SparseTextEmbedding;
pub use text::TextEmbedding;

use crate::batching::{default_batch_size, effective_batch_size};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::inference::InferenceBackend;
use crate::loader::{LoadedModel, ModelLoader};
use crate::registry::{ModelFamily, ModelSpec};

/// Catalog entry, preprocessor and inference session behind every typed model.
pub struct ModelParts<P> {
    pub(crate) spec: &'static ModelSpec,
    pub(crate) preprocessor: P,
    pub(crate) backend: Box<dyn InferenceBackend>,
    default_batch_size: usize,
}

impl<P> ModelParts<P> {
    pub fn new(
        spec: &'static ModelSpec,
        preprocessor: P,
        backend: Box<dyn InferenceBackend>,
    ) -> Self {
        Self {
            spec,
            preprocessor,
            backend,
            default_batch_size: default_batch_size(spec.family),
        }
    }

    /// Batch size used when a call passes `None` or `0`.
    pub fn with_default_batch_size(mut self, batch_size: usize) -> Self {
        self.default_batch_size = batch_size.max(1);
        self
    }

    pub fn spec(&self) -> &'static ModelSpec {
        self.spec
    }

    pub(crate) fn batch_size(&self, requested: Option<usize>) -> usize {
        effective_batch_size(requested, self.default_batch_size)
    }
}

/// Fetch (if needed) and load a catalog model of `family` using `config`,
/// keeping it only if `pick` recognises the variant.
pub(crate) fn load<M>(
    family: ModelFamily,
    code: Option<&str>,
    config: &EngineConfig,
    pick: fn(LoadedModel) -> Option<M>,
) -> Result<M> {
    let model = ModelLoader::from_config(config)?.load(family, code)?;
    let got = model.family();
    pick(model).ok_or_else(|| EngineError::inference(format!("loader returned a {got} model")))
}

/// A graph whose output width disagrees with the catalog is an inference
/// failure rather than a silently wrong vector.
pub(crate) fn check_dimension(
    spec: &ModelSpec,
    got: usize,
    expected: Option<usize>,
) -> Result<()> {
    match expected {
        Some(expected) if expected != got => Err(EngineError::inference(format!(
            "{} produced vectors of dimension {got}, expected {expected}",
            spec.code
        ))),
        _ => Ok(()),
    }
}
