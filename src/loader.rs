//! Resolve, fetch and load a catalog model into its typed wrapper.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::cache::ModelCache;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::inference::{BackendFactory, OnnxBackendFactory};
use crate::metrics::MetricsRegistry;
use crate::models::{
    ImageEmbedding, ModelParts, SparseTextEmbedding, TextEmbedding, TextRerank,
};
use crate::preprocess::{ImagePreprocessor, TextPreprocessor};
use crate::registry::{self, ModelFamily, ModelSpec};

/// A ready-to-run model of any family.
pub enum LoadedModel {
    Text(TextEmbedding),
    Sparse(SparseTextEmbedding),
    Image(ImageEmbedding),
    Rerank(TextRerank),
}

impl LoadedModel {
    pub fn family(&self) -> ModelFamily {
        self.spec().family
    }

    pub fn spec(&self) -> &'static ModelSpec {
        match self {
            LoadedModel::Text(m) => m.spec(),
            LoadedModel::Sparse(m) => m.spec(),
            LoadedModel::Image(m) => m.spec(),
            LoadedModel::Rerank(m) => m.spec(),
        }
    }
}

pub struct ModelLoader {
    cache: ModelCache,
    backends: Arc<dyn BackendFactory>,
    max_length: usize,
    batch_size: Option<usize>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl ModelLoader {
    pub fn new(cache: ModelCache, backends: Arc<dyn BackendFactory>, max_length: usize) -> Self {
        Self {
            cache,
            backends,
            max_length: max_length.max(1),
            batch_size: None,
            metrics: None,
        }
    }

    /// Loader backed by ONNX Runtime and the cache the configuration describes.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let cache = ModelCache::from_config(config)?;
        let backends = Arc::new(OnnxBackendFactory::new(
            config.execution_backend,
            config.intra_threads,
        ));
        Ok(Self::new(cache, backends, config.max_length).with_batch_size(config.batch_size))
    }

    /// Default batch size for loaded models; `None` keeps the family default.
    pub fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        self.batch_size = batch_size.filter(|&n| n > 0);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.cache = self.cache.with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Resolve `code` within `family`, make sure its artifact is cached, then
    /// build the preprocessor and inference session.
    pub fn load(&self, family: ModelFamily, code: Option<&str>) -> Result<LoadedModel> {
        let start = Instant::now();
        let spec = registry::resolve(family, code)?;
        let dir = self.cache.ensure(spec)?;
        let model = self.build(spec, &dir)?;

        let elapsed = start.elapsed();
        info!(
            family = family.slug(),
            code = spec.code,
            elapsed_secs = elapsed.as_secs_f64(),
            "Model loaded"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_load(family, elapsed);
        }
        Ok(model)
    }

    fn build(&self, spec: &'static ModelSpec, dir: &Path) -> Result<LoadedModel> {
        let model = match spec.family {
            ModelFamily::TextEmbedding => {
                let pre = TextPreprocessor::from_dir(dir, self.max_length)?;
                LoadedModel::Text(TextEmbedding::from_parts(self.parts(spec, dir, pre)?))
            }
            ModelFamily::SparseTextEmbedding => {
                let pre = TextPreprocessor::from_dir(dir, self.max_length)?;
                LoadedModel::Sparse(SparseTextEmbedding::from_parts(self.parts(spec, dir, pre)?))
            }
            ModelFamily::ImageEmbedding => {
                let pre = ImagePreprocessor::from_dir(dir)?;
                LoadedModel::Image(ImageEmbedding::from_parts(self.parts(spec, dir, pre)?))
            }
            ModelFamily::Rerank => {
                let pre = TextPreprocessor::from_dir(dir, self.max_length)?;
                LoadedModel::Rerank(TextRerank::from_parts(self.parts(spec, dir, pre)?))
            }
        };
        Ok(model)
    }

    fn parts<P>(&self, spec: &'static ModelSpec, dir: &Path, pre: P) -> Result<ModelParts<P>> {
        let backend = self.backends.create(spec, dir)?;
        let parts = ModelParts::new(spec, pre, backend);
        Ok(match self.batch_size {
            Some(n) => parts.with_default_batch_size(n),
            None => parts,
        })
    }
}
