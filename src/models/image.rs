use std::path::Path;
use std::time::Instant;

use super::text::log_timing;
use super::{check_dimension, ModelParts};
use crate::batching::run_batched;
use crate::config::EngineConfig;
use crate::encode::pooling::{image_vectors, l2_normalize};
use crate::encode::Embedding;
use crate::error::Result;
use crate::inference::TensorBatch;
use crate::loader::LoadedModel;
use crate::preprocess::ImagePreprocessor;
use crate::registry::{ModelFamily, ModelSpec};

pub struct ImageEmbedding {
    parts: ModelParts<ImagePreprocessor>,
}

impl ImageEmbedding {
    /// Fetch (if needed) and load a catalog model using `config`.
    pub fn try_new(code: Option<&str>, config: &EngineConfig) -> Result<Self> {
        super::load(ModelFamily::ImageEmbedding, code, config, |model| match model {
            LoadedModel::Image(m) => Some(m),
            _ => None,
        })
    }

    pub fn from_parts(parts: ModelParts<ImagePreprocessor>) -> Self {
        Self { parts }
    }

    pub fn spec(&self) -> &'static ModelSpec {
        self.parts.spec
    }

    pub fn dimension(&self) -> Option<usize> {
        self.parts.spec.dimension
    }

    /// Embed image files. A missing or undecodable file fails the whole call
    /// with its index.
    pub fn embed<P: AsRef<Path>>(
        &mut self,
        paths: &[P],
        batch_size: Option<usize>,
    ) -> Result<Vec<Embedding>> {
        let batch_size = self.parts.batch_size(batch_size);
        let spec = self.parts.spec;
        let start = Instant::now();

        let preprocessor = &self.parts.preprocessor;
        let backend = &mut self.parts.backend;
        let embeddings = run_batched(paths, batch_size, |_, chunk| {
            let pixels = preprocessor.prepare(chunk)?;
            let output = backend.run(&TensorBatch::Pixels(pixels))?;
            let mut vectors = image_vectors(&output)?;
            for v in vectors.iter_mut() {
                check_dimension(spec, v.len(), spec.dimension)?;
                l2_normalize(v);
            }
            Ok(vectors)
        })?;

        log_timing(spec.code, "Embedded images", paths.len(), start);
        Ok(embeddings)
    }
}
