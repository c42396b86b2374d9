use std::time::Instant;
use tracing::info;

use super::{check_dimension, ModelParts};
use crate::batching::run_batched;
use crate::config::EngineConfig;
use crate::encode::pooling::{l2_normalize, pool};
use crate::encode::Embedding;
use crate::error::Result;
use crate::inference::TensorBatch;
use crate::loader::LoadedModel;
use crate::preprocess::TextPreprocessor;
use crate::registry::{ModelFamily, ModelSpec, Pooling};

/// Dense sentence embeddings, L2-normalised.
pub struct TextEmbedding {
    parts: ModelParts<TextPreprocessor>,
}

impl TextEmbedding {
    /// Fetch (if needed) and load a catalog model using `config`.
    pub fn try_new(code: Option<&str>, config: &EngineConfig) -> Result<Self> {
        super::load(ModelFamily::TextEmbedding, code, config, |model| match model {
            LoadedModel::Text(m) => Some(m),
            _ => None,
        })
    }

    pub fn from_parts(parts: ModelParts<TextPreprocessor>) -> Self {
        Self { parts }
    }

    pub fn spec(&self) -> &'static ModelSpec {
        self.parts.spec
    }

    pub fn dimension(&self) -> Option<usize> {
        self.parts.spec.dimension
    }

    pub fn embed<S: AsRef<str>>(
        &mut self,
        texts: &[S],
        batch_size: Option<usize>,
    ) -> Result<Vec<Embedding>> {
        let batch_size = self.parts.batch_size(batch_size);
        let spec = self.parts.spec;
        let pooling = spec.pooling.unwrap_or(Pooling::Mean);
        let expected = spec.dimension;
        let start = Instant::now();

        let preprocessor = &self.parts.preprocessor;
        let backend = &mut self.parts.backend;
        let embeddings = run_batched(texts, batch_size, |_, chunk| {
            let batch = preprocessor.prepare(chunk)?;
            let mask = batch.attention_mask.clone();
            let hidden = backend.run(&TensorBatch::Text(batch))?;
            let mut vectors = pool(&hidden, &mask, pooling)?;
            for v in vectors.iter_mut() {
                check_dimension(spec, v.len(), expected)?;
                l2_normalize(v);
            }
            Ok(vectors)
        })?;

        log_timing(spec.code, "Embedded texts", texts.len(), start);
        Ok(embeddings)
    }
}

pub(crate) fn log_timing(code: &str, what: &str, items: usize, start: Instant) {
    let elapsed = start.elapsed();
    let ms_per_item = if items > 0 {
        elapsed.as_secs_f64() * 1000.0 / items as f64
    } else {
        0.0
    };
    info!(
        code,
        items,
        elapsed_secs = elapsed.as_secs_f64(),
        ms_per_item,
        "{what}"
    );
}
