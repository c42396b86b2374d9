use std::time::Instant;

use super::text::log_timing;
use super::ModelParts;
use crate::batching::run_batched;
use crate::config::EngineConfig;
use crate::encode::sparse::{splade, SparseEmbedding};
use crate::error::{EngineError, Result};
use crate::inference::TensorBatch;
use crate::loader::LoadedModel;
use crate::preprocess::TextPreprocessor;
use crate::registry::{ModelFamily, ModelSpec};

/// SPLADE-style sparse embeddings over the tokenizer vocabulary.
pub struct SparseTextEmbedding {
    parts: ModelParts<TextPreprocessor>,
}

impl SparseTextEmbedding {
    /// Fetch (if needed) and load a catalog model using `config`.
    pub fn try_new(code: Option<&str>, config: &EngineConfig) -> Result<Self> {
        super::load(ModelFamily::SparseTextEmbedding, code, config, |model| match model {
            LoadedModel::Sparse(m) => Some(m),
            _ => None,
        })
    }

    pub fn from_parts(parts: ModelParts<TextPreprocessor>) -> Self {
        Self { parts }
    }

    pub fn spec(&self) -> &'static ModelSpec {
        self.parts.spec
    }

    pub fn embed<S: AsRef<str>>(
        &mut self,
        texts: &[S],
        batch_size: Option<usize>,
    ) -> Result<Vec<SparseEmbedding>> {
        let batch_size = self.parts.batch_size(batch_size);
        let spec = self.parts.spec;
        let start = Instant::now();

        let preprocessor = &self.parts.preprocessor;
        let backend = &mut self.parts.backend;
        let embeddings = run_batched(texts, batch_size, |_, chunk| {
            let batch = preprocessor.prepare(chunk)?;
            let mask = batch.attention_mask.clone();
            let logits = backend.run(&TensorBatch::Text(batch))?;
            // Vocabulary axis bounds every index.
            let vocab = logits.shape().last().copied().unwrap_or(0);
            if let Some(expected) = spec.dimension {
                if vocab != expected {
                    return Err(EngineError::inference(format!(
                        "{} produced a vocabulary of {vocab}, expected {expected}",
                        spec.code
                    )));
                }
            }
            splade(&logits, &mask)
        })?;

        log_timing(spec.code, "Embedded texts (sparse)", texts.len(), start);
        Ok(embeddings)
    }
}
