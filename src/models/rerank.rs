use std::time::Instant;

use super::text::log_timing;
use super::ModelParts;
use crate::batching::run_batched;
use crate::config::EngineConfig;
use crate::encode::rerank::{rank, scores, RerankResult};
use crate::error::{EngineError, Result};
use crate::inference::TensorBatch;
use crate::loader::LoadedModel;
use crate::preprocess::TextPreprocessor;
use crate::registry::{ModelFamily, ModelSpec};

/// Cross-encoder reranker. Scores are raw relevance logits.
pub struct TextRerank {
    parts: ModelParts<TextPreprocessor>,
}

impl TextRerank {
    /// Fetch (if needed) and load a catalog model using `config`.
    pub fn try_new(code: Option<&str>, config: &EngineConfig) -> Result<Self> {
        super::load(ModelFamily::Rerank, code, config, |model| match model {
            LoadedModel::Rerank(m) => Some(m),
            _ => None,
        })
    }

    pub fn from_parts(parts: ModelParts<TextPreprocessor>) -> Self {
        Self { parts }
    }

    pub fn spec(&self) -> &'static ModelSpec {
        self.parts.spec
    }

    /// Score every document against `query` and return them best first.
    pub fn rerank<S: AsRef<str>>(
        &mut self,
        query: &str,
        documents: &[S],
        return_documents: bool,
        batch_size: Option<usize>,
    ) -> Result<Vec<RerankResult>> {
        if query.trim().is_empty() {
            return Err(EngineError::invalid_argument("rerank query must not be empty"));
        }
        let batch_size = self.parts.batch_size(batch_size);
        let start = Instant::now();

        let preprocessor = &self.parts.preprocessor;
        let backend = &mut self.parts.backend;
        let raw = run_batched(documents, batch_size, |_, chunk| {
            let batch = preprocessor.prepare_pairs(query, chunk)?;
            let logits = backend.run(&TensorBatch::Text(batch))?;
            scores(&logits)
        })?;

        let ranked = rank(raw, documents, return_documents);
        log_timing(self.parts.spec.code, "Reranked documents", documents.len(), start);
        Ok(ranked)
    }
}
