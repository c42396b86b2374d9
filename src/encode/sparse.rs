use ndarray::{Array2, ArrayD, Ix3};
use serde::Serialize;

use crate::error::{EngineError, Result};

/// Non-zero vocabulary weights. `indices` is strictly increasing and parallel
/// to `values`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SparseEmbedding {
    pub indices: Vec<usize>,
    pub values: Vec<f32>,
}

impl SparseEmbedding {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// SPLADE activation over `[batch, seq, vocab]` logits:
/// `w[j] = max over unmasked tokens of ln(1 + relu(logit[j]))`, keeping `w > 0`.
pub fn splade(logits: &ArrayD<f32>, attention_mask: &Array2<i64>) -> Result<Vec<SparseEmbedding>> {
    let logits = logits
        .view()
        .into_dimensionality::<Ix3>()
        .map_err(|_| {
            EngineError::inference(format!(
                "expected [batch, seq, vocab] logits, got {:?}",
                logits.shape()
            ))
        })?;
    let (batch, seq_len, vocab) = logits.dim();
    if attention_mask.dim() != (batch, seq_len) {
        return Err(EngineError::inference(format!(
            "attention mask {:?} does not match logits {:?}",
            attention_mask.dim(),
            logits.dim()
        )));
    }

    let mut out = Vec::with_capacity(batch);
    for (tokens, mask) in logits.outer_iter().zip(attention_mask.outer_iter()) {
        let mut weights = vec![0.0f32; vocab];
        for (token, &m) in tokens.outer_iter().zip(mask.iter()) {
            if m <= 0 {
                continue;
            }
            for (w, &x) in weights.iter_mut().zip(token.iter()) {
                let activated = x.max(0.0).ln_1p();
                if activated > *w {
                    *w = activated;
                }
            }
        }

        let mut indices = Vec::new();
        let mut values = Vec::new();
        for (j, w) in weights.into_iter().enumerate() {
            if w > 0.0 {
                indices.push(j);
                values.push(w);
            }
        }
        out.push(SparseEmbedding { indices, values });
    }
    Ok(out)
}
