use ndarray::ArrayD;
use serde::Serialize;
use std::cmp::Ordering;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RerankResult {
    /// Position of the document in the caller's input.
    pub index: usize,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
}

/// One relevance logit per pair. Accepts `[batch]`, `[batch, 1]` and
/// `[batch, n]` (first column).
pub fn scores(output: &ArrayD<f32>) -> Result<Vec<f32>> {
    match output.shape() {
        [_] => Ok(output.iter().copied().collect()),
        [_, n] if *n >= 1 => Ok(output
            .outer_iter()
            .filter_map(|row| row.iter().next().copied())
            .collect()),
        shape => Err(EngineError::inference(format!(
            "expected [batch] or [batch, n] rerank logits, got {shape:?}"
        ))),
    }
}

/// Sort by score descending. Equal scores keep input order; NaN goes last.
pub fn rank<S: AsRef<str>>(
    scores: Vec<f32>,
    documents: &[S],
    return_documents: bool,
) -> Vec<RerankResult> {
    let mut order: Vec<(usize, f32)> = scores.into_iter().enumerate().collect();
    order.sort_by(|a, b| descending(a.1, b.1));
    order
        .into_iter()
        .map(|(index, score)| RerankResult {
            index,
            score,
            document: return_documents
                .then(|| documents.get(index).map(|d| d.as_ref().to_string()))
                .flatten(),
        })
        .collect()
}

fn descending(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}
