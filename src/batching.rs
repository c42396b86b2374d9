//! Splits a call's items into contiguous chunks and stitches results back in
//! input order.

use tracing::debug;

use crate::error::{EngineError, Result};
use crate::registry::ModelFamily;

pub fn default_batch_size(family: ModelFamily) -> usize {
    match family {
        ModelFamily::TextEmbedding | ModelFamily::SparseTextEmbedding => 256,
        ModelFamily::ImageEmbedding => 32,
        ModelFamily::Rerank => 64,
    }
}

/// `None` and `Some(0)` fall back to `default`.
pub fn effective_batch_size(requested: Option<usize>, default: usize) -> usize {
    match requested {
        Some(n) if n > 0 => n,
        _ => default.max(1),
    }
}

/// For boundaries that carry signed sizes: negative is an error, zero is "default".
pub fn batch_size_from_signed(n: i64) -> Result<Option<usize>> {
    match n {
        n if n < 0 => Err(EngineError::invalid_argument(format!(
            "batch size must not be negative, got {n}"
        ))),
        0 => Ok(None),
        n => usize::try_from(n)
            .map(Some)
            .map_err(|_| EngineError::invalid_argument(format!("batch size {n} too large"))),
    }
}

/// Run `f` over consecutive chunks of at most `batch_size` items, sequentially.
///
/// `f` receives the chunk's offset into `items` so per-item errors can be
/// reported with global indices. Every chunk must yield exactly one result per
/// item. Empty input returns without calling `f`.
pub fn run_batched<I, T, F>(items: &[I], batch_size: usize, mut f: F) -> Result<Vec<T>>
where
    F: FnMut(usize, &[I]) -> Result<Vec<T>>,
{
    let batch_size = batch_size.max(1);
    let mut out = Vec::with_capacity(items.len());
    for (chunk_no, chunk) in items.chunks(batch_size).enumerate() {
        let offset = chunk_no * batch_size;
        debug!(offset, size = chunk.len(), "Running batch");
        let results = f(offset, chunk).map_err(|e| e.offset_index(offset))?;
        if results.len() != chunk.len() {
            return Err(EngineError::inference(format!(
                "batch at offset {offset} returned {} results for {} inputs",
                results.len(),
                chunk.len()
            )));
        }
        out.extend(results);
    }
    Ok(out)
}
