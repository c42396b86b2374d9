use ndarray::{Array1, Array2, ArrayD, ArrayView2, Axis, Ix2, Ix3};

use crate::error::{EngineError, Result};
use crate::registry::Pooling;

/// Pool a text model output into one vector per batch row.
///
/// Rank-2 outputs `[batch, dim]` are already pooled. Rank-3 outputs
/// `[batch, seq, dim]` are reduced with `pooling`; mean pooling weights tokens
/// by `attention_mask`.
pub fn pool(
    hidden: &ArrayD<f32>,
    attention_mask: &Array2<i64>,
    pooling: Pooling,
) -> Result<Vec<Vec<f32>>> {
    match hidden.ndim() {
        2 => Ok(rows(hidden.view().into_dimensionality::<Ix2>().map_err(shape_err)?)),
        3 => {
            let hidden = hidden.view().into_dimensionality::<Ix3>().map_err(shape_err)?;
            let (batch, seq_len, dim) = hidden.dim();
            if attention_mask.dim() != (batch, seq_len) {
                return Err(EngineError::inference(format!(
                    "attention mask {:?} does not match hidden state {:?}",
                    attention_mask.dim(),
                    hidden.dim()
                )));
            }
            let mut out = Vec::with_capacity(batch);
            for (row, mask) in hidden.outer_iter().zip(attention_mask.outer_iter()) {
                let pooled = match pooling {
                    _ if seq_len == 0 => Array1::zeros(dim),
                    Pooling::Cls => row.index_axis(Axis(0), 0).to_owned(),
                    Pooling::Mean => mean_pooling(row, mask.iter().copied()),
                };
                out.push(pooled.to_vec());
            }
            Ok(out)
        }
        n => Err(EngineError::inference(format!(
            "expected rank 2 or 3 text output, got rank {n} {:?}",
            hidden.shape()
        ))),
    }
}

/// Image model outputs: `[batch, dim]` as is, `[batch, tokens, dim]` takes the
/// class token, `[batch, c, h, w]` (CNN feature maps) is flattened per item.
pub fn image_vectors(output: &ArrayD<f32>) -> Result<Vec<Vec<f32>>> {
    match output.ndim() {
        2 => Ok(rows(output.view().into_dimensionality::<Ix2>().map_err(shape_err)?)),
        3 => {
            let output = output.view().into_dimensionality::<Ix3>().map_err(shape_err)?;
            if output.dim().1 == 0 {
                return Err(EngineError::inference("image output has no tokens"));
            }
            Ok(output
                .outer_iter()
                .map(|item| item.index_axis(Axis(0), 0).to_vec())
                .collect())
        }
        4 => Ok(output
            .outer_iter()
            .map(|item| item.iter().copied().collect())
            .collect()),
        n => Err(EngineError::inference(format!(
            "expected rank 2-4 image output, got rank {n} {:?}",
            output.shape()
        ))),
    }
}

fn rows(view: ArrayView2<'_, f32>) -> Vec<Vec<f32>> {
    view.outer_iter().map(|r| r.to_vec()).collect()
}

fn shape_err(e: ndarray::ShapeError) -> EngineError {
    EngineError::inference(format!("unexpected output shape: {e}"))
}

/// Masked average of token vectors `[seq, dim]`.
fn mean_pooling(tokens: ArrayView2<'_, f32>, mask: impl Iterator<Item = i64>) -> Array1<f32> {
    let mut sum = Array1::zeros(tokens.ncols());
    let mut mask_sum = 0.0f32;

    for (token_vec, mask_val) in tokens.outer_iter().zip(mask) {
        if mask_val > 0 {
            let w = mask_val as f32;
            sum.scaled_add(w, &token_vec);
            mask_sum += w;
        }
    }

    // Avoid division by zero
    if mask_sum > 0.0 {
        sum /= mask_sum;
    }
    sum
}

/// L2 normalize a vector in place.
pub fn l2_normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        vec.iter_mut().for_each(|x| *x /= norm);
    }
}
