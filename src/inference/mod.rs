//! Execution seam between preprocessing and result encoding.

pub mod onnx;

use ndarray::{Array4, ArrayD};
use std::path::Path;

use crate::error::Result;
use crate::preprocess::TextBatch;
use crate::registry::ModelSpec;

pub use onnx::{OnnxBackend, OnnxBackendFactory};

#[derive(Debug, Clone, PartialEq)]
pub enum TensorBatch {
    Text(TextBatch),
    /// `[batch, 3, height, width]`
    Pixels(Array4<f32>),
}

impl TensorBatch {
    pub fn len(&self) -> usize {
        match self {
            TensorBatch::Text(t) => t.len(),
            TensorBatch::Pixels(p) => p.shape()[0],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One loaded model graph. Implementations keep no state between calls that
/// affects results.
pub trait InferenceBackend: Send {
    /// Run one batch and return the selected output tensor. The first axis of
    /// the result is the batch axis.
    fn run(&mut self, batch: &TensorBatch) -> Result<ArrayD<f32>>;
}

/// Builds backends for artifacts already present on disk.
pub trait BackendFactory: Send + Sync {
    fn create(&self, spec: &ModelSpec, model_dir: &Path) -> Result<Box<dyn InferenceBackend>>;
}
