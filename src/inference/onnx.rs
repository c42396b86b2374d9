//! ONNX Runtime backend using the ort crate

use ndarray::{ArrayD, IxDyn};
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::session::{builder::GraphOptimizationLevel, Session, SessionInputValue, SessionInputs};
use ort::value::Tensor;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{BackendFactory, InferenceBackend, TensorBatch};
use crate::config::ExecutionBackend;
use crate::error::{EngineError, Result};
use crate::registry::{ModelFamily, ModelSpec};

/// Builds CPU sessions unless an accelerator was explicitly configured.
#[derive(Debug, Clone)]
pub struct OnnxBackendFactory {
    execution: ExecutionBackend,
    intra_threads: usize,
}

impl OnnxBackendFactory {
    pub fn new(execution: ExecutionBackend, intra_threads: usize) -> Self {
        Self {
            execution,
            intra_threads: intra_threads.max(1),
        }
    }
}

impl BackendFactory for OnnxBackendFactory {
    fn create(&self, spec: &ModelSpec, model_dir: &Path) -> Result<Box<dyn InferenceBackend>> {
        let model_path = find_model_file(model_dir, spec.model_file)?;
        info!(
            code = spec.code,
            path = %model_path.display(),
            backend = ?self.execution,
            "Loading ONNX model"
        );

        let session = Session::builder()
            .map_err(|e| EngineError::inference(format!("Failed to create session builder: {e}")))?
            .with_execution_providers(execution_providers(self.execution))
            .map_err(|e| {
                EngineError::inference(format!("Failed to register execution provider: {e}"))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| EngineError::inference(format!("Failed to set optimization level: {e}")))?
            .with_intra_threads(self.intra_threads)
            .map_err(|e| EngineError::inference(format!("Failed to set thread count: {e}")))?
            .commit_from_file(&model_path)
            .map_err(|e| {
                EngineError::corrupt(&model_path, format!("ONNX Runtime rejected the model: {e}"))
            })?;

        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        let inputs = ModelInputs::resolve(spec.family, &input_names)?;
        let output = select_output(spec.family, &output_names)?;
        debug!(inputs = ?input_names, output = %output, "ONNX model IO resolved");

        Ok(Box::new(OnnxBackend {
            session,
            inputs,
            output,
        }))
    }
}

fn execution_providers(backend: ExecutionBackend) -> Vec<ExecutionProviderDispatch> {
    let cpu = CPUExecutionProvider::default().build();
    match backend {
        ExecutionBackend::Cpu => vec![cpu],
        ExecutionBackend::Cuda => {
            #[cfg(feature = "cuda")]
            {
                info!("Using CUDA execution provider");
                vec![
                    ort::execution_providers::CUDAExecutionProvider::default().build(),
                    cpu,
                ]
            }
            #[cfg(not(feature = "cuda"))]
            {
                warn!("CUDA requested but built without the `cuda` feature, using CPU");
                vec![cpu]
            }
        }
        ExecutionBackend::CoreMl => {
            #[cfg(feature = "coreml")]
            {
                info!("Using CoreML execution provider");
                vec![
                    ort::execution_providers::CoreMLExecutionProvider::default().build(),
                    cpu,
                ]
            }
            #[cfg(not(feature = "coreml"))]
            {
                warn!("CoreML requested but built without the `coreml` feature, using CPU");
                vec![cpu]
            }
        }
    }
}

/// Resolve the graph file. Falls back to common quantized siblings when the
/// catalog file is absent.
fn find_model_file(dir: &Path, model_file: &str) -> Result<PathBuf> {
    let primary = dir.join(model_file);
    if primary.extension().and_then(|e| e.to_str()) != Some("onnx") {
        return Err(EngineError::unsupported(format!(
            "expected an .onnx graph, got {model_file}"
        )));
    }
    if primary.is_file() {
        return Ok(primary);
    }

    let parent = primary.parent().unwrap_or(dir);
    let candidates = ["model_fp16.onnx", "model_quantized.onnx", "model.onnx"];
    for name in &candidates {
        let path = parent.join(name);
        if path.is_file() {
            return Ok(path);
        }
    }

    Err(EngineError::corrupt(
        dir,
        format!("no ONNX model file found, looked for {model_file} and {candidates:?}"),
    ))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ModelInputs {
    Text {
        input_ids: String,
        attention_mask: Option<String>,
        token_type_ids: Option<String>,
    },
    Pixels {
        pixel_values: String,
    },
}

impl ModelInputs {
    fn resolve(family: ModelFamily, names: &[String]) -> Result<Self> {
        let find = |needle: &str| {
            names
                .iter()
                .find(|n| n.to_ascii_lowercase().contains(needle))
                .cloned()
        };

        if family.is_textual() {
            let input_ids = find("input_ids").ok_or_else(|| {
                EngineError::unsupported(format!(
                    "{family} model has no input_ids input (inputs: {names:?})"
                ))
            })?;
            return Ok(ModelInputs::Text {
                input_ids,
                attention_mask: find("attention_mask"),
                token_type_ids: find("token_type"),
            });
        }

        let pixel_values = match find("pixel_values") {
            Some(name) => name,
            None if names.len() == 1 => names[0].clone(),
            None => {
                return Err(EngineError::unsupported(format!(
                    "image model has no pixel_values input (inputs: {names:?})"
                )))
            }
        };
        Ok(ModelInputs::Pixels { pixel_values })
    }
}

fn output_preferences(family: ModelFamily) -> &'static [&'static str] {
    match family {
        ModelFamily::TextEmbedding => {
            &["last_hidden_state", "token_embeddings", "sentence_embedding"]
        }
        ModelFamily::SparseTextEmbedding => &["logits", "output"],
        ModelFamily::ImageEmbedding => &["image_embeds", "pooler_output", "last_hidden_state"],
        ModelFamily::Rerank => &["logits"],
    }
}

fn select_output(family: ModelFamily, names: &[String]) -> Result<String> {
    output_preferences(family)
        .iter()
        .find_map(|want| names.iter().find(|n| n.as_str() == *want))
        .or_else(|| names.first())
        .cloned()
        .ok_or_else(|| EngineError::unsupported("model declares no outputs"))
}

pub struct OnnxBackend {
    session: Session,
    inputs: ModelInputs,
    output: String,
}

impl InferenceBackend for OnnxBackend {
    fn run(&mut self, batch: &TensorBatch) -> Result<ArrayD<f32>> {
        let feeds = self.feeds(batch)?;
        let outputs = self
            .session
            .run(feeds)
            .map_err(|e| EngineError::inference(format!("ONNX inference failed: {e}")))?;

        let value = outputs
            .get(self.output.as_str())
            .ok_or_else(|| EngineError::inference(format!("output {} missing", self.output)))?;
        let (shape, data) = value
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::inference(format!("Failed to extract output tensor: {e}")))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())
            .map_err(|e| EngineError::inference(format!("output shape {dims:?}: {e}")))
    }
}

impl OnnxBackend {
    fn feeds(&self, batch: &TensorBatch) -> Result<SessionInputs<'static, 'static>> {
        let mut feeds: Vec<(Cow<'static, str>, SessionInputValue<'static>)> = Vec::new();
        match (&self.inputs, batch) {
            (
                ModelInputs::Text {
                    input_ids,
                    attention_mask,
                    token_type_ids,
                },
                TensorBatch::Text(text),
            ) => {
                let shape = [text.len(), text.seq_len()];
                feeds.push((Cow::Owned(input_ids.clone()), i64_tensor(shape, &text.input_ids)?));
                if let Some(name) = attention_mask {
                    let tensor = i64_tensor(shape, &text.attention_mask)?;
                    feeds.push((Cow::Owned(name.clone()), tensor));
                }
                if let Some(name) = token_type_ids {
                    let tensor = i64_tensor(shape, &text.token_type_ids)?;
                    feeds.push((Cow::Owned(name.clone()), tensor));
                }
            }
            (ModelInputs::Pixels { pixel_values }, TensorBatch::Pixels(pixels)) => {
                let s = pixels.shape();
                let shape = [s[0], s[1], s[2], s[3]];
                let data: Vec<f32> = pixels.iter().copied().collect();
                let tensor = Tensor::from_array((shape, data)).map_err(|e| {
                    EngineError::inference(format!("Failed to create pixel tensor: {e}"))
                })?;
                feeds.push((Cow::Owned(pixel_values.clone()), tensor.into()));
            }
            _ => {
                return Err(EngineError::invalid_argument(
                    "batch kind does not match the model's inputs",
                ))
            }
        }
        Ok(feeds.into())
    }
}

fn i64_tensor(
    shape: [usize; 2],
    values: &ndarray::Array2<i64>,
) -> Result<SessionInputValue<'static>> {
    let data: Vec<i64> = values.iter().copied().collect();
    Tensor::from_array((shape, data))
        .map(Into::into)
        .map_err(|e| EngineError::inference(format!("Failed to create input tensor: {e}")))
}
