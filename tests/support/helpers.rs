//! Test helper functions for integration tests
//!
//! Fake inference backends plus procedural helpers for building mirror
//! directories and image files.

use embedding_engine::error::{EngineError, Result};
use embedding_engine::inference::{BackendFactory, InferenceBackend, TensorBatch};
use embedding_engine::preprocess::TextBatch;
use embedding_engine::registry::{self, ModelFamily, ModelSpec};
use ndarray::{Array2, Array3, Array4, ArrayD, Axis};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Word-level vocabulary shared by every textual test model.
pub const VOCAB: &[&str] = &[
    "[PAD]", "[UNK]", "what", "is", "a", "panda", "?", "hi", "The", "giant", "bear", "species",
    "endemic", "to", "China", ".", "hello", "world", "rust", "fast", "the", "cat", "sat",
    "on", "mat", "dog", "eats", "bamboo",
];

const UNK_ID: i64 = 1;

pub fn word_level_tokenizer() -> String {
    let vocab: Map<String, Value> = VOCAB
        .iter()
        .enumerate()
        .map(|(i, w)| (w.to_string(), Value::from(i as u64)))
        .collect();
    json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {"type": "WordLevel", "vocab": vocab, "unk_token": "[UNK]"}
    })
    .to_string()
}

/// Lay out `spec`'s artifact the way the mirror source expects:
/// `<mirror>/<repo>/<file>`. The ONNX graph is a placeholder since the fake
/// backends never open it.
pub fn write_mirror_model(mirror: &Path, spec: &ModelSpec) {
    let repo_dir = mirror.join(spec.repo);
    for file in spec.artifact_files().iter().filter(|f| f.required) {
        let path = repo_dir.join(file.path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let contents = if file.path == "tokenizer.json" {
            word_level_tokenizer().into_bytes()
        } else {
            format!("placeholder for {}", spec.code).into_bytes()
        };
        fs::write(&path, contents).unwrap();
    }
    if spec.family.is_textual() {
        fs::write(repo_dir.join("config.json"), r#"{"pad_token_id": 0}"#).unwrap();
    }
}

/// Mirror every catalog model.
pub fn write_full_mirror(mirror: &Path) {
    for family in ModelFamily::ALL {
        for descriptor in registry::list_models(family) {
            let spec = registry::resolve(family, Some(&descriptor.code)).unwrap();
            write_mirror_model(mirror, spec);
        }
    }
}

pub fn write_png(path: &Path, width: u32, height: u32, rgb: [u8; 3]) {
    image::RgbImage::from_pixel(width, height, image::Rgb(rgb))
        .save(path)
        .unwrap();
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

pub fn assert_close(a: &[f32], b: &[f32]) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        assert!((x - y).abs() < 1e-5, "{x} != {y}");
    }
}

/// Builds [`FakeBackend`]s and records the size of every batch they run.
#[derive(Clone, Default)]
pub struct FakeBackends {
    pub batches: Arc<Mutex<Vec<usize>>>,
    pub panic_on_run: bool,
    pub on_drop: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl FakeBackends {
    pub fn panicking() -> Self {
        Self {
            panic_on_run: true,
            ..Self::default()
        }
    }

    /// Run `hook` whenever one of the built backends is dropped.
    pub fn with_drop_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_drop = Some(Arc::new(hook));
        self
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

impl BackendFactory for FakeBackends {
    fn create(&self, spec: &ModelSpec, _model_dir: &Path) -> Result<Box<dyn InferenceBackend>> {
        Ok(Box::new(FakeBackend {
            family: spec.family,
            dimension: spec.dimension.unwrap_or(1),
            batches: self.batches.clone(),
            panic_on_run: self.panic_on_run,
            on_drop: self.on_drop.clone(),
        }))
    }
}

/// Deterministic stand-in for an ONNX session. Outputs depend only on each
/// item's own tokens or pixels, never on the rest of the batch.
pub struct FakeBackend {
    family: ModelFamily,
    dimension: usize,
    batches: Arc<Mutex<Vec<usize>>>,
    panic_on_run: bool,
    on_drop: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        if let Some(hook) = &self.on_drop {
            hook();
        }
    }
}

impl InferenceBackend for FakeBackend {
    fn run(&mut self, batch: &TensorBatch) -> Result<ArrayD<f32>> {
        self.batches.lock().unwrap().push(batch.len());
        if self.panic_on_run {
            panic!("fake backend exploded");
        }
        match (self.family, batch) {
            (ModelFamily::TextEmbedding, TensorBatch::Text(t)) => {
                Ok(hidden_states(t, self.dimension))
            }
            (ModelFamily::SparseTextEmbedding, TensorBatch::Text(t)) => {
                Ok(splade_logits(t, self.dimension))
            }
            (ModelFamily::Rerank, TensorBatch::Text(t)) => Ok(overlap_scores(t)),
            (ModelFamily::ImageEmbedding, TensorBatch::Pixels(p)) => {
                Ok(pixel_features(p, self.dimension))
            }
            _ => Err(EngineError::inference("fake backend got the wrong input kind")),
        }
    }
}

/// `[batch, seq, dim]`, each position a function of its token id.
fn hidden_states(batch: &TextBatch, dim: usize) -> ArrayD<f32> {
    let (b, s) = batch.input_ids.dim();
    Array3::from_shape_fn((b, s, dim), |(i, t, j)| {
        let id = batch.input_ids[[i, t]] as usize;
        ((id * 31 + j * 7) % 13) as f32 + 1.0
    })
    .into_dyn()
}

/// `[batch, seq, vocab]` with a positive logit only at each token's own id.
fn splade_logits(batch: &TextBatch, vocab: usize) -> ArrayD<f32> {
    let (b, s) = batch.input_ids.dim();
    Array3::from_shape_fn((b, s, vocab), |(i, t, j)| {
        if batch.input_ids[[i, t]] as usize == j {
            2.0
        } else {
            -1.0
        }
    })
    .into_dyn()
}

/// `[batch, 1]`: how many document tokens also occur in the query.
fn overlap_scores(batch: &TextBatch) -> ArrayD<f32> {
    let b = batch.len();
    let mut scores = Array2::<f32>::zeros((b, 1));
    for i in 0..b {
        let ids = batch.input_ids.row(i);
        let mask = batch.attention_mask.row(i);
        let types = batch.token_type_ids.row(i);
        let live = |t: usize| mask[t] == 1 && ids[t] != UNK_ID;

        let query: HashSet<i64> = (0..ids.len())
            .filter(|&t| live(t) && types[t] == 0)
            .map(|t| ids[t])
            .collect();
        let hits = (0..ids.len())
            .filter(|&t| live(t) && types[t] == 1 && query.contains(&ids[t]))
            .count();
        scores[[i, 0]] = hits as f32;
    }
    scores.into_dyn()
}

/// `[batch, dim]` from per-channel pixel means.
fn pixel_features(pixels: &Array4<f32>, dim: usize) -> ArrayD<f32> {
    let b = pixels.shape()[0];
    let mut out = Array2::<f32>::zeros((b, dim));
    for (i, image) in pixels.axis_iter(Axis(0)).enumerate() {
        let means: Vec<f32> = image
            .axis_iter(Axis(0))
            .map(|channel| channel.mean().unwrap_or(0.0))
            .collect();
        for j in 0..dim {
            out[[i, j]] = means[j % 3] + j as f32 * 0.001;
        }
    }
    out.into_dyn()
}
