use ndarray::Array2;
use serde_json::Value;
use std::{fs, path::Path};
use tokenizers::{
    AddedToken, EncodeInput, Encoding, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams,
};
use tracing::debug;

use crate::error::{EngineError, Result};

/// Model-ready token tensors, `[batch, seq]` each, padded to the longest row
/// of this batch only.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBatch {
    pub input_ids: Array2<i64>,
    pub attention_mask: Array2<i64>,
    pub token_type_ids: Array2<i64>,
}

impl TextBatch {
    pub fn len(&self) -> usize {
        self.input_ids.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn seq_len(&self) -> usize {
        self.input_ids.ncols()
    }
}

pub struct TextPreprocessor {
    tokenizer: Tokenizer,
    max_length: usize,
}

impl TextPreprocessor {
    /// Load `tokenizer.json` and the optional side configs from a model directory.
    pub fn from_dir(dir: &Path, max_length: usize) -> Result<Self> {
        let tokenizer_path = dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EngineError::corrupt(&tokenizer_path, e))?;

        let config = read_optional_json(&dir.join("config.json"))?;
        let tokenizer_config = read_optional_json(&dir.join("tokenizer_config.json"))?;
        let special_tokens = read_optional_json(&dir.join("special_tokens_map.json"))?;

        // Some configs carry model_max_length = 1e30; `as usize` saturates.
        let model_max_length = tokenizer_config
            .get("model_max_length")
            .and_then(Value::as_f64)
            .map(|v| v as usize)
            .unwrap_or(max_length);
        let pad_id = config
            .get("pad_token_id")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;
        let pad_token = tokenizer_config
            .get("pad_token")
            .and_then(token_content)
            .unwrap_or("[PAD]")
            .to_string();

        let mut pre = Self::with_tokenizer(
            tokenizer,
            max_length.min(model_max_length).max(1),
            pad_id,
            pad_token,
        )?;
        pre.add_special_tokens(&special_tokens);
        debug!(
            dir = %dir.display(),
            max_length = pre.max_length,
            pad_id,
            "Loaded tokenizer"
        );
        Ok(pre)
    }

    pub fn with_tokenizer(
        mut tokenizer: Tokenizer,
        max_length: usize,
        pad_id: u32,
        pad_token: String,
    ) -> Result<Self> {
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            pad_id,
            pad_token,
            ..Default::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| EngineError::unsupported(format!("invalid truncation settings: {e}")))?;
        Ok(Self {
            tokenizer,
            max_length,
        })
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn prepare<S: AsRef<str>>(&self, texts: &[S]) -> Result<TextBatch> {
        let inputs: Vec<(&str, Option<&str>)> = texts.iter().map(|t| (t.as_ref(), None)).collect();
        self.encode(&inputs)
    }

    /// Encode `(query, document)` pairs for a cross-encoder.
    pub fn prepare_pairs<S: AsRef<str>>(&self, query: &str, documents: &[S]) -> Result<TextBatch> {
        let inputs: Vec<(&str, Option<&str>)> = documents
            .iter()
            .map(|d| (query, Some(d.as_ref())))
            .collect();
        self.encode(&inputs)
    }

    fn encode(&self, inputs: &[(&str, Option<&str>)]) -> Result<TextBatch> {
        let batch: Vec<EncodeInput> = inputs.iter().map(|&i| encode_input(i)).collect();
        match self.tokenizer.encode_batch(batch, true) {
            Ok(encodings) => to_batch(&encodings),
            Err(batch_err) => Err(self.locate_failure(inputs, batch_err.to_string())),
        }
    }

    /// Re-encode one by one to report which input broke the batch.
    fn locate_failure(&self, inputs: &[(&str, Option<&str>)], batch_reason: String) -> EngineError {
        for (index, &input) in inputs.iter().enumerate() {
            if let Err(e) = self.tokenizer.encode(encode_input(input), true) {
                return EngineError::Tokenization {
                    index: Some(index),
                    reason: e.to_string(),
                };
            }
        }
        EngineError::Tokenization {
            index: None,
            reason: batch_reason,
        }
    }

    fn add_special_tokens(&mut self, map: &Value) {
        let Value::Object(entries) = map else {
            return;
        };
        let mut tokens = Vec::new();
        for value in entries.values() {
            match value {
                Value::String(content) => tokens.push(AddedToken::from(content.clone(), true)),
                Value::Object(obj) => {
                    let Some(content) = obj.get("content").and_then(Value::as_str) else {
                        continue;
                    };
                    let flag = |k: &str, default: bool| {
                        obj.get(k).and_then(Value::as_bool).unwrap_or(default)
                    };
                    tokens.push(
                        AddedToken::from(content.to_string(), true)
                            .single_word(flag("single_word", false))
                            .lstrip(flag("lstrip", false))
                            .rstrip(flag("rstrip", false))
                            .normalized(flag("normalized", false)),
                    );
                }
                // additional_special_tokens lists are already in tokenizer.json
                _ => {}
            }
        }
        if !tokens.is_empty() {
            self.tokenizer.add_special_tokens(&tokens);
        }
    }
}

fn encode_input<'s>((first, second): (&'s str, Option<&'s str>)) -> EncodeInput<'s> {
    match second {
        Some(second) => (first, second).into(),
        None => first.into(),
    }
}

fn token_content(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Object(obj) => obj.get("content").and_then(Value::as_str),
        _ => None,
    }
}

fn read_optional_json(path: &Path) -> Result<Value> {
    match fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text).map_err(|e| EngineError::corrupt(path, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Value::Null),
        Err(e) => Err(EngineError::corrupt(path, e)),
    }
}

fn to_batch(encodings: &[Encoding]) -> Result<TextBatch> {
    let rows = encodings.len();
    let cols = encodings.first().map(Encoding::len).unwrap_or(0);

    let mut ids = Vec::with_capacity(rows * cols);
    let mut mask = Vec::with_capacity(rows * cols);
    let mut type_ids = Vec::with_capacity(rows * cols);
    for enc in encodings {
        if enc.len() != cols {
            return Err(EngineError::Tokenization {
                index: None,
                reason: format!("ragged batch: expected {cols} tokens, got {}", enc.len()),
            });
        }
        ids.extend(enc.get_ids().iter().map(|&x| x as i64));
        mask.extend(enc.get_attention_mask().iter().map(|&x| x as i64));
        type_ids.extend(enc.get_type_ids().iter().map(|&x| x as i64));
    }

    let shape = (rows, cols);
    let err =
        |e: ndarray::ShapeError| EngineError::inference(format!("bad token tensor shape: {e}"));
    Ok(TextBatch {
        input_ids: Array2::from_shape_vec(shape, ids).map_err(err)?,
        attention_mask: Array2::from_shape_vec(shape, mask).map_err(err)?,
        token_type_ids: Array2::from_shape_vec(shape, type_ids).map_err(err)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn word_level(vocab: &[&str], unk: &str) -> String {
        let vocab: serde_json::Map<String, Value> = vocab
            .iter()
            .enumerate()
            .map(|(i, w)| (w.to_string(), Value::from(i as u64)))
            .collect();
        serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [],
            "normalizer": null,
            "pre_tokenizer": {"type": "Whitespace"},
            "post_processor": null,
            "decoder": null,
            "model": {"type": "WordLevel", "vocab": vocab, "unk_token": unk}
        })
        .to_string()
    }

    fn model_dir(tokenizer_json: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("tokenizer.json"), tokenizer_json).unwrap();
        dir
    }

    const VOCAB: &[&str] = &["[PAD]", "[UNK]", "hello", "world", "what", "is", "a", "panda"];

    #[test]
    fn pads_to_longest_in_batch() {
        let dir = model_dir(&word_level(VOCAB, "[UNK]"));
        let pre = TextPreprocessor::from_dir(dir.path(), 512).unwrap();

        let batch = pre.prepare(&["hello world", "panda"]).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.seq_len(), 2);
        assert_eq!(batch.input_ids.row(0).to_vec(), vec![2, 3]);
        assert_eq!(batch.input_ids.row(1).to_vec(), vec![7, 0]);
        assert_eq!(batch.attention_mask.row(1).to_vec(), vec![1, 0]);

        // Padding never goes past this batch's longest row.
        let single = pre.prepare(&["panda"]).unwrap();
        assert_eq!(single.seq_len(), 1);
    }

    #[test]
    fn truncates_to_effective_max_length() {
        let dir = model_dir(&word_level(VOCAB, "[UNK]"));
        fs::write(
            dir.path().join("tokenizer_config.json"),
            r#"{"model_max_length": 3, "pad_token": {"content": "[PAD]"}}"#,
        )
        .unwrap();
        let pre = TextPreprocessor::from_dir(dir.path(), 512).unwrap();
        assert_eq!(pre.max_length(), 3);

        let batch = pre.prepare(&["what is a panda hello"]).unwrap();
        assert_eq!(batch.seq_len(), 3);
    }

    #[test]
    fn unknown_words_map_to_unk() {
        let dir = model_dir(&word_level(VOCAB, "[UNK]"));
        let pre = TextPreprocessor::from_dir(dir.path(), 16).unwrap();
        let batch = pre.prepare(&["hello zebra"]).unwrap();
        assert_eq!(batch.input_ids.row(0).to_vec(), vec![2, 1]);
    }

    #[test]
    fn pairs_set_segment_ids() {
        let dir = model_dir(&word_level(VOCAB, "[UNK]"));
        let pre = TextPreprocessor::from_dir(dir.path(), 16).unwrap();
        let batch = pre.prepare_pairs("what is a panda", &["hello world"]).unwrap();
        assert_eq!(batch.seq_len(), 6);
        assert_eq!(batch.token_type_ids.row(0).to_vec(), vec![0, 0, 0, 0, 1, 1]);
    }

    #[test]
    fn failing_item_index_is_reported() {
        // No [UNK] in the vocabulary, so unknown words fail to encode.
        let dir = model_dir(&word_level(&["[PAD]", "hello", "world"], "[UNK]"));
        let pre = TextPreprocessor::from_dir(dir.path(), 16).unwrap();
        let err = pre.prepare(&["hello", "world", "zebra"]).unwrap_err();
        assert!(matches!(err, EngineError::Tokenization { index: Some(2), .. }));
    }

    #[test]
    fn broken_tokenizer_json_is_corrupt() {
        let dir = model_dir("{not json");
        let err = TextPreprocessor::from_dir(dir.path(), 16).err().unwrap();
        assert!(matches!(err, EngineError::CorruptArtifact { .. }));
    }

    #[test]
    fn broken_side_config_is_corrupt() {
        let dir = model_dir(&word_level(VOCAB, "[UNK]"));
        fs::write(dir.path().join("config.json"), "{").unwrap();
        let err = TextPreprocessor::from_dir(dir.path(), 16).err().unwrap();
        assert!(matches!(err, EngineError::CorruptArtifact { .. }));
    }
}
