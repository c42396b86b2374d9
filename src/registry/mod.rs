//! Static model catalog.
//!
//! Everything here is compile-time data: listing and resolving models never
//! touches the filesystem or the network, so both are safe to call before any
//! model has been loaded.

mod catalog;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    TextEmbedding,
    SparseTextEmbedding,
    ImageEmbedding,
    Rerank,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 4] = [
        ModelFamily::TextEmbedding,
        ModelFamily::SparseTextEmbedding,
        ModelFamily::ImageEmbedding,
        ModelFamily::Rerank,
    ];

    /// Short name used for cache directories, metric labels and the CLI.
    pub fn slug(self) -> &'static str {
        match self {
            ModelFamily::TextEmbedding => "text",
            ModelFamily::SparseTextEmbedding => "sparse",
            ModelFamily::ImageEmbedding => "image",
            ModelFamily::Rerank => "rerank",
        }
    }

    pub fn default_code(self) -> &'static str {
        match self {
            ModelFamily::TextEmbedding => "BAAI/bge-small-en-v1.5",
            ModelFamily::SparseTextEmbedding => "Qdrant/Splade_PP_en_v1",
            ModelFamily::ImageEmbedding => "Qdrant/clip-ViT-B-32-vision",
            ModelFamily::Rerank => "BAAI/bge-reranker-base",
        }
    }

    /// Whether inputs go through the tokenizer (as opposed to image files).
    pub fn is_textual(self) -> bool {
        !matches!(self, ModelFamily::ImageEmbedding)
    }

    fn specs(self) -> &'static [ModelSpec] {
        match self {
            ModelFamily::TextEmbedding => catalog::TEXT_MODELS,
            ModelFamily::SparseTextEmbedding => catalog::SPARSE_MODELS,
            ModelFamily::ImageEmbedding => catalog::IMAGE_MODELS,
            ModelFamily::Rerank => catalog::RERANK_MODELS,
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelFamily::TextEmbedding => "text embedding",
            ModelFamily::SparseTextEmbedding => "sparse text embedding",
            ModelFamily::ImageEmbedding => "image embedding",
            ModelFamily::Rerank => "rerank",
        };
        f.write_str(name)
    }
}

impl FromStr for ModelFamily {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "text" | "text_embedding" | "dense" => Ok(ModelFamily::TextEmbedding),
            "sparse" | "sparse_text_embedding" => Ok(ModelFamily::SparseTextEmbedding),
            "image" | "image_embedding" => Ok(ModelFamily::ImageEmbedding),
            "rerank" | "reranker" | "text_rerank" => Ok(ModelFamily::Rerank),
            other => Err(EngineError::invalid_argument(format!(
                "unknown model family '{other}' (expected text, sparse, image or rerank)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
    /// First token of the last hidden state.
    Cls,
    /// Attention-masked mean over the sequence.
    Mean,
}

/// Public catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelDescriptor {
    pub code: String,
    pub description: String,
    /// `None` for reranking models. For sparse models this is the vocabulary size.
    pub dimension: Option<usize>,
}

/// Everything the loader needs to fetch and run one catalog model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub family: ModelFamily,
    pub code: &'static str,
    pub alias: &'static str,
    pub description: &'static str,
    pub dimension: Option<usize>,
    /// Repository the artifacts are fetched from.
    pub repo: &'static str,
    /// ONNX graph path inside the repository.
    pub model_file: &'static str,
    /// Extra required files (external tensor data).
    pub extra_files: &'static [&'static str],
    pub pooling: Option<Pooling>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactFile {
    pub path: &'static str,
    pub required: bool,
}

const TOKENIZER_FILES: &[ArtifactFile] = &[
    ArtifactFile {
        path: "tokenizer.json",
        required: true,
    },
    ArtifactFile {
        path: "config.json",
        required: false,
    },
    ArtifactFile {
        path: "special_tokens_map.json",
        required: false,
    },
    ArtifactFile {
        path: "tokenizer_config.json",
        required: false,
    },
];

const IMAGE_FILES: &[ArtifactFile] = &[ArtifactFile {
    path: "preprocessor_config.json",
    required: false,
}];

impl ModelSpec {
    pub fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor {
            code: self.code.to_string(),
            description: self.description.to_string(),
            dimension: self.dimension,
        }
    }

    /// All files making up the artifact, the ONNX graph first.
    pub fn artifact_files(&self) -> Vec<ArtifactFile> {
        let mut files = vec![ArtifactFile {
            path: self.model_file,
            required: true,
        }];
        files.extend(self.extra_files.iter().map(|path| ArtifactFile {
            path,
            required: true,
        }));
        let side = if self.family.is_textual() {
            TOKENIZER_FILES
        } else {
            IMAGE_FILES
        };
        files.extend_from_slice(side);
        files
    }

    /// Directory name under the family's cache directory.
    pub fn cache_name(&self) -> String {
        self.code.replace('/', "--")
    }
}

/// Catalog for one family, in table order.
pub fn list_models(family: ModelFamily) -> Vec<ModelDescriptor> {
    family.specs().iter().map(ModelSpec::descriptor).collect()
}

/// Resolve a code (exact) or alias (case-insensitive). Empty or missing codes
/// resolve to the family default.
pub fn resolve(family: ModelFamily, code: Option<&str>) -> Result<&'static ModelSpec> {
    let wanted = code.map(str::trim).filter(|c| !c.is_empty());
    let wanted = wanted.unwrap_or_else(|| family.default_code());
    let specs = family.specs();

    specs
        .iter()
        .find(|s| s.code == wanted)
        .or_else(|| {
            specs
                .iter()
                .find(|s| !s.alias.is_empty() && s.alias.eq_ignore_ascii_case(wanted))
        })
        .ok_or_else(|| EngineError::ModelNotFound {
            family,
            code: wanted.to_string(),
        })
}
