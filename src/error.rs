use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::registry::ModelFamily;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no {family} model with code or alias '{code}'")]
    ModelNotFound { family: ModelFamily, code: String },

    #[error("failed to fetch {file} from {repo} after {attempts} attempt(s): {reason}")]
    DownloadFailed {
        repo: String,
        file: String,
        attempts: u32,
        reason: String,
    },

    #[error("corrupt model artifact at {}: {reason}", path.display())]
    CorruptArtifact { path: PathBuf, reason: String },

    #[error("unsupported model format: {reason}")]
    UnsupportedFormat { reason: String },

    #[error("tokenization failed{}: {reason}", at_index(*index))]
    Tokenization { index: Option<usize>, reason: String },

    #[error("cannot decode image {} at index {index}: {reason}", path.display())]
    ImageDecode {
        index: usize,
        path: PathBuf,
        reason: String,
    },

    #[error("file not found at index {index}: {}", path.display())]
    FileNotFound { index: usize, path: PathBuf },

    #[error("inference failed: {reason}")]
    Inference { reason: String },

    #[error("handle {id} is closed")]
    HandleClosed { id: u64 },

    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },
}

fn at_index(index: Option<usize>) -> String {
    index.map(|i| format!(" at index {i}")).unwrap_or_default()
}

impl EngineError {
    pub fn inference(reason: impl fmt::Display) -> Self {
        EngineError::Inference {
            reason: reason.to_string(),
        }
    }

    pub fn invalid_argument(reason: impl fmt::Display) -> Self {
        EngineError::InvalidArgument {
            reason: reason.to_string(),
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        EngineError::CorruptArtifact {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn unsupported(reason: impl fmt::Display) -> Self {
        EngineError::UnsupportedFormat {
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::ModelNotFound { .. } => ErrorKind::ModelNotFound,
            EngineError::DownloadFailed { .. } => ErrorKind::DownloadFailed,
            EngineError::CorruptArtifact { .. } => ErrorKind::CorruptArtifact,
            EngineError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            EngineError::Tokenization { .. } => ErrorKind::TokenizationError,
            EngineError::ImageDecode { .. } => ErrorKind::ImageDecodeError,
            EngineError::FileNotFound { .. } => ErrorKind::FileNotFound,
            EngineError::Inference { .. } => ErrorKind::InferenceError,
            EngineError::HandleClosed { .. } => ErrorKind::HandleClosed,
            EngineError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
        }
    }

    /// Only download failures are worth retrying unchanged. A corrupt artifact
    /// needs an eviction first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::DownloadFailed { .. })
    }

    /// Global input index of the item that caused a per-item failure.
    pub fn failed_index(&self) -> Option<usize> {
        match self {
            EngineError::Tokenization { index, .. } => *index,
            EngineError::ImageDecode { index, .. } | EngineError::FileNotFound { index, .. } => {
                Some(*index)
            }
            _ => None,
        }
    }

    /// Shift a chunk-local item index by the chunk's offset.
    pub(crate) fn offset_index(self, offset: usize) -> Self {
        match self {
            EngineError::Tokenization { index, reason } => EngineError::Tokenization {
                index: index.map(|i| i + offset),
                reason,
            },
            EngineError::ImageDecode {
                index,
                path,
                reason,
            } => EngineError::ImageDecode {
                index: index + offset,
                path,
                reason,
            },
            EngineError::FileNotFound { index, path } => EngineError::FileNotFound {
                index: index + offset,
                path,
            },
            other => other,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
            index: self.failed_index(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    ModelNotFound,
    DownloadFailed,
    CorruptArtifact,
    UnsupportedFormat,
    TokenizationError,
    ImageDecodeError,
    FileNotFound,
    InferenceError,
    HandleClosed,
    InvalidArgument,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ModelNotFound => "ModelNotFound",
            ErrorKind::DownloadFailed => "DownloadFailed",
            ErrorKind::CorruptArtifact => "CorruptArtifact",
            ErrorKind::UnsupportedFormat => "UnsupportedFormat",
            ErrorKind::TokenizationError => "TokenizationError",
            ErrorKind::ImageDecodeError => "ImageDecodeError",
            ErrorKind::FileNotFound => "FileNotFound",
            ErrorKind::InferenceError => "InferenceError",
            ErrorKind::HandleClosed => "HandleClosed",
            ErrorKind::InvalidArgument => "InvalidArgument",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error shape handed across the CLI boundary.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}
