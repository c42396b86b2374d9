//! Local embedding and reranking engine over ONNX models.
//!
//! Models come from a fixed catalog, are fetched into an on-disk cache on
//! first use and run in-process. Use [`Engine`] for handle-based access or the
//! typed models in [`models`] directly.

pub mod batching;
pub mod cache;
pub mod config;
pub mod encode;
pub mod engine;
pub mod error;
pub mod handle;
pub mod inference;
pub mod loader;
pub mod metrics;
pub mod models;
pub mod preprocess;
pub mod registry;

pub use config::{EngineConfig, ExecutionBackend};
pub use encode::{Embedding, RerankResult, SparseEmbedding};
pub use engine::{Engine, ScopedHandle};
pub use error::{EngineError, ErrorKind, ErrorReport, Result};
pub use handle::{HandleId, HandleInfo, HandleState};
pub use models::{ImageEmbedding, SparseTextEmbedding, TextEmbedding, TextRerank};
pub use registry::{list_models, ModelDescriptor, ModelFamily};
