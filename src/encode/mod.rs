//! Raw model outputs to the public result types.

pub mod pooling;
pub mod rerank;
pub mod sparse;

pub use rerank::RerankResult;
pub use sparse::SparseEmbedding;

pub type Embedding = Vec<f32>;
