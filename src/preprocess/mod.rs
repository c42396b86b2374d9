//! Raw inputs to model-ready tensors.

pub mod image;
pub mod text;

pub use self::image::ImagePreprocessor;
pub use self::text::{TextBatch, TextPreprocessor};
