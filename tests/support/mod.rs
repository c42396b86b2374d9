//! Test support module
//!
//! Shared fixtures and helpers for the integration tests. Models are served
//! from a local mirror directory and run by deterministic fake backends, so no
//! test needs network access or real ONNX graphs.

#![allow(dead_code)]

pub mod helpers;

// Re-export rstest fixtures for convenient use in tests
pub mod fixtures;
