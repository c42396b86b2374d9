//! rstest fixtures for integration tests
//!
//! Fixtures build an [`Engine`] whose cache fetches from a local mirror of
//! the whole catalog and whose models run on [`FakeBackends`].
//!
//! # Usage
//!
//! ```rust
//! use crate::support::fixtures::*;
//!
//! #[rstest]
//! fn my_test(harness: Harness) {
//!     let id = harness.engine.create_handle(ModelFamily::TextEmbedding, None).unwrap();
//! }
//! ```

use embedding_engine::cache::{MirrorSource, ModelCache};
use embedding_engine::loader::ModelLoader;
use embedding_engine::Engine;
use rstest::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::helpers::{write_full_mirror, FakeBackends};

/// Unique counter for creating isolated test directories
static FIXTURE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Creates a unique temporary directory for test isolation
///
/// Each call creates a new directory named from an atomic counter and the
/// current time, so parallel tests never share state.
#[fixture]
pub fn tmp_dir() -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let c = FIXTURE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("embedding-engine-test-{nanos}-{c}"));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Mirror directory holding every catalog model
#[fixture]
pub fn mirror_dir(tmp_dir: PathBuf) -> PathBuf {
    let mirror = tmp_dir.join("mirror");
    write_full_mirror(&mirror);
    mirror
}

/// Cache over `mirror`, rooted at `<mirror>/../cache`.
pub fn mirror_cache(mirror: &Path) -> ModelCache {
    let root = mirror.parent().unwrap_or(mirror).join("cache");
    ModelCache::new(root, Arc::new(MirrorSource::new(mirror)))
}

pub fn engine_with(cache: ModelCache, backends: FakeBackends) -> Engine {
    let loader = ModelLoader::new(cache, Arc::new(backends), 64);
    Engine::with_loader(loader).unwrap()
}

/// An engine plus the fakes tests assert against.
pub struct Harness {
    pub engine: Engine,
    pub backends: FakeBackends,
    pub mirror: PathBuf,
}

impl Harness {
    pub fn cache_root(&self) -> &Path {
        self.engine.cache().root()
    }
}

#[fixture]
pub fn harness(mirror_dir: PathBuf) -> Harness {
    let backends = FakeBackends::default();
    let engine = engine_with(mirror_cache(&mirror_dir), backends.clone());
    Harness {
        engine,
        backends,
        mirror: mirror_dir,
    }
}
