//! On-disk model cache.
//!
//! Layout: `<root>/<family-slug>/<org--name>/` holding the artifact files at
//! their repository-relative paths, plus a `.complete.json` marker written
//! last. A directory without a marker is a partial download and is never used.
//! Installs go through a private staging directory and a single rename, so a
//! reader sees either nothing or a complete artifact.

mod download;
mod source;

pub use download::HttpSource;
pub use source::{hash_file, ArtifactSource, FetchError, FetchedFile, MirrorSource, RetryPolicy};

use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Component, Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::metrics::MetricsRegistry;
use crate::registry::{ArtifactFile, ModelFamily, ModelSpec};

pub const MARKER_FILE: &str = ".complete.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CompletionMarker {
    code: String,
    repo: String,
    files: Vec<MarkerEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct MarkerEntry {
    path: String,
    size: u64,
    sha256: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheState {
    Missing,
    Partial,
    Complete,
}

/// A complete artifact found in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedModel {
    pub family: ModelFamily,
    pub code: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

pub struct ModelCache {
    root: PathBuf,
    source: Arc<dyn ArtifactSource>,
    retry: RetryPolicy,
    offline: bool,
    verify_checksums: bool,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl ModelCache {
    pub fn new(root: impl Into<PathBuf>, source: Arc<dyn ArtifactSource>) -> Self {
        Self {
            root: root.into(),
            source,
            retry: RetryPolicy::default(),
            offline: false,
            verify_checksums: false,
            metrics: None,
        }
    }

    /// Cache with the source the configuration asks for: a local mirror when
    /// one is set, the HTTP store otherwise.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let source: Arc<dyn ArtifactSource> = match &config.mirror_dir {
            Some(dir) => Arc::new(MirrorSource::new(dir)),
            None => Arc::new(HttpSource::new(
                &config.hf_endpoint,
                config.hf_token.as_deref(),
                Duration::from_secs(config.download_timeout_secs),
            )?),
        };
        Ok(Self::new(&config.cache_dir, source)
            .with_retry(RetryPolicy::new(
                config.download_retries,
                config.download_backoff(),
            ))
            .offline(config.offline)
            .verify_checksums(config.verify_checksums))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn model_dir(&self, spec: &ModelSpec) -> PathBuf {
        self.root.join(spec.family.slug()).join(spec.cache_name())
    }

    /// Directory holding a complete artifact for `spec`, fetching it on a miss.
    pub fn ensure(&self, spec: &ModelSpec) -> Result<PathBuf> {
        let dir = self.model_dir(spec);
        match self.state(spec, &dir)? {
            CacheState::Complete => {
                debug!(code = spec.code, dir = %dir.display(), "Model cache hit");
                return Ok(dir);
            }
            CacheState::Partial => {
                warn!(
                    code = spec.code,
                    dir = %dir.display(),
                    "Found partial model download, refetching"
                );
            }
            CacheState::Missing => {}
        }

        if self.offline {
            return Err(EngineError::DownloadFailed {
                repo: spec.repo.to_string(),
                file: spec.model_file.to_string(),
                attempts: 0,
                reason: "offline mode is enabled and the model is not cached".to_string(),
            });
        }

        self.install(spec, &dir)?;
        Ok(dir)
    }

    /// Remove a cached artifact. Returns whether anything was removed.
    pub fn evict(&self, spec: &ModelSpec) -> Result<bool> {
        let dir = self.model_dir(spec);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!(code = spec.code, dir = %dir.display(), "Evicted cached model");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(EngineError::corrupt(&dir, format!("failed to remove: {e}"))),
        }
    }

    /// Complete artifacts currently on disk, sorted by family then code.
    pub fn cached_models(&self) -> Vec<CachedModel> {
        let mut out = Vec::new();
        for family in ModelFamily::ALL {
            let family_dir = self.root.join(family.slug());
            let Ok(entries) = fs::read_dir(&family_dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let hidden = entry.file_name().to_string_lossy().starts_with('.');
                if hidden || !path.is_dir() {
                    continue;
                }
                if let Ok(marker) = read_marker(&path) {
                    out.push(CachedModel {
                        family,
                        code: marker.code,
                        size_bytes: marker.files.iter().map(|f| f.size).sum(),
                        path,
                    });
                }
            }
        }
        out.sort_by(|a, b| {
            a.family
                .slug()
                .cmp(b.family.slug())
                .then_with(|| a.code.cmp(&b.code))
        });
        out
    }

    fn state(&self, spec: &ModelSpec, dir: &Path) -> Result<CacheState> {
        if !dir.is_dir() {
            return Ok(CacheState::Missing);
        }
        let marker_path = dir.join(MARKER_FILE);
        if !marker_path.is_file() {
            return Ok(CacheState::Partial);
        }
        let marker = read_marker(dir)?;
        self.validate(spec, dir, &marker)?;
        Ok(CacheState::Complete)
    }

    fn validate(&self, spec: &ModelSpec, dir: &Path, marker: &CompletionMarker) -> Result<()> {
        for required in spec.artifact_files().iter().filter(|f| f.required) {
            if !marker.files.iter().any(|e| e.path == required.path) {
                return Err(EngineError::corrupt(
                    dir,
                    format!("marker does not list required file {}", required.path),
                ));
            }
        }

        for entry in &marker.files {
            let path = safe_join_under(dir, Path::new(&entry.path))?;
            let meta = fs::metadata(&path)
                .map_err(|e| EngineError::corrupt(&path, format!("listed file unreadable: {e}")))?;
            if meta.len() != entry.size {
                return Err(EngineError::corrupt(
                    &path,
                    format!("size mismatch (expected {}, got {})", entry.size, meta.len()),
                ));
            }
            if self.verify_checksums {
                let got = hash_file(&path)
                    .map_err(|e| EngineError::corrupt(&path, format!("failed to hash: {e}")))?;
                if got.sha256 != entry.sha256 {
                    return Err(EngineError::corrupt(
                        &path,
                        format!("sha256 mismatch (expected {}, got {})", entry.sha256, got.sha256),
                    ));
                }
            }
        }
        Ok(())
    }

    fn install(&self, spec: &ModelSpec, dir: &Path) -> Result<()> {
        let family_dir = self.root.join(spec.family.slug());
        fs::create_dir_all(&family_dir).map_err(|e| download_io(spec, &family_dir, e))?;

        let stage = staging_dir(&family_dir, &spec.cache_name());
        fs::create_dir_all(&stage).map_err(|e| download_io(spec, &stage, e))?;

        info!(
            code = spec.code,
            repo = spec.repo,
            source = self.source.name(),
            "Fetching model artifacts"
        );

        let fetched = self.fetch_all(spec, &stage).and_then(|files| {
            let marker = CompletionMarker {
                code: spec.code.to_string(),
                repo: spec.repo.to_string(),
                files,
            };
            write_marker(&stage, &marker).map_err(|e| download_io(spec, &stage, e))
        });
        if let Err(e) = fetched {
            let _ = fs::remove_dir_all(&stage);
            return Err(e);
        }

        self.publish(spec, &stage, dir)
    }

    fn fetch_all(&self, spec: &ModelSpec, stage: &Path) -> Result<Vec<MarkerEntry>> {
        let mut entries = Vec::new();
        for file in spec.artifact_files() {
            let dest = safe_join_under(stage, Path::new(file.path))?;
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| download_io(spec, parent, e))?;
            }
            if let Some(fetched) = self.fetch_with_retry(spec, file, &dest)? {
                entries.push(MarkerEntry {
                    path: file.path.to_string(),
                    size: fetched.size,
                    sha256: fetched.sha256,
                });
            }
        }
        Ok(entries)
    }

    fn fetch_with_retry(
        &self,
        spec: &ModelSpec,
        file: ArtifactFile,
        dest: &Path,
    ) -> Result<Option<FetchedFile>> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let failure = match self.source.fetch(spec.repo, file.path, dest) {
                Ok(fetched) => {
                    if let Some(m) = &self.metrics {
                        m.artifact_downloads_total.inc();
                    }
                    debug!(file = file.path, size = fetched.size, "Fetched artifact file");
                    return Ok(Some(fetched));
                }
                Err(FetchError::NotFound(_)) if !file.required => {
                    debug!(file = file.path, repo = spec.repo, "Optional artifact file absent");
                    let _ = fs::remove_file(dest);
                    return Ok(None);
                }
                Err(FetchError::Transient(reason)) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        file = file.path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Artifact fetch failed, retrying"
                    );
                    if let Some(m) = &self.metrics {
                        m.artifact_download_retries_total.inc();
                    }
                    std::thread::sleep(delay);
                    continue;
                }
                Err(e) => e,
            };
            return Err(EngineError::DownloadFailed {
                repo: spec.repo.to_string(),
                file: file.path.to_string(),
                attempts: attempt,
                reason: failure.to_string(),
            });
        }
    }

    fn publish(&self, spec: &ModelSpec, stage: &Path, dir: &Path) -> Result<()> {
        let mut moved_aside = None;
        loop {
            match fs::rename(stage, dir) {
                Ok(()) => break,
                Err(e) => {
                    // The destination exists: either another process won or
                    // a stale partial download is in the way.
                    if matches!(self.state(spec, dir), Ok(CacheState::Complete)) {
                        debug!(
                            dir = %dir.display(),
                            "Model installed concurrently, discarding staged copy"
                        );
                        let _ = fs::remove_dir_all(stage);
                        discard_aside(moved_aside);
                        return Ok(());
                    }
                    if moved_aside.is_some() || !dir.exists() {
                        let _ = fs::remove_dir_all(stage);
                        discard_aside(moved_aside);
                        return Err(download_io(spec, dir, e));
                    }
                    let aside = sibling_dir(dir, "stale");
                    match fs::rename(dir, &aside) {
                        Ok(()) => moved_aside = Some(aside),
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => {
                            let _ = fs::remove_dir_all(stage);
                            return Err(download_io(spec, dir, e));
                        }
                    }
                }
            }
        }
        discard_aside(moved_aside);
        info!(code = spec.code, dir = %dir.display(), "Model download complete");
        Ok(())
    }
}

fn discard_aside(aside: Option<PathBuf>) {
    if let Some(aside) = aside {
        let _ = fs::remove_dir_all(aside);
    }
}

fn read_marker(dir: &Path) -> Result<CompletionMarker> {
    let path = dir.join(MARKER_FILE);
    let text = fs::read_to_string(&path)
        .map_err(|e| EngineError::corrupt(&path, format!("unreadable marker: {e}")))?;
    serde_json::from_str(&text)
        .map_err(|e| EngineError::corrupt(&path, format!("invalid marker: {e}")))
}

fn write_marker(dir: &Path, marker: &CompletionMarker) -> io::Result<()> {
    let text = serde_json::to_string_pretty(marker).map_err(io::Error::other)?;
    fs::write(dir.join(MARKER_FILE), text)
}

fn download_io(spec: &ModelSpec, path: &Path, err: io::Error) -> EngineError {
    EngineError::DownloadFailed {
        repo: spec.repo.to_string(),
        file: spec.model_file.to_string(),
        attempts: 1,
        reason: format!("{}: {err}", path.display()),
    }
}

fn staging_dir(family_dir: &Path, name: &str) -> PathBuf {
    family_dir.join(format!(".staging-{name}-{}", unique_suffix()))
}

/// Hidden sibling of `dir` used to move a stale directory out of the way.
fn sibling_dir(dir: &Path, tag: &str) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.with_file_name(format!(".{tag}-{name}-{}", unique_suffix()))
}

fn unique_suffix() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{nanos}-{n}", std::process::id())
}

fn safe_join_under(base: &Path, rel: &Path) -> Result<PathBuf> {
    let mut out = PathBuf::from(base);
    for c in rel.components() {
        match c {
            Component::Normal(p) => out.push(p),
            Component::CurDir => {}
            _ => {
                return Err(EngineError::corrupt(
                    base,
                    format!("refusing artifact path outside the model dir: {}", rel.display()),
                ))
            }
        }
    }
    Ok(out)
}
