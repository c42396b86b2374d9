//! Where artifact files come from.

use sha2::{Digest, Sha256};
use std::{
    fmt, fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The store answered and the file does not exist.
    NotFound(String),
    /// Worth another attempt (network hiccup, 5xx, rate limiting).
    Transient(String),
    Fatal(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::NotFound(r) => write!(f, "not found: {r}"),
            FetchError::Transient(r) => write!(f, "transient failure: {r}"),
            FetchError::Fatal(r) => f.write_str(r),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub size: u64,
    pub sha256: String,
}

pub trait ArtifactSource: Send + Sync {
    fn name(&self) -> &str;

    /// Write `file` from `repo` to `dest`. `dest`'s parent exists.
    fn fetch(&self, repo: &str, file: &str, dest: &Path) -> Result<FetchedFile, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per file, first one included.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            initial_backoff,
            ..Self::default()
        }
    }

    /// Backoff before attempt `attempt + 1`, doubling from the initial delay.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Copies artifacts from a local directory laid out as `<root>/<repo>/<file>`.
pub struct MirrorSource {
    root: PathBuf,
}

impl MirrorSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ArtifactSource for MirrorSource {
    fn name(&self) -> &str {
        "mirror"
    }

    fn fetch(&self, repo: &str, file: &str, dest: &Path) -> Result<FetchedFile, FetchError> {
        let src = self.root.join(repo).join(file);
        let mut input = match fs::File::open(&src) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(FetchError::NotFound(src.display().to_string()))
            }
            Err(e) => return Err(FetchError::Fatal(format!("{}: {e}", src.display()))),
        };
        let mut output = fs::File::create(dest)
            .map_err(|e| FetchError::Fatal(format!("Failed to create {}: {e}", dest.display())))?;
        copy_hashing(&mut input, &mut output)
            .map_err(|e| FetchError::Fatal(format!("Failed to copy {}: {e}", src.display())))
    }
}

fn copy_hashing(input: &mut impl Read, output: &mut impl Write) -> io::Result<FetchedFile> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        output.write_all(&buf[..n])?;
        size += n as u64;
    }
    output.flush()?;
    Ok(FetchedFile {
        size,
        sha256: hex::encode(hasher.finalize()),
    })
}

/// Size and sha256 of a file on disk.
pub fn hash_file(path: &Path) -> io::Result<FetchedFile> {
    let mut input = fs::File::open(path)?;
    copy_hashing(&mut input, &mut io::sink())
}
