use serde::{Deserialize, Serialize};
use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::{EngineError, Result};

pub const DEFAULT_HF_ENDPOINT: &str = "https://huggingface.co";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionBackend {
    #[default]
    Cpu,
    Cuda,
    CoreMl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub cache_dir: PathBuf,
    pub execution_backend: ExecutionBackend,
    pub intra_threads: usize,
    pub max_length: usize,
    /// Overrides family defaults when a call passes no batch size.
    pub batch_size: Option<usize>,

    // Artifact fetching
    pub download_retries: u32,
    pub download_backoff_ms: u64,
    pub download_timeout_secs: u64,
    pub hf_endpoint: String,
    pub hf_token: Option<String>,
    pub mirror_dir: Option<PathBuf>,
    pub offline: bool,
    pub verify_checksums: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            execution_backend: ExecutionBackend::Cpu,
            intra_threads: num_cpus::get().max(1),
            max_length: 512,
            batch_size: None,
            download_retries: 3,
            download_backoff_ms: 500,
            download_timeout_secs: 600,
            hf_endpoint: DEFAULT_HF_ENDPOINT.to_string(),
            hf_token: None,
            mirror_dir: None,
            offline: false,
            verify_checksums: false,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let cache_dir = optional_env("EMBED_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        let execution_backend = optional_env("EMBED_EXECUTION_BACKEND")
            .as_deref()
            .map(parse_execution_backend)
            .transpose()?
            .unwrap_or(defaults.execution_backend);

        let intra_threads = optional_env("EMBED_INTRA_THREADS")
            .as_deref()
            .map(|v| parse_positive("EMBED_INTRA_THREADS", v))
            .transpose()?
            .unwrap_or(defaults.intra_threads);

        let max_length = optional_env("EMBED_MAX_LENGTH")
            .as_deref()
            .map(|v| parse_positive("EMBED_MAX_LENGTH", v))
            .transpose()?
            .unwrap_or(defaults.max_length);

        // 0 means "use the family default", same as unset.
        let batch_size = optional_env("EMBED_BATCH_SIZE")
            .as_deref()
            .map(|v| parse_usize("EMBED_BATCH_SIZE", v))
            .transpose()?
            .filter(|n| *n > 0);

        let download_retries = optional_env("EMBED_DOWNLOAD_RETRIES")
            .as_deref()
            .map(|v| parse_u64("EMBED_DOWNLOAD_RETRIES", v))
            .transpose()?
            .map(|n| n.clamp(1, 20) as u32)
            .unwrap_or(defaults.download_retries);

        let download_backoff_ms = optional_env("EMBED_DOWNLOAD_BACKOFF_MS")
            .as_deref()
            .map(|v| parse_u64("EMBED_DOWNLOAD_BACKOFF_MS", v))
            .transpose()?
            .unwrap_or(defaults.download_backoff_ms);

        let download_timeout_secs = optional_env("EMBED_DOWNLOAD_TIMEOUT_SECS")
            .as_deref()
            .map(|v| parse_u64("EMBED_DOWNLOAD_TIMEOUT_SECS", v))
            .transpose()?
            .unwrap_or(defaults.download_timeout_secs);

        let hf_endpoint = optional_env("EMBED_HF_ENDPOINT")
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or(defaults.hf_endpoint);

        let hf_token = optional_env("EMBED_HF_TOKEN").or_else(|| optional_env("HF_TOKEN"));

        let mirror_dir = optional_env("EMBED_MODEL_MIRROR_DIR").map(PathBuf::from);

        let offline = optional_env("EMBED_OFFLINE")
            .as_deref()
            .map(|v| parse_bool("EMBED_OFFLINE", v))
            .transpose()?
            .unwrap_or(false);

        let verify_checksums = optional_env("EMBED_VERIFY_CHECKSUMS")
            .as_deref()
            .map(|v| parse_bool("EMBED_VERIFY_CHECKSUMS", v))
            .transpose()?
            .unwrap_or(false);

        Ok(Self {
            cache_dir,
            execution_backend,
            intra_threads,
            max_length,
            batch_size,
            download_retries,
            download_backoff_ms,
            download_timeout_secs,
            hf_endpoint,
            hf_token,
            mirror_dir,
            offline,
            verify_checksums,
        })
    }

    pub fn with_cache_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cache_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn download_backoff(&self) -> Duration {
        Duration::from_millis(self.download_backoff_ms)
    }
}

fn default_cache_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(".cache").join("embedding-engine"),
        None => PathBuf::from(".embedding-cache"),
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|v| {
        let v = v.trim().to_string();
        if v.is_empty() {
            None
        } else {
            Some(v)
        }
    })
}

fn parse_execution_backend(value: &str) -> Result<ExecutionBackend> {
    match value.trim().to_lowercase().as_str() {
        "cpu" => Ok(ExecutionBackend::Cpu),
        "cuda" | "gpu" => Ok(ExecutionBackend::Cuda),
        "coreml" | "metal" => Ok(ExecutionBackend::CoreMl),
        other => Err(EngineError::invalid_argument(format!(
            "Invalid EMBED_EXECUTION_BACKEND: {other}"
        ))),
    }
}

fn parse_usize(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|err| EngineError::invalid_argument(format!("Invalid {key} '{value}': {err}")))
}

fn parse_positive(key: &str, value: &str) -> Result<usize> {
    match parse_usize(key, value)? {
        0 => Err(EngineError::invalid_argument(format!("{key} must be > 0"))),
        n => Ok(n),
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|err| EngineError::invalid_argument(format!("Invalid {key} '{value}': {err}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        other => Err(EngineError::invalid_argument(format!(
            "Invalid boolean for {key}: '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for k in [
            "EMBED_CACHE_DIR",
            "EMBED_EXECUTION_BACKEND",
            "EMBED_INTRA_THREADS",
            "EMBED_MAX_LENGTH",
            "EMBED_BATCH_SIZE",
            "EMBED_DOWNLOAD_RETRIES",
            "EMBED_DOWNLOAD_BACKOFF_MS",
            "EMBED_DOWNLOAD_TIMEOUT_SECS",
            "EMBED_HF_ENDPOINT",
            "EMBED_HF_TOKEN",
            "HF_TOKEN",
            "EMBED_MODEL_MIRROR_DIR",
            "EMBED_OFFLINE",
            "EMBED_VERIFY_CHECKSUMS",
        ] {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn from_env_uses_defaults() {
        let _g = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        let cfg = EngineConfig::from_env().unwrap();
        assert_eq!(cfg.execution_backend, ExecutionBackend::Cpu);
        assert_eq!(cfg.max_length, 512);
        assert_eq!(cfg.batch_size, None);
        assert_eq!(cfg.download_retries, 3);
        assert_eq!(cfg.hf_endpoint, DEFAULT_HF_ENDPOINT);
        assert!(cfg.intra_threads >= 1);
        assert!(!cfg.offline);
        assert!(!cfg.verify_checksums);
        assert!(
            cfg.cache_dir.ends_with("embedding-engine")
                || cfg.cache_dir.ends_with(".embedding-cache")
        );
    }

    #[test]
    fn from_env_reads_overrides() {
        let _g = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        std::env::set_var("EMBED_CACHE_DIR", "/tmp/embed-cache");
        std::env::set_var("EMBED_EXECUTION_BACKEND", "CUDA");
        std::env::set_var("EMBED_BATCH_SIZE", "16");
        std::env::set_var("EMBED_HF_ENDPOINT", "http://mirror.local/");
        std::env::set_var("EMBED_OFFLINE", "yes");
        std::env::set_var("HF_TOKEN", "hf_abc");

        let cfg = EngineConfig::from_env().unwrap();
        assert_eq!(cfg.cache_dir, PathBuf::from("/tmp/embed-cache"));
        assert_eq!(cfg.execution_backend, ExecutionBackend::Cuda);
        assert_eq!(cfg.batch_size, Some(16));
        assert_eq!(cfg.hf_endpoint, "http://mirror.local");
        assert!(cfg.offline);
        assert_eq!(cfg.hf_token.as_deref(), Some("hf_abc"));
        clear_env();
    }

    #[test]
    fn zero_batch_size_means_family_default() {
        let _g = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        std::env::set_var("EMBED_BATCH_SIZE", "0");
        assert_eq!(EngineConfig::from_env().unwrap().batch_size, None);
        clear_env();
    }

    #[test]
    fn from_env_rejects_bad_values() {
        let _g = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        std::env::set_var("EMBED_EXECUTION_BACKEND", "tpu");
        let err = EngineConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("EMBED_EXECUTION_BACKEND"));
        clear_env();

        std::env::set_var("EMBED_MAX_LENGTH", "0");
        assert!(EngineConfig::from_env().is_err());
        clear_env();

        std::env::set_var("EMBED_OFFLINE", "maybe");
        let err = EngineConfig::from_env().unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument { .. }));
        clear_env();
    }
}
