use futures::StreamExt;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT},
    StatusCode,
};
use sha2::{Digest, Sha256};
use std::{path::Path, time::Duration};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::source::{ArtifactSource, FetchError, FetchedFile};
use crate::error::{EngineError, Result};

/// Fetches `{endpoint}/{repo}/resolve/{revision}/{file}` from a Hugging Face
/// compatible store.
pub struct HttpSource {
    client: reqwest::Client,
    endpoint: String,
    revision: String,
}

impl HttpSource {
    pub fn new(endpoint: &str, hf_token: Option<&str>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .default_headers(default_headers(hf_token)?)
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()
            .map_err(|e| {
                EngineError::invalid_argument(format!("Failed to build HTTP client: {e}"))
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            revision: "main".to_string(),
        })
    }

    pub fn resolve_url(&self, repo: &str, file: &str) -> String {
        resolve_url(&self.endpoint, repo, &self.revision, file)
    }
}

impl ArtifactSource for HttpSource {
    fn name(&self) -> &str {
        "http"
    }

    fn fetch(&self, repo: &str, file: &str, dest: &Path) -> Result<FetchedFile, FetchError> {
        let url = self.resolve_url(repo, file);
        debug!(url = %url, dest = %dest.display(), "Downloading artifact file");
        block_on_private_runtime(download_to_file(&self.client, &url, dest))
    }
}

fn default_headers(hf_token: Option<&str>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("embedding-engine/", env!("CARGO_PKG_VERSION"))),
    );
    if let Some(token) = hf_token {
        let value = format!("Bearer {}", token.trim());
        let value = HeaderValue::from_str(&value)
            .map_err(|_| EngineError::invalid_argument("Invalid EMBED_HF_TOKEN"))?;
        headers.insert(AUTHORIZATION, value);
    }
    Ok(headers)
}

fn resolve_url(endpoint: &str, repo: &str, revision: &str, file: &str) -> String {
    format!("{endpoint}/{repo}/resolve/{revision}/{file}")
}

fn classify_status(status: StatusCode, url: &str) -> FetchError {
    if status == StatusCode::NOT_FOUND {
        FetchError::NotFound(url.to_string())
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        FetchError::Transient(format!("HTTP {status} for {url}"))
    } else {
        FetchError::Fatal(format!("HTTP {status} for {url}"))
    }
}

fn classify_reqwest(err: reqwest::Error) -> FetchError {
    if err.is_timeout() || err.is_connect() || err.is_body() || err.is_request() {
        FetchError::Transient(err.to_string())
    } else {
        FetchError::Fatal(err.to_string())
    }
}

/// The public API is synchronous; downloads get a current-thread runtime of
/// their own. Inside an existing runtime the fetch moves to a scoped thread so
/// `block_on` never nests.
fn block_on_private_runtime<F, T>(fut: F) -> Result<T, FetchError>
where
    F: std::future::Future<Output = Result<T, FetchError>> + Send,
    T: Send,
{
    let run = move || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| FetchError::Fatal(format!("Failed to start download runtime: {e}")))?
            .block_on(fut)
    };

    if tokio::runtime::Handle::try_current().is_err() {
        return run();
    }
    std::thread::scope(|s| {
        s.spawn(run)
            .join()
            .unwrap_or_else(|_| Err(FetchError::Fatal("download thread panicked".to_string())))
    })
}

async fn download_to_file(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
) -> Result<FetchedFile, FetchError> {
    let resp = client.get(url).send().await.map_err(classify_reqwest)?;
    if !resp.status().is_success() {
        return Err(classify_status(resp.status(), url));
    }

    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| FetchError::Fatal(format!("Failed to create {}: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    let mut size = 0u64;

    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(classify_reqwest)?;
        hasher.update(&chunk);
        size += chunk.len() as u64;
        file.write_all(&chunk)
            .await
            .map_err(|e| FetchError::Fatal(format!("Failed to write download to disk: {e}")))?;
    }
    file.flush()
        .await
        .map_err(|e| FetchError::Fatal(format!("Failed to flush {}: {e}", path.display())))?;

    Ok(FetchedFile {
        size,
        sha256: hex::encode(hasher.finalize()),
    })
}
