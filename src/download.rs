//! Two-step model download.
//!
//! The model API never serves the model itself. An authenticated request to
//! `{base}/{model_id}/download` returns `{"download_url": "..."}`, a
//! pre-signed URL that is then fetched without credentials and streamed to
//! disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

#[allow(unused_imports)]
use log::{debug, info, warn, error};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Failed to set up HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("Failed to get download URL: {0}")]
    UrlRequest(reqwest::Error),
    #[error("Error getting download URL: {0}")]
    UrlStatus(u16),
    #[error("Failed to parse response: {0}")]
    Parse(String),
    #[error("Download failed: {0}")]
    Transfer(reqwest::Error),
    #[error("Download error: {0}")]
    FileStatus(u16),
    #[error("Download incomplete: expected {expected} bytes, got {received}")]
    Incomplete { expected: u64, received: u64 },
    #[error("Failed to save model: {0}")]
    Save(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct DownloadUrlResponse {
    download_url: String,
}

/// Bytes received so far; `total` is known when the server sent Content-Length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub received: u64,
    pub total: Option<u64>,
}

impl DownloadProgress {
    pub fn percent(&self) -> Option<u64> {
        self.total
            .filter(|total| *total > 0)
            .map(|total| self.received.min(total) * 100 / total)
    }
}

pub struct ModelDownloader {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ModelDownloader {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(DownloadError::Client)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn endpoint(&self, model_id: &str) -> String {
        format!("{}/{}/download", self.base_url, model_id)
    }

    /// Step 1: ask the model API for a pre-signed URL.
    pub async fn resolve_download_url(&self, model_id: &str) -> Result<String, DownloadError> {
        let endpoint = self.endpoint(model_id);
        debug!("Requesting download URL from {}", endpoint);

        let response = self
            .client
            .get(&endpoint)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(DownloadError::UrlRequest)?;

        let status = response.status();
        if !status.is_success() {
            error!("Error getting download URL: {}", status.as_u16());
            return Err(DownloadError::UrlStatus(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| DownloadError::Parse(e.to_string()))?;
        let parsed: DownloadUrlResponse = serde_json::from_str(&body).map_err(|e| {
            error!("Failed to parse response: {}", e);
            DownloadError::Parse(e.to_string())
        })?;

        Ok(parsed.download_url)
    }

    /// Step 2: stream `url` into `destination`, replacing it only once the
    /// whole body has arrived.
    pub async fn fetch_to_file(
        &self,
        url: &str,
        destination: &Path,
        on_progress: &mut (dyn FnMut(DownloadProgress) + Send),
    ) -> Result<u64, DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| {
                error!("Download failed: {}", e);
                DownloadError::Transfer(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::FileStatus(status.as_u16()));
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(destination);

        let result = stream_body(response, &partial, on_progress).await;
        match result {
            Ok(received) => {
                tokio::fs::rename(&partial, destination).await?;
                Ok(received)
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&partial).await {
                    debug!("Could not remove {}: {}", partial.display(), rm);
                }
                Err(e)
            }
        }
    }

    /// The full flow: resolve the pre-signed URL, then save the model as
    /// `destination_dir/filename`.
    pub async fn download_model(
        &self,
        model_id: &str,
        destination_dir: &Path,
        filename: &str,
        on_progress: &mut (dyn FnMut(DownloadProgress) + Send),
    ) -> Result<PathBuf, DownloadError> {
        let start = Instant::now();
        let download_url = self.resolve_download_url(model_id).await?;

        let destination = destination_dir.join(filename);
        let received = self.fetch_to_file(&download_url, &destination, on_progress).await?;

        info!(
            "Saved model {} ({} bytes) to {} in {:?}",
            model_id,
            received,
            destination.display(),
            start.elapsed()
        );
        Ok(destination)
    }
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

async fn stream_body(
    mut response: reqwest::Response,
    partial: &Path,
    on_progress: &mut (dyn FnMut(DownloadProgress) + Send),
) -> Result<u64, DownloadError> {
    let total = response.content_length();
    let mut file = tokio::fs::File::create(partial).await?;
    let mut received: u64 = 0;
    let initial = DownloadProgress { received, total };
    let mut last_step = initial.percent().map(|p| p / 10);
    on_progress(initial);

    while let Some(chunk) = response.chunk().await.map_err(DownloadError::Transfer)? {
        file.write_all(&chunk).await?;
        received += chunk.len() as u64;

        let progress = DownloadProgress { received, total };
        // One report per 10% step
        if let Some(step) = progress.percent().map(|p| p / 10) {
            if last_step != Some(step) {
                last_step = Some(step);
                on_progress(progress);
            }
        }
    }
    file.flush().await?;
    file.sync_all().await?;

    if let Some(expected) = total {
        if received != expected {
            return Err(DownloadError::Incomplete { expected, received });
        }
    }
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{dead_address, CannedResponse, MockServer};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn no_progress() -> impl FnMut(DownloadProgress) + Send {
        |_| {}
    }

    async fn server_with_model(model: &[u8]) -> MockServer {
        let server = MockServer::start().await;
        let body = format!(r#"{{"download_url": "{}"}}"#, server.url("/blob/model.ort"));
        server.route("/api/models/m1/download", CannedResponse::new(200, body));
        server.route("/blob/model.ort", CannedResponse::new(200, model.to_vec()));
        server
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let a = ModelDownloader::new("https://host/api/models/", "k", TIMEOUT).unwrap();
        let b = ModelDownloader::new("https://host/api/models", "k", TIMEOUT).unwrap();
        assert_eq!(a.endpoint("abc"), "https://host/api/models/abc/download");
        assert_eq!(a.endpoint("abc"), b.endpoint("abc"));
    }

    #[test]
    fn percent_needs_known_total() {
        assert_eq!(DownloadProgress { received: 5, total: None }.percent(), None);
        assert_eq!(DownloadProgress { received: 5, total: Some(0) }.percent(), None);
        assert_eq!(DownloadProgress { received: 25, total: Some(100) }.percent(), Some(25));
    }

    #[tokio::test]
    async fn saved_file_matches_second_response_exactly() {
        let model: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
        let server = server_with_model(&model).await;
        let dir = tempfile::tempdir().unwrap();

        let downloader = ModelDownloader::new(&server.url("/api/models"), "secret", TIMEOUT).unwrap();
        let mut reports = Vec::new();
        let path = downloader
            .download_model("m1", dir.path(), "downloaded_model.ort", &mut |p| reports.push(p))
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("downloaded_model.ort"));
        assert_eq!(std::fs::read(&path).unwrap(), model);
        assert!(!dir.path().join("downloaded_model.ort.part").exists());
        assert_eq!(reports.last().map(|p| p.received), Some(model.len() as u64));

        let seen = server.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].path, "/api/models/m1/download");
        assert_eq!(seen[0].authorization.as_deref(), Some("Bearer secret"));
        assert_eq!(seen[1].path, "/blob/model.ort");
        assert_eq!(seen[1].authorization, None);
    }

    #[tokio::test]
    async fn existing_model_is_overwritten() {
        let server = server_with_model(b"new model").await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.ort"), b"old model that was longer").unwrap();

        let downloader = ModelDownloader::new(&server.url("/api/models/"), "k", TIMEOUT).unwrap();
        downloader
            .download_model("m1", dir.path(), "m.ort", &mut no_progress())
            .await
            .unwrap();

        assert_eq!(std::fs::read(dir.path().join("m.ort")).unwrap(), b"new model");
    }

    #[tokio::test]
    async fn failed_url_request_writes_nothing() {
        let server = MockServer::start().await;
        server.route("/api/models/m1/download", CannedResponse::new(500, "boom"));
        let dir = tempfile::tempdir().unwrap();

        let downloader = ModelDownloader::new(&server.url("/api/models"), "k", TIMEOUT).unwrap();
        let err = downloader
            .download_model("m1", dir.path(), "m.ort", &mut no_progress())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::UrlStatus(500)));
        assert_eq!(err.to_string(), "Error getting download URL: 500");
        assert_eq!(server.seen().len(), 1);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn unreachable_api_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = ModelDownloader::new(&dead_address().await, "k", TIMEOUT).unwrap();

        let err = downloader
            .download_model("m1", dir.path(), "m.ort", &mut no_progress())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::UrlRequest(_)));
        assert!(err.to_string().starts_with("Failed to get download URL: "));
        assert!(!dir.path().join("m.ort").exists());
    }

    #[tokio::test]
    async fn missing_download_url_stops_before_second_request() {
        let server = MockServer::start().await;
        server.route("/api/models/m1/download", CannedResponse::new(200, r#"{"url": "x"}"#));
        let dir = tempfile::tempdir().unwrap();

        let downloader = ModelDownloader::new(&server.url("/api/models"), "k", TIMEOUT).unwrap();
        let err = downloader
            .download_model("m1", dir.path(), "m.ort", &mut no_progress())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Parse(_)));
        assert_eq!(server.seen().len(), 1);
        assert!(!dir.path().join("m.ort").exists());
    }

    #[tokio::test]
    async fn each_progress_step_is_reported_once() {
        let server = server_with_model(b"abc").await;
        let dir = tempfile::tempdir().unwrap();

        let downloader = ModelDownloader::new(&server.url("/api/models"), "k", TIMEOUT).unwrap();
        let mut percents = Vec::new();
        downloader
            .download_model("m1", dir.path(), "m.ort", &mut |p| percents.push(p.percent()))
            .await
            .unwrap();

        assert_eq!(percents, vec![Some(0), Some(100)]);
    }

    #[tokio::test]
    async fn unwritable_destination_is_a_save_error() {
        let server = server_with_model(b"weights").await;
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("models");
        std::fs::write(&not_a_dir, b"i am a file").unwrap();

        let downloader = ModelDownloader::new(&server.url("/api/models"), "k", TIMEOUT).unwrap();
        let err = downloader
            .download_model("m1", &not_a_dir, "m.ort", &mut no_progress())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Save(_)));
        assert!(err.to_string().starts_with("Failed to save model: "));
        assert_eq!(std::fs::read(&not_a_dir).unwrap(), b"i am a file");
    }

    #[tokio::test]
    async fn unreachable_file_host_keeps_previous_model() {
        let server = MockServer::start().await;
        let body = format!(r#"{{"download_url": "{}/blob/model.ort"}}"#, dead_address().await);
        server.route("/api/models/m1/download", CannedResponse::new(200, body));
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.ort"), b"previous").unwrap();

        let downloader = ModelDownloader::new(&server.url("/api/models"), "k", TIMEOUT).unwrap();
        let err = downloader
            .download_model("m1", dir.path(), "m.ort", &mut no_progress())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Transfer(_)));
        assert!(err.to_string().starts_with("Download failed: "));
        assert_eq!(server.seen().len(), 1);
        assert_eq!(std::fs::read(dir.path().join("m.ort")).unwrap(), b"previous");
        assert!(!dir.path().join("m.ort.part").exists());
    }

    #[tokio::test]
    async fn failed_file_request_keeps_previous_model() {
        let server = MockServer::start().await;
        let body = format!(r#"{{"download_url": "{}"}}"#, server.url("/blob/missing.ort"));
        server.route("/api/models/m1/download", CannedResponse::new(200, body));
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.ort"), b"previous").unwrap();

        let downloader = ModelDownloader::new(&server.url("/api/models"), "k", TIMEOUT).unwrap();
        let err = downloader
            .download_model("m1", dir.path(), "m.ort", &mut no_progress())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::FileStatus(404)));
        assert_eq!(err.to_string(), "Download error: 404");
        assert_eq!(std::fs::read(dir.path().join("m.ort")).unwrap(), b"previous");
        assert!(!dir.path().join("m.ort.part").exists());
    }
}
