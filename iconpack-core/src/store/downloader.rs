//! Streaming archive downloads with progress reporting and host validation.

use async_trait::async_trait;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

// ============================================================================
// Download Progress
// ============================================================================

/// Progress of one archive transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadProgress {
    pub bytes_done: u64,
    /// From `Content-Length`, when the server sent one.
    pub bytes_total: Option<u64>,
}

impl DownloadProgress {
    pub fn new(bytes_done: u64, bytes_total: Option<u64>) -> Self {
        Self {
            bytes_done,
            bytes_total,
        }
    }

    /// Percentage complete, or `None` if the total is unknown.
    pub fn percent(&self) -> Option<f32> {
        self.bytes_total.map(|total| {
            if total > 0 {
                (self.bytes_done as f32 / total as f32) * 100.0
            } else {
                0.0
            }
        })
    }
}

/// Progress callback shared by the store and its fetchers. It may borrow
/// from the caller for the duration of one transfer.
pub type ProgressFn<'a> = dyn Fn(DownloadProgress) + Send + Sync + 'a;

/// Result of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    pub bytes: u64,
    /// Lowercase hex SHA256 of the archive.
    pub sha256: String,
}

// ============================================================================
// Fetcher Trait
// ============================================================================

/// Downloads an archive to a local file.
///
/// Network failures are returned to the caller and never retried here.
#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: &ProgressFn<'_>,
    ) -> SyncResult<DownloadSummary>;
}

// ============================================================================
// URL Validation
// ============================================================================

/// Checks that a URL is HTTPS and its host is one of `allowed` (or a
/// subdomain of one).
pub fn validate_url(url_str: &str, allowed: &[String]) -> SyncResult<()> {
    let url = Url::parse(url_str)
        .map_err(|e| SyncError::network(url_str, format!("invalid URL: {}", e)))?;

    if url.scheme() != "https" {
        return Err(SyncError::network(url_str, "URL must use HTTPS"));
    }

    let host = url
        .host_str()
        .ok_or_else(|| SyncError::network(url_str, "URL has no host"))?;

    let is_allowed = allowed
        .iter()
        .any(|domain| host == domain.as_str() || host.ends_with(&format!(".{}", domain)));

    if !is_allowed {
        return Err(SyncError::network(
            url_str,
            format!("download host {} is not allowed (allowed: {:?})", host, allowed),
        ));
    }

    Ok(())
}

// ============================================================================
// HTTP Fetcher
// ============================================================================

/// Streams archives over HTTPS from an allow-listed set of hosts.
pub struct HttpArchiveFetcher {
    client: reqwest::Client,
    allowed_hosts: Vec<String>,
    timeout: Duration,
}

impl HttpArchiveFetcher {
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        // The whole-transfer bound is enforced by the store; the client only
        // bounds connection setup.
        let client = reqwest::Client::builder()
            .connect_timeout(config.listing_timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| SyncError::network("<client>", e))?;

        Ok(Self {
            client,
            allowed_hosts: config.allowed_download_hosts.clone(),
            timeout: config.download_timeout,
        })
    }
}

#[async_trait]
impl ArchiveFetcher for HttpArchiveFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: &ProgressFn<'_>,
    ) -> SyncResult<DownloadSummary> {
        info!("Downloading {} to {}", url, dest.display());
        validate_url(url, &self.allowed_hosts)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SyncError::from_reqwest(url, self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::network(url, format!("HTTP {}", status)));
        }

        let total = response.content_length();
        debug!("Content-Length: {:?}", total);

        let mut file = File::create(dest)
            .await
            .map_err(|e| SyncError::io(dest, e))?;

        let mut stream = response.bytes_stream();
        let mut bytes_done: u64 = 0;
        let mut hasher = Sha256::new();

        progress(DownloadProgress::new(0, total));

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| SyncError::from_reqwest(url, self.timeout, e))?;
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| SyncError::io(dest, e))?;
            bytes_done += chunk.len() as u64;
            progress(DownloadProgress::new(bytes_done, total));
        }

        file.flush().await.map_err(|e| SyncError::io(dest, e))?;

        let sha256 = format_sha256_hex(&hasher.finalize());
        info!("Download complete: {} bytes, sha256 {}", bytes_done, sha256);

        Ok(DownloadSummary {
            bytes: bytes_done,
            sha256,
        })
    }
}

/// Formats a SHA256 digest as lowercase hex.
pub(crate) fn format_sha256_hex(hash: &[u8]) -> String {
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts() -> Vec<String> {
        vec!["github.com".into(), "githubusercontent.com".into()]
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(DownloadProgress::new(50, Some(100)).percent(), Some(50.0));
        assert_eq!(DownloadProgress::new(50, None).percent(), None);
        assert_eq!(DownloadProgress::new(0, Some(0)).percent(), Some(0.0));
    }

    #[test]
    fn test_validate_url_https_required() {
        assert!(validate_url("http://github.com/a.zip", &hosts()).is_err());
        assert!(validate_url("https://github.com/a.zip", &hosts()).is_ok());
    }

    #[test]
    fn test_validate_url_allowed_hosts() {
        assert!(validate_url(
            "https://raw.githubusercontent.com/mklement0/fileicon/master/bin/fileicon",
            &hosts()
        )
        .is_ok());
        assert!(validate_url("https://evil.com/a.zip", &hosts()).is_err());
        assert!(validate_url("https://github.com.evil.org/a.zip", &hosts()).is_err());
    }

    #[test]
    fn test_validate_url_invalid() {
        assert!(validate_url("not-a-url", &hosts()).is_err());
        assert!(validate_url("file:///etc/passwd", &hosts()).is_err());
    }

    #[test]
    fn test_format_sha256_hex() {
        let hex = format_sha256_hex(&Sha256::digest(b""));
        assert_eq!(
            hex,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
