//! Application release check against a GitHub "latest release" endpoint.

use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};

const RELEASE_CHECK_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Deserialize)]
struct LatestRelease {
    #[serde(default)]
    tag_name: String,
    #[serde(default)]
    html_url: Option<String>,
}

/// A published release newer than (or different from) the running version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    /// Version with any leading `v` stripped.
    pub version: String,
    pub page_url: Option<String>,
}

/// Checks whether a newer application release has been published.
pub struct ReleaseChecker {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReleaseChecker {
    pub fn new(user_agent: &str) -> SyncResult<Self> {
        let timeout = Duration::from_secs(RELEASE_CHECK_TIMEOUT_SECS);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| SyncError::network("<client>", e))?;
        Ok(Self { client, timeout })
    }

    /// Returns the latest release if its version differs from `current`.
    pub async fn check(&self, url: &str, current: &str) -> SyncResult<Option<ReleaseInfo>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SyncError::from_reqwest(url, self.timeout, e))?;

        if !response.status().is_success() {
            return Err(SyncError::network(url, format!("HTTP {}", response.status())));
        }

        let release: LatestRelease = response
            .json()
            .await
            .map_err(|e| SyncError::from_reqwest(url, self.timeout, e))?;

        let update = compare_release(&release, current);
        match &update {
            Some(info) => info!("Release {} available (running {})", info.version, current),
            None => debug!("Running the latest release {}", current),
        }
        Ok(update)
    }
}

fn compare_release(release: &LatestRelease, current: &str) -> Option<ReleaseInfo> {
    let latest = release.tag_name.trim().trim_start_matches('v');
    let current = current.trim().trim_start_matches('v');
    if latest.is_empty() || latest == current {
        return None;
    }
    Some(ReleaseInfo {
        version: latest.to_string(),
        page_url: release.html_url.clone(),
    })
}
