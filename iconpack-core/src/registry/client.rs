//! Registry clients and the concurrent source listing.

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, Stream};
use std::time::Duration;
use tracing::{debug, warn};

use super::source::SourceSpec;
use super::types::{BranchRecord, Pack, SourceListing};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

/// Branch names that are never content packs.
pub const RESERVED_NAMES: &[&str] = &["main", "master"];

fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

// ============================================================================
// Client Trait
// ============================================================================

/// Fetches the packs listed by one registry source.
///
/// Implementations report raw listings; reserved names are filtered by
/// [`list_packs`].
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn fetch_source(&self, source: &str) -> SyncResult<Vec<Pack>>;
}

// ============================================================================
// Fan-out Listing
// ============================================================================

/// Lists every source concurrently, yielding one [`SourceListing`] per source
/// in completion order.
///
/// Each source is bounded by `timeout` independently; a slow or failing
/// source only produces an error entry for itself.
pub fn list_packs<'a>(
    client: &'a dyn RegistryClient,
    sources: &'a [String],
    timeout: Duration,
) -> impl Stream<Item = SourceListing> + Send + 'a {
    sources
        .iter()
        .map(move |source| async move {
            let result = match tokio::time::timeout(timeout, client.fetch_source(source)).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout {
                    url: source.clone(),
                    secs: timeout.as_secs(),
                }),
            };

            let result = result.map(|packs| {
                packs
                    .into_iter()
                    .filter(|pack| !is_reserved(&pack.name))
                    .collect::<Vec<_>>()
            });

            match &result {
                Ok(packs) => debug!("Source {} listed {} packs", source, packs.len()),
                Err(e) => warn!("Source {} failed: {}", source, e),
            }

            SourceListing {
                source: source.clone(),
                result,
            }
        })
        .collect::<FuturesUnordered<_>>()
}

// ============================================================================
// HTTP Client
// ============================================================================

/// Registry client speaking the GitHub branches protocol over HTTPS.
#[derive(Clone)]
pub struct HttpRegistryClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl std::fmt::Debug for HttpRegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRegistryClient")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpRegistryClient {
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        Self::with_timeout(config.listing_timeout, &config.user_agent)
    }

    pub fn with_timeout(timeout: Duration, user_agent: &str) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| SyncError::network("<client>", e))?;

        Ok(Self { client, timeout })
    }

    async fn fetch_records(&self, url: &str) -> SyncResult<Vec<BranchRecord>> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| SyncError::from_reqwest(url, self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::network(url, format!("HTTP {}", status)));
        }

        response
            .json::<Vec<BranchRecord>>()
            .await
            .map_err(|e| SyncError::from_reqwest(url, self.timeout, e))
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn fetch_source(&self, source: &str) -> SyncResult<Vec<Pack>> {
        let spec = SourceSpec::parse(source)?;
        let records = self.fetch_records(source).await?;
        Ok(packs_from_records(&spec, records))
    }
}

/// Converts wire records into packs using the source's URL scheme.
pub(crate) fn packs_from_records(spec: &SourceSpec, records: Vec<BranchRecord>) -> Vec<Pack> {
    let source = spec.display_name();
    records
        .into_iter()
        .map(|record| Pack {
            archive_url: spec.archive_url(&record.name),
            preview_url: spec.preview_url(&record.name),
            source: source.clone(),
            content_id: record.commit.sha,
            name: record.name,
            assets: Vec::new(),
        })
        .collect()
}
