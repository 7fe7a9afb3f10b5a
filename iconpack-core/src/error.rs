//! Error taxonomy for pack sync and overlay operations.
//!
//! Every failure crossing a component boundary is one of these variants, and
//! each message names the URL, path, or pack involved.

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the core crate.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors produced by the registry, store, state, overlay, and sync layers.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Network error for {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("Request to {url} timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    #[error("Failed to extract pack '{pack}': {reason}")]
    Extraction { pack: String, reason: String },

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Icon helper '{helper}' is not installed (run `iconpack install-helper`)")]
    HelperMissing { helper: String },

    #[error("Icon helper failed for {}: {reason}", target.display())]
    Helper { target: PathBuf, reason: String },

    #[error("{failed} of {total} overlays failed to apply")]
    PartialApply { failed: usize, total: usize },

    #[error("State file {} is corrupt: {reason}", path.display())]
    StateCorrupt { path: PathBuf, reason: String },

    #[error("Operation on pack '{pack}' was cancelled")]
    Cancelled { pack: String },

    #[error("Pack '{0}' is not present on disk")]
    UnknownPack(String),

    #[error("No icon pack is installed; sync one first")]
    NoActivePack,

    #[error("{} exists and is not a managed overlay; leaving it alone", .0.display())]
    UnmanagedOverlay(PathBuf),

    #[error("'{0}' is not an application name")]
    InvalidTarget(String),
}

impl SyncError {
    /// Wraps an IO error with the path it occurred on.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn network(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn extraction(pack: impl Into<String>, reason: impl ToString) -> Self {
        Self::Extraction {
            pack: pack.into(),
            reason: reason.to_string(),
        }
    }

    /// Maps a transport error, keeping timeouts distinct.
    pub fn from_reqwest(url: &str, timeout: Duration, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
                secs: timeout.as_secs(),
            }
        } else {
            Self::network(url, err)
        }
    }

    /// Whether the caller may reasonably retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_subject() {
        let err = SyncError::io("/tmp/x", std::io::Error::other("disk full"));
        assert_eq!(err.to_string(), "IO error at /tmp/x: disk full");

        let err = SyncError::extraction("dark", "no top-level directory");
        assert!(err.to_string().contains("'dark'"));

        let err = SyncError::Timeout {
            url: "https://api.github.com/x".into(),
            secs: 8,
        };
        assert!(err.to_string().contains("8s"));
    }

    #[test]
    fn test_retryable() {
        assert!(SyncError::network("u", "reset").is_retryable());
        assert!(SyncError::Timeout {
            url: "u".into(),
            secs: 1
        }
        .is_retryable());
        assert!(!SyncError::extraction("p", "bad").is_retryable());
        assert!(!SyncError::HelperMissing {
            helper: "fileicon".into()
        }
        .is_retryable());
    }
}
