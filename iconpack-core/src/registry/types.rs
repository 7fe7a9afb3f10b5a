//! Registry data types.

use serde::{Deserialize, Serialize};

use crate::error::SyncResult;

/// File extensions recognised as visual assets inside a pack.
pub const ASSET_EXTENSIONS: &[&str] = &["icns", "png", "jpg"];

// ============================================================================
// Wire Records
// ============================================================================

/// One record of a source listing, as returned by the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BranchRecord {
    pub name: String,
    pub commit: CommitRef,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitRef {
    pub sha: String,
}

// ============================================================================
// Packs
// ============================================================================

/// A single visual asset inside a pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// File name relative to the pack root, e.g. `Safari.icns`.
    pub file_name: String,
    /// Lowercased file stem used for prefix matching, e.g. `safari`.
    pub key: String,
}

impl Asset {
    /// Builds an asset descriptor if `file_name` has a recognised extension.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let (stem, ext) = file_name.rsplit_once('.')?;
        if stem.is_empty() || !ASSET_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
            return None;
        }
        Some(Self {
            file_name: file_name.to_string(),
            key: stem.to_lowercase(),
        })
    }

    /// Case-insensitive prefix match against a target's base name.
    pub fn matches(&self, target_base: &str) -> bool {
        !target_base.is_empty() && self.key.starts_with(&target_base.to_lowercase())
    }
}

/// A named, versioned pack listed by a registry source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pack {
    /// Stable identifier, unique per source.
    pub name: String,
    /// Opaque token identifying the exact content (a commit sha).
    pub content_id: String,
    /// Display name of the source that listed it.
    pub source: String,
    /// Where the pack archive is downloaded from.
    pub archive_url: String,
    pub preview_url: Option<String>,
    /// Assets known before download. Registry listings carry none; the
    /// materialized pack's handle lists what is actually on disk.
    pub assets: Vec<Asset>,
}

/// The outcome of listing one source.
#[derive(Debug)]
pub struct SourceListing {
    /// The source URI as configured.
    pub source: String,
    pub result: SyncResult<Vec<Pack>>,
}

impl SourceListing {
    /// Packs from this source, or an empty slice if it failed.
    pub fn packs(&self) -> &[Pack] {
        self.result.as_deref().unwrap_or(&[])
    }
}
