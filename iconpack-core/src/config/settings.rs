//! Runtime configuration passed to every component constructor.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths;
use crate::error::{SyncError, SyncResult};

/// Registry source used when the state file lists none.
pub const DEFAULT_SOURCE: &str = "https://api.github.com/repos/bertidiego/SkinX-icons/branches";

/// Latest-release endpoint for the application update check.
pub const RELEASES_URL: &str = "https://api.github.com/repos/bertidiego/SkinX/releases/latest";

/// Name of the external icon-substitution helper.
pub const HELPER_NAME: &str = "fileicon";

/// Fixed download location of the helper script.
pub const HELPER_URL: &str =
    "https://raw.githubusercontent.com/mklement0/fileicon/master/bin/fileicon";

/// Configuration for the sync engine and its collaborators.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Holds `config.json` and `downloads/`.
    pub base_dir: PathBuf,
    /// Root scanned for target entities (`*.app`).
    pub system_apps_root: PathBuf,
    /// Root overlays are created under.
    pub user_apps_root: PathBuf,
    /// Per-source listing timeout.
    pub listing_timeout: Duration,
    /// Whole-transfer timeout for one pack archive.
    pub download_timeout: Duration,
    /// Timeout for a single helper invocation.
    pub helper_timeout: Duration,
    /// Explicit helper location; otherwise `PATH` and the bin dir are searched.
    pub helper_path: Option<PathBuf>,
    /// Directory the helper is installed into by the just-in-time flow.
    pub helper_bin_dir: PathBuf,
    /// Hosts archive and helper downloads may come from.
    pub allowed_download_hosts: Vec<String>,
    pub user_agent: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::with_base_dir(paths::default_base_dir())
    }
}

impl SyncConfig {
    /// Creates a configuration rooted at `base_dir` with default everything else.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            system_apps_root: paths::default_system_apps_root(),
            user_apps_root: paths::default_user_apps_root(),
            listing_timeout: Duration::from_secs(8),
            download_timeout: Duration::from_secs(120),
            helper_timeout: Duration::from_secs(30),
            helper_path: None,
            helper_bin_dir: paths::default_helper_bin_dir(),
            allowed_download_hosts: vec![
                "github.com".to_string(),
                "githubusercontent.com".to_string(),
            ],
            user_agent: format!("iconpack/{}", crate::VERSION),
        }
    }

    /// Path of the persisted state file.
    ///
    /// Path: `{base}/config.json`
    pub fn state_path(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Root of the materialized packs.
    ///
    /// Path: `{base}/downloads/`
    pub fn downloads_dir(&self) -> PathBuf {
        self.base_dir.join("downloads")
    }

    /// Directory of one materialized pack.
    pub fn pack_dir(&self, name: &str) -> PathBuf {
        self.downloads_dir().join(name)
    }

    /// Ensures the base and downloads directories exist.
    pub fn ensure_dirs_exist(&self) -> SyncResult<()> {
        create_dir(&self.base_dir)?;
        create_dir(&self.downloads_dir())
    }
}

fn create_dir(path: &Path) -> SyncResult<()> {
    std::fs::create_dir_all(path).map_err(|e| SyncError::io(path, e))
}
