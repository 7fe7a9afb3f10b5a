//! The external icon-substitution helper.
//!
//! Setting a custom icon is delegated to the `fileicon` script
//! (`fileicon set <path> <icon>`). The core only needs to locate it, run it,
//! and report its absence distinctly.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{SyncConfig, HELPER_NAME, HELPER_URL};
use crate::error::{SyncError, SyncResult};
use crate::store::{make_executable, ArchiveFetcher, DownloadProgress};

// ============================================================================
// Helper Trait
// ============================================================================

/// Sets the visual asset of a filesystem path.
#[async_trait]
pub trait IconHelper: Send + Sync {
    /// Name reported in [`SyncError::HelperMissing`].
    fn name(&self) -> &str;

    fn is_available(&self) -> bool;

    async fn set_icon(&self, target: &Path, icon: &Path) -> SyncResult<()>;
}

// ============================================================================
// fileicon
// ============================================================================

/// Runs the `fileicon` script as a child process.
#[derive(Debug, Clone)]
pub struct FileIconHelper {
    explicit_path: Option<PathBuf>,
    bin_dir: PathBuf,
    timeout: Duration,
}

impl FileIconHelper {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            explicit_path: config.helper_path.clone(),
            bin_dir: config.helper_bin_dir.clone(),
            timeout: config.helper_timeout,
        }
    }

    /// Finds the helper: the configured path, then `PATH`, then the bin dir.
    pub fn locate(&self) -> Option<PathBuf> {
        if let Some(path) = &self.explicit_path {
            return path.is_file().then(|| path.clone());
        }

        let on_path = std::env::var_os("PATH").and_then(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(HELPER_NAME))
                .find(|candidate| candidate.is_file())
        });

        on_path.or_else(|| {
            let fallback = self.bin_dir.join(HELPER_NAME);
            fallback.is_file().then_some(fallback)
        })
    }
}

#[async_trait]
impl IconHelper for FileIconHelper {
    fn name(&self) -> &str {
        HELPER_NAME
    }

    fn is_available(&self) -> bool {
        self.locate().is_some()
    }

    async fn set_icon(&self, target: &Path, icon: &Path) -> SyncResult<()> {
        let helper = self.locate().ok_or_else(|| SyncError::HelperMissing {
            helper: HELPER_NAME.to_string(),
        })?;

        debug!(
            "Running {} set {} {}",
            helper.display(),
            target.display(),
            icon.display()
        );

        let child = Command::new(&helper)
            .arg("set")
            .arg(target)
            .arg(icon)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SyncError::Helper {
                target: target.to_path_buf(),
                reason: format!("failed to spawn {}: {}", helper.display(), e),
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| SyncError::Helper {
                target: target.to_path_buf(),
                reason: format!("timed out after {}s", self.timeout.as_secs()),
            })?
            .map_err(|e| SyncError::io(target, e))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(SyncError::Helper {
                target: target.to_path_buf(),
                reason: format!("{} ({})", stderr.trim(), output.status),
            })
        }
    }
}

// ============================================================================
// Just-in-time Install
// ============================================================================

/// Downloads the helper script and places it in a bin directory.
///
/// Privilege elevation is the caller's business: the destination must
/// already be writable by this process.
pub struct HelperInstaller {
    fetcher: Arc<dyn ArchiveFetcher>,
    url: String,
}

impl HelperInstaller {
    pub fn new(fetcher: Arc<dyn ArchiveFetcher>) -> Self {
        Self::with_url(fetcher, HELPER_URL)
    }

    pub fn with_url(fetcher: Arc<dyn ArchiveFetcher>, url: &str) -> Self {
        Self {
            fetcher,
            url: url.to_string(),
        }
    }

    /// Installs the helper as `<bin_dir>/fileicon` and returns its path.
    pub async fn install(&self, bin_dir: &Path) -> SyncResult<PathBuf> {
        info!("Installing {} into {}", HELPER_NAME, bin_dir.display());

        tokio::fs::create_dir_all(bin_dir)
            .await
            .map_err(|e| SyncError::io(bin_dir, e))?;

        let dest = bin_dir.join(HELPER_NAME);
        let temp = bin_dir.join(format!(".{}.{}.tmp", HELPER_NAME, uuid::Uuid::new_v4().simple()));

        let result = async {
            let progress = |p: DownloadProgress| {
                if let Some(percent) = p.percent() {
                    debug!("{} download progress: {:.1}%", HELPER_NAME, percent);
                }
            };
            self.fetcher.fetch(&self.url, &temp, &progress).await?;
            make_executable(&temp)?;
            tokio::fs::rename(&temp, &dest)
                .await
                .map_err(|e| SyncError::io(&dest, e))
        }
        .await;

        if let Err(e) = &result {
            warn!("Helper install failed: {}", e);
            let _ = tokio::fs::remove_file(&temp).await;
        }
        result?;

        info!("Installed {}", dest.display());
        Ok(dest)
    }
}
