//! Applying and reverting overlays.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::discovery::{TargetEntity, TARGET_EXTENSION};
use super::helper::IconHelper;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::store::LocalPackHandle;

/// Name of the reference link inside an overlay directory.
pub const MARKER: &str = "Contents";

// ============================================================================
// Reports
// ============================================================================

/// A target whose overlay could not be applied.
#[derive(Debug)]
pub struct TargetFailure {
    pub target: String,
    pub error: SyncError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStatus {
    Complete,
    Partial { failed: usize },
}

/// Outcome of [`OverlayInstaller::apply`].
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Target ids that now carry an overlay.
    pub applied: Vec<String>,
    /// Target ids with no matching asset.
    pub skipped: Vec<String>,
    pub failures: Vec<TargetFailure>,
}

impl ApplyReport {
    pub fn status(&self) -> ApplyStatus {
        if self.failures.is_empty() {
            ApplyStatus::Complete
        } else {
            ApplyStatus::Partial {
                failed: self.failures.len(),
            }
        }
    }

    /// Converts failures into [`SyncError::PartialApply`], returning the
    /// applied count otherwise.
    pub fn ensure_complete(&self) -> SyncResult<usize> {
        match self.status() {
            ApplyStatus::Complete => Ok(self.applied.len()),
            ApplyStatus::Partial { failed } => Err(SyncError::PartialApply {
                failed,
                total: failed + self.applied.len(),
            }),
        }
    }
}

/// Which overlays [`OverlayInstaller::revert`] removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertScope {
    /// One target, by id (e.g. `Safari.app`).
    Target(String),
    All,
}

// ============================================================================
// Overlay Installer
// ============================================================================

/// Creates and removes overlays under the user apps root.
pub struct OverlayInstaller {
    root: PathBuf,
    helper: Arc<dyn IconHelper>,
}

impl OverlayInstaller {
    pub fn new(config: &SyncConfig, helper: Arc<dyn IconHelper>) -> Self {
        Self::with_root(config.user_apps_root.clone(), helper)
    }

    pub fn with_root(root: PathBuf, helper: Arc<dyn IconHelper>) -> Self {
        Self { root, helper }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the overlay for `target_id` lives. The id must be a single
    /// `*.app` file name, so the result is always directly under the root.
    pub fn overlay_path(&self, target_id: &str) -> SyncResult<PathBuf> {
        validate_target_id(target_id)?;
        Ok(self.root.join(target_id))
    }

    pub fn helper_available(&self) -> bool {
        self.helper.is_available()
    }

    /// Overlays every target that has a matching asset in `pack`.
    ///
    /// A missing helper fails the whole call before anything is touched.
    /// Otherwise each target's failure is recorded in the report and the
    /// remaining targets are still processed.
    pub async fn apply(
        &self,
        targets: &[TargetEntity],
        pack: &LocalPackHandle,
    ) -> SyncResult<ApplyReport> {
        if !self.helper.is_available() {
            return Err(SyncError::HelperMissing {
                helper: self.helper.name().to_string(),
            });
        }

        fs::create_dir_all(&self.root).map_err(|e| SyncError::io(&self.root, e))?;

        let mut report = ApplyReport::default();
        for target in targets {
            let Some(asset) = pack.find_asset(target.base_name()) else {
                debug!("No asset in '{}' for {}", pack.name, target.id);
                report.skipped.push(target.id.clone());
                continue;
            };

            match self.apply_one(target, &pack.asset_path(asset)).await {
                Ok(()) => {
                    debug!("Overlaid {} with {}", target.id, asset.file_name);
                    report.applied.push(target.id.clone());
                }
                Err(error) => {
                    warn!("Overlay for {} failed: {}", target.id, error);
                    report.failures.push(TargetFailure {
                        target: target.id.clone(),
                        error,
                    });
                }
            }
        }

        info!(
            "Applied {} overlays from '{}' ({} skipped, {} failed)",
            report.applied.len(),
            pack.name,
            report.skipped.len(),
            report.failures.len()
        );
        Ok(report)
    }

    async fn apply_one(&self, target: &TargetEntity, icon: &Path) -> SyncResult<()> {
        let overlay = self.overlay_path(&target.id)?;
        self.clear_existing(&overlay)?;

        fs::create_dir(&overlay).map_err(|e| SyncError::io(&overlay, e))?;

        let result = async {
            create_reference_link(&target.system_path.join(MARKER), &overlay.join(MARKER))?;
            self.helper.set_icon(&overlay, icon).await
        }
        .await;

        if result.is_err() {
            if let Err(e) = remove_overlay_dir(&overlay) {
                warn!("Failed to roll back {}: {}", overlay.display(), e);
            }
        }
        result
    }

    /// Removes whatever occupies an overlay path, refusing to delete
    /// anything that is not a managed overlay or a bare link.
    fn clear_existing(&self, overlay: &Path) -> SyncResult<()> {
        let meta = match fs::symlink_metadata(overlay) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(SyncError::io(overlay, e)),
        };

        if meta.file_type().is_symlink() {
            debug!("Unlinking {}", overlay.display());
            return remove_link(overlay);
        }
        if is_managed(overlay) {
            debug!("Replacing existing overlay {}", overlay.display());
            return remove_overlay_dir(overlay);
        }
        Err(SyncError::UnmanagedOverlay(overlay.to_path_buf()))
    }

    /// Removes managed overlays and returns how many were removed.
    ///
    /// Entries without the marker link are left alone and not counted.
    pub fn revert(&self, scope: &RevertScope) -> SyncResult<usize> {
        let removed = match scope {
            RevertScope::Target(id) => {
                let overlay = self.overlay_path(id)?;
                if is_managed(&overlay) {
                    remove_overlay_dir(&overlay)?;
                    1
                } else {
                    0
                }
            }
            RevertScope::All => {
                let mut removed = 0;
                for id in self.managed_overlays()? {
                    remove_overlay_dir(&self.overlay_path(&id)?)?;
                    removed += 1;
                }
                removed
            }
        };

        info!("Reverted {} overlays", removed);
        Ok(removed)
    }

    /// Checks the filesystem only, so the answer stays right even when the
    /// state file was lost.
    pub fn is_overlaid(&self, target: &TargetEntity) -> bool {
        self.is_overlaid_id(&target.id)
    }

    pub fn is_overlaid_id(&self, target_id: &str) -> bool {
        self.overlay_path(target_id)
            .map(|overlay| is_managed(&overlay))
            .unwrap_or(false)
    }

    /// Ids of every managed overlay under the root, sorted.
    pub fn managed_overlays(&self) -> SyncResult<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SyncError::io(&self.root, e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SyncError::io(&self.root, e))?;
            let id = entry.file_name().to_string_lossy().into_owned();
            if id.ends_with(TARGET_EXTENSION) && is_managed(&entry.path()) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

// ============================================================================
// Filesystem Helpers
// ============================================================================

fn validate_target_id(target_id: &str) -> SyncResult<()> {
    let mut components = Path::new(target_id).components();
    let single_name = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if single_name && target_id.ends_with(TARGET_EXTENSION) {
        Ok(())
    } else {
        Err(SyncError::InvalidTarget(target_id.to_string()))
    }
}

/// A managed overlay is a real directory whose marker entry is a link.
fn is_managed(overlay: &Path) -> bool {
    let is_real_dir = fs::symlink_metadata(overlay)
        .map(|m| m.file_type().is_dir())
        .unwrap_or(false);
    is_real_dir
        && fs::symlink_metadata(overlay.join(MARKER))
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
}

/// Unlinks the marker first so the recursive delete can never reach the
/// original contents.
fn remove_overlay_dir(overlay: &Path) -> SyncResult<()> {
    let marker = overlay.join(MARKER);
    if fs::symlink_metadata(&marker)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
    {
        remove_link(&marker)?;
    }
    fs::remove_dir_all(overlay).map_err(|e| SyncError::io(overlay, e))
}

#[cfg(unix)]
fn create_reference_link(original: &Path, link: &Path) -> SyncResult<()> {
    std::os::unix::fs::symlink(original, link).map_err(|e| SyncError::io(link, e))
}

#[cfg(windows)]
fn create_reference_link(original: &Path, link: &Path) -> SyncResult<()> {
    std::os::windows::fs::symlink_dir(original, link).map_err(|e| SyncError::io(link, e))
}

#[cfg(unix)]
fn remove_link(link: &Path) -> SyncResult<()> {
    fs::remove_file(link).map_err(|e| SyncError::io(link, e))
}

#[cfg(windows)]
fn remove_link(link: &Path) -> SyncResult<()> {
    fs::remove_dir(link)
        .or_else(|_| fs::remove_file(link))
        .map_err(|e| SyncError::io(link, e))
}
