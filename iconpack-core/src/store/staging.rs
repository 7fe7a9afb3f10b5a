//! Staging directories and the atomic swap of a pack into place.
//!
//! Layout inside the downloads root:
//!
//! - `.staging-<pack>-<uuid>/` scratch space for one materialize call
//! - `.backup-<pack>-<uuid>/` the previous pack while the swap is in progress
//!
//! Both are dot-prefixed so they are never listed as packs.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};

fn staging_prefix(pack: &str) -> String {
    format!(".staging-{}-", pack)
}

fn backup_prefix(pack: &str) -> String {
    format!(".backup-{}-", pack)
}

fn unique_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Whether `name` is `prefix` followed by exactly one unique suffix. Keeps
/// `.staging-dark-blue-<uuid>` from being taken for a `dark` leftover.
fn is_scratch_for(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .map_or(false, |rest| rest.len() == 32 && rest.chars().all(|c| c.is_ascii_hexdigit()))
}

// ============================================================================
// Staging Guard
// ============================================================================

/// A scratch directory removed on drop, so every exit path (error,
/// cancellation, panic) discards partial data.
#[derive(Debug)]
pub struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    pub fn create(root: &Path, pack: &str) -> SyncResult<Self> {
        let path = root.join(format!("{}{}", staging_prefix(pack), unique_suffix()));
        fs::create_dir_all(&path).map_err(|e| SyncError::io(&path, e))?;
        debug!("Created staging dir {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                warn!("Failed to remove staging dir {}: {}", self.path.display(), e);
            }
        }
    }
}

// ============================================================================
// Recovery
// ============================================================================

/// Cleans up leftovers of an interrupted materialize for `pack`.
///
/// Stale staging dirs are deleted. A stale backup is restored if the pack
/// directory is missing (the crash hit mid-swap), otherwise deleted.
pub fn recover_stale(root: &Path, pack: &str) -> SyncResult<()> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(SyncError::io(root, e)),
    };

    let staging = staging_prefix(pack);
    let backup = backup_prefix(pack);
    let destination = root.join(pack);

    for entry in entries {
        let entry = entry.map_err(|e| SyncError::io(root, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();

        if is_scratch_for(&name, &staging) {
            warn!("Removing stale staging dir {}", path.display());
            fs::remove_dir_all(&path).map_err(|e| SyncError::io(&path, e))?;
        } else if is_scratch_for(&name, &backup) {
            if destination.exists() {
                warn!("Removing stale backup {}", path.display());
                fs::remove_dir_all(&path).map_err(|e| SyncError::io(&path, e))?;
            } else {
                warn!("Restoring interrupted backup {}", path.display());
                fs::rename(&path, &destination).map_err(|e| SyncError::io(&destination, e))?;
            }
        }
    }

    Ok(())
}

// ============================================================================
// Swap
// ============================================================================

/// Moves `staged` to `destination`, replacing any existing directory only
/// once the replacement is fully in place.
///
/// The existing directory is first renamed to a backup; if moving the staged
/// tree in fails, the backup is renamed back.
pub fn swap_into_place(staged: &Path, destination: &Path, pack: &str) -> SyncResult<()> {
    let root = destination.parent().unwrap_or_else(|| Path::new("."));
    let backup = root.join(format!("{}{}", backup_prefix(pack), unique_suffix()));
    let had_existing = destination.exists();

    if had_existing {
        fs::rename(destination, &backup).map_err(|e| SyncError::io(destination, e))?;
    }

    if let Err(e) = fs::rename(staged, destination) {
        let err = SyncError::io(destination, e);
        if had_existing {
            if let Err(restore) = fs::rename(&backup, destination) {
                warn!(
                    "Failed to restore {} from {}: {}",
                    destination.display(),
                    backup.display(),
                    restore
                );
            }
        }
        return Err(err);
    }

    if had_existing {
        if let Err(e) = fs::remove_dir_all(&backup) {
            warn!("Failed to remove backup {}: {}", backup.display(), e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SUFFIX: &str = "0123456789abcdef0123456789abcdef";

    fn scratch(kind: &str, pack: &str) -> String {
        format!(".{}-{}-{}", kind, pack, SUFFIX)
    }

    #[test]
    fn test_staging_removed_on_drop() {
        let temp = TempDir::new().unwrap();
        let path = {
            let staging = StagingDir::create(temp.path(), "dark").unwrap();
            fs::write(staging.path().join("partial"), b"x").unwrap();
            staging.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_swap_replaces_existing() {
        let temp = TempDir::new().unwrap();
        let destination = temp.path().join("dark");
        fs::create_dir(&destination).unwrap();
        fs::write(destination.join("old.icns"), b"old").unwrap();

        let staged = temp.path().join("staged");
        fs::create_dir(&staged).unwrap();
        fs::write(staged.join("new.icns"), b"new").unwrap();

        swap_into_place(&staged, &destination, "dark").unwrap();

        assert!(destination.join("new.icns").exists());
        assert!(!destination.join("old.icns").exists());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_failed_swap_restores_existing() {
        let temp = TempDir::new().unwrap();
        let destination = temp.path().join("dark");
        fs::create_dir(&destination).unwrap();
        fs::write(destination.join("old.icns"), b"old").unwrap();

        let err = swap_into_place(&temp.path().join("missing"), &destination, "dark").unwrap_err();

        assert!(matches!(err, SyncError::Io { .. }));
        assert_eq!(fs::read(destination.join("old.icns")).unwrap(), b"old");
    }

    #[test]
    fn test_recover_removes_staging_and_restores_backup() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join(scratch("staging", "dark"))).unwrap();
        fs::create_dir(temp.path().join(scratch("staging", "light"))).unwrap();
        let backup = temp.path().join(scratch("backup", "dark"));
        fs::create_dir(&backup).unwrap();
        fs::write(backup.join("a.icns"), b"a").unwrap();

        recover_stale(temp.path(), "dark").unwrap();

        assert!(!temp.path().join(scratch("staging", "dark")).exists());
        assert!(temp.path().join(scratch("staging", "light")).exists());
        assert!(temp.path().join("dark/a.icns").exists());
        assert!(!backup.exists());
    }

    #[test]
    fn test_recover_ignores_packs_sharing_a_prefix() {
        let temp = TempDir::new().unwrap();
        let other = temp.path().join(scratch("staging", "dark-blue"));
        fs::create_dir(&other).unwrap();

        recover_stale(temp.path(), "dark").unwrap();

        assert!(other.exists());
    }

    #[test]
    fn test_recover_drops_backup_when_pack_present() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("dark")).unwrap();
        fs::create_dir(temp.path().join(scratch("backup", "dark"))).unwrap();

        recover_stale(temp.path(), "dark").unwrap();

        assert!(temp.path().join("dark").exists());
        assert!(!temp.path().join(scratch("backup", "dark")).exists());
    }

    #[test]
    fn test_recover_missing_root() {
        let temp = TempDir::new().unwrap();
        recover_stale(&temp.path().join("nope"), "dark").unwrap();
    }
}
