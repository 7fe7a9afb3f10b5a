//! Pack archive extraction.
//!
//! Pack archives are zip files whose entries all live under one top-level
//! directory. Extraction is blocking and checks for cancellation between
//! entries.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};

/// Top-level entries some archivers add that are never pack content.
const IGNORED_ROOTS: &[&str] = &["__MACOSX"];

/// Extracts `archive_path` into `dest_dir` and returns the archive's single
/// top-level directory.
pub fn extract_pack_archive(
    archive_path: &Path,
    dest_dir: &Path,
    pack: &str,
    cancel: &CancellationToken,
) -> SyncResult<PathBuf> {
    info!(
        "Extracting {} to {}",
        archive_path.display(),
        dest_dir.display()
    );

    fs::create_dir_all(dest_dir).map_err(|e| SyncError::io(dest_dir, e))?;

    let file = File::open(archive_path).map_err(|e| SyncError::io(archive_path, e))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| SyncError::extraction(pack, e))?;

    let mut roots = BTreeSet::new();

    for i in 0..archive.len() {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled {
                pack: pack.to_string(),
            });
        }

        let mut entry = archive
            .by_index(i)
            .map_err(|e| SyncError::extraction(pack, e))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => path.to_owned(),
            None => {
                debug!("Skipping unsafe path in zip: {}", entry.name());
                continue;
            }
        };

        let root = match entry_path.components().next() {
            Some(Component::Normal(root)) => root.to_string_lossy().into_owned(),
            _ => continue,
        };
        if IGNORED_ROOTS.contains(&root.as_str()) {
            continue;
        }
        roots.insert(root);

        let dest_path = dest_dir.join(&entry_path);

        if entry.is_dir() {
            fs::create_dir_all(&dest_path).map_err(|e| SyncError::io(&dest_path, e))?;
            continue;
        }

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }

        let mut outfile = File::create(&dest_path).map_err(|e| SyncError::io(&dest_path, e))?;
        io::copy(&mut entry, &mut outfile).map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                SyncError::extraction(pack, format!("{}: {}", entry_path.display(), e))
            }
            _ => SyncError::io(&dest_path, e),
        })?;

        #[cfg(unix)]
        set_unix_permissions(&dest_path, entry.unix_mode())?;
    }

    let mut roots = roots.into_iter();
    match (roots.next(), roots.next()) {
        (Some(root), None) if dest_dir.join(&root).is_dir() => {
            debug!("Archive root for '{}' is {}", pack, root);
            Ok(dest_dir.join(root))
        }
        (None, _) => Err(SyncError::extraction(pack, "archive is empty")),
        _ => Err(SyncError::extraction(
            pack,
            "archive must contain exactly one top-level directory",
        )),
    }
}

// ============================================================================
// Unix Permissions
// ============================================================================

#[cfg(unix)]
fn set_unix_permissions(path: &Path, mode: Option<u32>) -> SyncResult<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(mode) = mode {
        if mode & 0o111 != 0 {
            fs::set_permissions(path, fs::Permissions::from_mode(mode | 0o755))
                .map_err(|e| SyncError::io(path, e))?;
        }
    }

    Ok(())
}

/// Sets executable permission on a file (Unix only).
#[allow(unused_variables)]
pub fn make_executable(path: &Path) -> SyncResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut permissions = fs::metadata(path)
            .map_err(|e| SyncError::io(path, e))?
            .permissions();
        permissions.set_mode(permissions.mode() | 0o755);
        fs::set_permissions(path, permissions).map_err(|e| SyncError::io(path, e))?;

        debug!("Set executable permission on {}", path.display());
    }

    Ok(())
}
