//! Target entity discovery and asset matching.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::registry::Asset;
use crate::store::LocalPackHandle;

/// Directory suffix of overlay-able entities.
pub const TARGET_EXTENSION: &str = ".app";

/// An installed application that may receive an overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetEntity {
    /// Directory name, e.g. `Safari.app`. Also the overlay directory name.
    pub id: String,
    /// Name without the extension, e.g. `Safari`.
    pub display_name: String,
    pub system_path: PathBuf,
}

impl TargetEntity {
    /// Builds an entity from an app bundle path.
    pub fn from_path(system_path: PathBuf) -> Option<Self> {
        let id = system_path.file_name()?.to_string_lossy().into_owned();
        let display_name = id.strip_suffix(TARGET_EXTENSION)?.to_string();
        if display_name.is_empty() {
            return None;
        }
        Some(Self {
            id,
            display_name,
            system_path,
        })
    }

    /// Base name used for asset matching.
    pub fn base_name(&self) -> &str {
        &self.display_name
    }
}

/// Lists `*.app` entries under `root`, sorted by id. A missing root yields
/// no targets.
pub fn discover_targets(root: &Path) -> SyncResult<Vec<TargetEntity>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Target root {} does not exist", root.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(SyncError::io(root, e)),
    };

    let mut targets = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SyncError::io(root, e))?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(target) = TargetEntity::from_path(entry.path()) {
            targets.push(target);
        }
    }
    targets.sort_by(|a, b| a.id.cmp(&b.id));
    debug!("Discovered {} targets under {}", targets.len(), root.display());
    Ok(targets)
}

/// A target paired with the asset that would be applied to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchCandidate {
    pub target: TargetEntity,
    pub asset: Asset,
    pub asset_path: PathBuf,
    /// Whether a managed overlay currently exists.
    pub overlaid: bool,
}

/// Pairs each target with its first matching asset; unmatched targets are
/// left out.
pub fn match_targets(
    targets: &[TargetEntity],
    pack: &LocalPackHandle,
    is_overlaid: impl Fn(&TargetEntity) -> bool,
) -> Vec<PatchCandidate> {
    targets
        .iter()
        .filter_map(|target| {
            let asset = pack.find_asset(target.base_name())?;
            Some(PatchCandidate {
                target: target.clone(),
                asset: asset.clone(),
                asset_path: pack.asset_path(asset),
                overlaid: is_overlaid(target),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_target_from_path() {
        let target = TargetEntity::from_path(PathBuf::from("/System/Applications/Safari.app"))
            .unwrap();
        assert_eq!(target.id, "Safari.app");
        assert_eq!(target.base_name(), "Safari");

        assert!(TargetEntity::from_path(PathBuf::from("/x/Utilities")).is_none());
        assert!(TargetEntity::from_path(PathBuf::from("/x/.app")).is_none());
    }

    #[test]
    fn test_discover_only_app_dirs() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("Safari.app")).unwrap();
        fs::create_dir(temp.path().join("Mail.app")).unwrap();
        fs::create_dir(temp.path().join("Utilities")).unwrap();
        fs::write(temp.path().join("Fake.app"), b"file").unwrap();

        let ids: Vec<_> = discover_targets(temp.path())
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["Mail.app", "Safari.app"]);
    }

    #[test]
    fn test_discover_missing_root() {
        let temp = TempDir::new().unwrap();
        assert!(discover_targets(&temp.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn test_match_targets() {
        let temp = TempDir::new().unwrap();
        let pack_root = temp.path().join("dark");
        fs::create_dir(&pack_root).unwrap();
        fs::write(pack_root.join("safari.icns"), b"s").unwrap();
        fs::write(pack_root.join("Notes.png"), b"n").unwrap();
        let pack = LocalPackHandle::open(pack_root.clone()).unwrap();

        let targets = vec![
            TargetEntity::from_path(PathBuf::from("/A/Safari.app")).unwrap(),
            TargetEntity::from_path(PathBuf::from("/A/Mail.app")).unwrap(),
            TargetEntity::from_path(PathBuf::from("/A/Notes.app")).unwrap(),
        ];

        let candidates = match_targets(&targets, &pack, |t| t.id == "Notes.app");

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].target.id, "Safari.app");
        assert_eq!(candidates[0].asset_path, pack_root.join("safari.icns"));
        assert!(!candidates[0].overlaid);
        assert!(candidates[1].overlaid);
    }
}
