//! Default filesystem locations.
//!
//! - Data root: `{data_dir}/iconpack/` (e.g. `~/Library/Application Support/iconpack`)
//! - Overlay root: `~/Applications/`
//! - Discovery root: `/System/Applications/`

use std::path::PathBuf;

/// Subdirectory name under the platform data directory.
const ICONPACK_DIR: &str = "iconpack";

/// Returns the default base directory for state and downloaded packs.
///
/// Falls back to the OS temp folder when the platform has no data directory.
pub fn default_base_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(ICONPACK_DIR)
}

/// Returns the user-writable root that holds overlay directories.
pub fn default_user_apps_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("Applications")
}

/// Returns the root scanned for target entities.
pub fn default_system_apps_root() -> PathBuf {
    PathBuf::from("/System/Applications")
}

/// Returns the well-known directory the icon helper is installed into.
pub fn default_helper_bin_dir() -> PathBuf {
    PathBuf::from("/usr/local/bin")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_dir_ends_with_app_name() {
        assert!(default_base_dir().ends_with(ICONPACK_DIR));
    }

    #[test]
    fn test_overlay_root_is_applications() {
        assert!(default_user_apps_root().ends_with("Applications"));
        assert_eq!(
            default_system_apps_root(),
            PathBuf::from("/System/Applications")
        );
    }
}
