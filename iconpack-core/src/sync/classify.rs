//! Pack classification against local state.
//!
//! Status is derived fresh on every listing and never persisted.

use std::fmt;

use crate::registry::Pack;
use crate::state::LocalState;

/// Where a remote pack stands relative to what is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackStatus {
    NotInstalled,
    /// A sync for this pack is in flight.
    Installing,
    Installed,
    UpdateAvailable { installed: String, available: String },
}

impl PackStatus {
    pub fn is_installed(&self) -> bool {
        matches!(self, Self::Installed | Self::UpdateAvailable { .. })
    }

    pub fn has_update(&self) -> bool {
        matches!(self, Self::UpdateAvailable { .. })
    }
}

impl fmt::Display for PackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInstalled => write!(f, "not installed"),
            Self::Installing => write!(f, "installing"),
            Self::Installed => write!(f, "installed"),
            Self::UpdateAvailable { .. } => write!(f, "update available"),
        }
    }
}

/// Classifies one remote pack by comparing content identifiers.
pub fn classify(pack: &Pack, state: &LocalState) -> PackStatus {
    match state.installed_content_id(&pack.name) {
        None => PackStatus::NotInstalled,
        Some(installed) if installed == pack.content_id => PackStatus::Installed,
        Some(installed) => PackStatus::UpdateAvailable {
            installed: installed.to_string(),
            available: pack.content_id.clone(),
        },
    }
}

/// A listed pack with its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedPack {
    pub pack: Pack,
    pub status: PackStatus,
}
