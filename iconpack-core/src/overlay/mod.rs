//! Filesystem overlays for target entities.
//!
//! An overlay for `Safari.app` is a directory `<user_apps_root>/Safari.app/`
//! holding a `Contents` link to the original app's `Contents` plus a custom
//! icon set by the external helper. The `Contents` link doubles as the marker
//! identifying overlays this system created; directories without it are
//! never touched.

mod discovery;
mod helper;
mod installer;

pub use discovery::{discover_targets, match_targets, PatchCandidate, TargetEntity, TARGET_EXTENSION};
pub use helper::{FileIconHelper, HelperInstaller, IconHelper};
pub use installer::{ApplyReport, ApplyStatus, OverlayInstaller, RevertScope, TargetFailure, MARKER};

#[cfg(test)]
pub(crate) use helper::tests::FakeHelper;
