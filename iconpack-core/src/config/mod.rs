//! Configuration module for iconpack.
//!
//! All components take an explicitly constructed [`SyncConfig`]; there is no
//! process-wide configuration object.

pub mod paths;
mod settings;

pub use settings::{SyncConfig, DEFAULT_SOURCE, HELPER_NAME, HELPER_URL, RELEASES_URL};
