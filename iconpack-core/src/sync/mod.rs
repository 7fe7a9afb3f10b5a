//! Orchestration of listing, classification, materialization, and overlays.

mod classify;
mod engine;

pub use classify::{classify, ClassifiedPack, PackStatus};
pub use engine::{Refresh, SourceFailure, SyncEngine};
