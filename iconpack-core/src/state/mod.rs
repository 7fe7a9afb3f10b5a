//! Persisted local state.
//!
//! The state file (`config.json`) records which packs are installed at which
//! content identifier, the active pack, user settings, and the overlays this
//! system applied. It is loaded once and every mutation is committed with an
//! atomic replace under a single in-process lock.

mod local;
mod store;

pub use local::{LocalState, OverlayEntry, DEFAULT_LANGUAGE};
pub use store::{load, save, try_load, StateStore};
