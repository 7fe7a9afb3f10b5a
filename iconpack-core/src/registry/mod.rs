//! Remote pack registry.
//!
//! A registry source is an HTTP endpoint returning branch-like records
//! (`name` + `commit.sha`). Every branch other than the reserved default
//! branches is a pack, and its commit sha is the pack's content identifier.
//!
//! Sources are fetched concurrently and each source's failure is reported
//! only against that source.

mod client;
mod release;
mod source;
mod types;

pub use client::{list_packs, HttpRegistryClient, RegistryClient, RESERVED_NAMES};
pub use release::{ReleaseChecker, ReleaseInfo};
pub use source::SourceSpec;
pub use types::{Asset, BranchRecord, CommitRef, Pack, SourceListing, ASSET_EXTENSIONS};

#[cfg(test)]
pub(crate) use client::tests::FakeRegistry;
