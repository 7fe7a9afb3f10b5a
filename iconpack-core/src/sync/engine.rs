//! The sync engine.
//!
//! Owns one of each component and sequences them:
//!
//! ```text
//! registry ─▶ classify ─▶ store.materialize ─▶ state (installed, active)
//!                                  │
//!                                  └─▶ overlays.apply ─▶ state (overlays)
//! ```
//!
//! State is only written after the filesystem change it describes has
//! happened, so state never names a pack or overlay that is not on disk.

use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::classify::{classify, ClassifiedPack, PackStatus};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::overlay::{
    discover_targets, match_targets, ApplyReport, FileIconHelper, IconHelper, OverlayInstaller,
    PatchCandidate, RevertScope,
};
use crate::registry::{list_packs, HttpRegistryClient, Pack, RegistryClient};
use crate::state::{LocalState, StateStore};
use crate::store::{ArchiveFetcher, HttpArchiveFetcher, LocalPackHandle, PackStore, ProgressFn};

/// A source that could not be listed.
#[derive(Debug)]
pub struct SourceFailure {
    pub source: String,
    pub error: SyncError,
}

/// Result of listing every configured source.
#[derive(Debug, Default)]
pub struct Refresh {
    /// Packs in source order, then listing order.
    pub packs: Vec<ClassifiedPack>,
    pub failures: Vec<SourceFailure>,
}

impl Refresh {
    pub fn find(&self, name: &str) -> Option<&ClassifiedPack> {
        self.packs.iter().find(|p| p.pack.name == name)
    }

    pub fn updates(&self) -> impl Iterator<Item = &ClassifiedPack> {
        self.packs.iter().filter(|p| p.status.has_update())
    }
}

/// Marks a pack as installing for as long as it lives.
struct InstallingGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    name: String,
}

impl<'a> InstallingGuard<'a> {
    fn new(set: &'a Mutex<HashSet<String>>, name: &str) -> Self {
        set.lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string());
        Self {
            set,
            name: name.to_string(),
        }
    }
}

impl Drop for InstallingGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.name);
    }
}

/// Coordinates the registry, pack store, local state, and overlays.
pub struct SyncEngine {
    config: SyncConfig,
    registry: Arc<dyn RegistryClient>,
    store: PackStore,
    state: StateStore,
    overlays: OverlayInstaller,
    installing: Mutex<HashSet<String>>,
}

impl SyncEngine {
    /// Creates an engine backed by HTTP and the `fileicon` helper.
    pub fn new(config: SyncConfig) -> SyncResult<Self> {
        config.ensure_dirs_exist()?;
        let registry = Arc::new(HttpRegistryClient::new(&config)?);
        let fetcher = Arc::new(HttpArchiveFetcher::new(&config)?);
        let helper = Arc::new(FileIconHelper::new(&config));
        Ok(Self::with_parts(config, registry, fetcher, helper))
    }

    /// Creates an engine from explicit collaborators.
    pub fn with_parts(
        config: SyncConfig,
        registry: Arc<dyn RegistryClient>,
        fetcher: Arc<dyn ArchiveFetcher>,
        helper: Arc<dyn IconHelper>,
    ) -> Self {
        info!("SyncEngine initialized. Base dir: {}", config.base_dir.display());
        Self {
            store: PackStore::new(&config, fetcher),
            state: StateStore::open(config.state_path()),
            overlays: OverlayInstaller::new(&config, helper),
            registry,
            config,
            installing: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &PackStore {
        &self.store
    }

    pub fn overlays(&self) -> &OverlayInstaller {
        &self.overlays
    }

    /// A copy of the current persisted state.
    pub async fn state(&self) -> LocalState {
        self.state.snapshot().await
    }

    // ========================================================================
    // Listing
    // ========================================================================

    /// Lists every configured source concurrently and classifies each pack.
    pub async fn refresh(&self) -> Refresh {
        let state = self.state.snapshot().await;
        let sources = state.effective_sources();

        let mut by_source: HashMap<String, Vec<Pack>> = HashMap::new();
        let mut refresh = Refresh::default();

        let mut listings = list_packs(self.registry.as_ref(), &sources, self.config.listing_timeout);
        while let Some(listing) = listings.next().await {
            match listing.result {
                Ok(packs) => {
                    by_source.insert(listing.source, packs);
                }
                Err(error) => refresh.failures.push(SourceFailure {
                    source: listing.source,
                    error,
                }),
            }
        }

        let installing = self.installing_names();
        let mut seen = HashSet::new();
        for source in &sources {
            for pack in by_source.remove(source).unwrap_or_default() {
                if !seen.insert(pack.name.clone()) {
                    warn!(
                        "Pack '{}' from {} shadowed by an earlier source",
                        pack.name, pack.source
                    );
                    continue;
                }
                let status = if installing.contains(&pack.name) {
                    PackStatus::Installing
                } else {
                    classify(&pack, &state)
                };
                refresh.packs.push(ClassifiedPack { pack, status });
            }
        }

        info!(
            "Listed {} packs from {} sources ({} failed)",
            refresh.packs.len(),
            sources.len(),
            refresh.failures.len()
        );
        refresh
    }

    /// Installed packs whose remote content changed.
    pub async fn check_updates(&self) -> Vec<ClassifiedPack> {
        self.refresh()
            .await
            .packs
            .into_iter()
            .filter(|p| p.status.has_update())
            .collect()
    }

    fn installing_names(&self) -> HashSet<String> {
        self.installing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // ========================================================================
    // Packs
    // ========================================================================

    /// Materializes `pack`, then records it as installed and active.
    ///
    /// If materializing fails or is cancelled, state is not touched. The
    /// pack's lock is held until state is written, so a concurrent
    /// [`remove_pack`](Self::remove_pack) sees both changes or neither.
    pub async fn sync(
        &self,
        pack: &Pack,
        progress: &ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> SyncResult<LocalPackHandle> {
        let _installing = InstallingGuard::new(&self.installing, &pack.name);

        let lock = self.store.pack_lock(&pack.name).await;
        let _held = lock.lock().await;

        let handle = self.store.materialize_locked(pack, progress, cancel).await?;

        self.state
            .transact(|state| {
                state.mark_installed(&pack.name, &pack.content_id);
                state.set_active(&pack.name);
            })
            .await?;

        info!("Synced '{}' at {}", pack.name, pack.content_id);
        Ok(handle)
    }

    /// Makes an already materialized pack the active one.
    pub async fn select(&self, name: &str) -> SyncResult<()> {
        self.store.open(name)?;
        self.state.transact(|state| state.set_active(name)).await?;
        info!("Selected pack '{}'", name);
        Ok(())
    }

    /// The active pack: the selected one if it is on disk, otherwise the
    /// first local pack by name.
    pub async fn active_pack(&self) -> SyncResult<Option<LocalPackHandle>> {
        let selected = self.state.snapshot().await.active_pack;
        let local = self.store.list_local_packs()?;

        let name = match selected {
            Some(name) if local.contains(&name) => Some(name),
            _ => local.into_iter().next(),
        };
        name.map(|name| self.store.open(&name)).transpose()
    }

    /// Forgets a pack and deletes its directory. Overlays made from it stay
    /// in place; they reference the original apps, not pack data.
    pub async fn remove_pack(&self, name: &str) -> SyncResult<()> {
        let lock = self.store.pack_lock(name).await;
        let _held = lock.lock().await;
        self.state.transact(|state| state.forget_pack(name)).await?;
        self.store.remove_locked(name)
    }

    /// Resets installed packs and deletes all pack data. Returns the number
    /// of pack directories removed.
    ///
    /// State is cleared first: an interruption can leave unreferenced pack
    /// data behind but never state naming a deleted pack. Each pack is then
    /// forgotten again under its lock, undoing a sync that finished in
    /// between.
    pub async fn clear_cache(&self) -> SyncResult<usize> {
        self.state.transact(|state| state.clear_cache()).await?;

        let packs = self.store.list_local_packs()?;
        for name in &packs {
            let lock = self.store.pack_lock(name).await;
            let _held = lock.lock().await;
            self.state.transact(|state| state.forget_pack(name)).await?;
            self.store.remove_locked(name)?;
        }

        info!("Cleared cache ({} packs removed)", packs.len());
        Ok(packs.len())
    }

    // ========================================================================
    // Overlays
    // ========================================================================

    /// Targets on this system that have an asset in the active pack.
    pub async fn patch_candidates(&self) -> SyncResult<Vec<PatchCandidate>> {
        let Some(pack) = self.active_pack().await? else {
            return Ok(Vec::new());
        };
        let targets = discover_targets(&self.config.system_apps_root)?;
        Ok(match_targets(&targets, &pack, |t| self.overlays.is_overlaid(t)))
    }

    /// Applies the active pack to the targets named in `selection`, or to
    /// every discovered target when it is empty, and records the overlays
    /// that were created.
    pub async fn apply_overlays(&self, selection: &[String]) -> SyncResult<ApplyReport> {
        let pack = self.active_pack().await?.ok_or(SyncError::NoActivePack)?;

        let targets: Vec<_> = discover_targets(&self.config.system_apps_root)?
            .into_iter()
            .filter(|t| selection.is_empty() || selection.contains(&t.id))
            .collect();

        let report = self.overlays.apply(&targets, &pack).await?;

        self.state
            .transact(|state| {
                for id in &report.applied {
                    state.record_overlay(id, &pack.name);
                }
                for failure in &report.failures {
                    // A failed target was rolled back, so it has no overlay.
                    if !self.overlays.is_overlaid_id(&failure.target) {
                        state.clear_overlay(&failure.target);
                    }
                }
            })
            .await?;

        Ok(report)
    }

    /// Removes managed overlays and their records.
    pub async fn revert(&self, scope: &RevertScope) -> SyncResult<usize> {
        let removed = self.overlays.revert(scope)?;
        self.state
            .transact(|state| match scope {
                RevertScope::Target(id) => {
                    state.clear_overlay(id);
                }
                RevertScope::All => state.clear_overlays(),
            })
            .await?;
        Ok(removed)
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub async fn sources(&self) -> Vec<String> {
        self.state.snapshot().await.effective_sources()
    }

    pub async fn add_source(&self, source: &str) -> SyncResult<bool> {
        crate::registry::SourceSpec::parse(source)?;
        self.state.transact(|state| state.add_source(source)).await
    }

    pub async fn remove_source(&self, source: &str) -> SyncResult<bool> {
        self.state.transact(|state| state.remove_source(source)).await
    }

    pub async fn set_language(&self, language: &str) -> SyncResult<()> {
        self.state
            .transact(|state| state.language = language.to_string())
            .await
    }
}
