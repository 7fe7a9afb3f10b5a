//! On-disk pack storage.
//!
//! Packs live at `<downloads>/<pack_name>/`. Materializing a pack downloads
//! its archive into a private staging directory, extracts it there, and
//! renames the archive's top-level directory into place. The rename is the
//! commit point: an existing pack is only replaced after extraction
//! succeeded, and any failure or cancellation discards the staging data.
//!
//! Operations on one pack name are serialized; different packs proceed
//! concurrently.

mod downloader;
mod extractor;
mod staging;

pub use downloader::{
    validate_url, ArchiveFetcher, DownloadProgress, DownloadSummary, HttpArchiveFetcher,
    ProgressFn,
};
pub use extractor::{extract_pack_archive, make_executable};

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::registry::{Asset, Pack};
use staging::{recover_stale, swap_into_place, StagingDir};

// ============================================================================
// Local Pack Handle
// ============================================================================

/// A pack present on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPackHandle {
    pub name: String,
    pub root: PathBuf,
    /// Visual assets at the pack root, sorted by file name.
    pub assets: Vec<Asset>,
    /// SHA256 of the archive it came from, when freshly materialized.
    pub archive_sha256: Option<String>,
}

impl LocalPackHandle {
    /// Opens an already materialized pack.
    pub fn open(root: PathBuf) -> SyncResult<Self> {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !root.is_dir() {
            return Err(SyncError::UnknownPack(name));
        }
        let assets = scan_assets(&root)?;
        Ok(Self {
            name,
            root,
            assets,
            archive_sha256: None,
        })
    }

    /// First asset matching `target_base` (case-insensitive prefix).
    pub fn find_asset(&self, target_base: &str) -> Option<&Asset> {
        self.assets.iter().find(|asset| asset.matches(target_base))
    }

    pub fn asset_path(&self, asset: &Asset) -> PathBuf {
        self.root.join(&asset.file_name)
    }
}

fn scan_assets(root: &Path) -> SyncResult<Vec<Asset>> {
    let mut assets = Vec::new();
    for entry in fs::read_dir(root).map_err(|e| SyncError::io(root, e))? {
        let entry = entry.map_err(|e| SyncError::io(root, e))?;
        if !entry.path().is_file() {
            continue;
        }
        if let Some(asset) = Asset::from_file_name(&entry.file_name().to_string_lossy()) {
            assets.push(asset);
        }
    }
    assets.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(assets)
}

/// Rejects names that would escape the downloads root or hide the pack.
fn validate_pack_name(name: &str) -> SyncResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && name != "..";
    if valid {
        Ok(())
    } else {
        Err(SyncError::extraction(name, "invalid pack name"))
    }
}

// ============================================================================
// Pack Store
// ============================================================================

/// Manages pack directories under the downloads root.
pub struct PackStore {
    downloads_dir: PathBuf,
    fetcher: Arc<dyn ArchiveFetcher>,
    download_timeout: Duration,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PackStore {
    pub fn new(config: &SyncConfig, fetcher: Arc<dyn ArchiveFetcher>) -> Self {
        Self::with_downloads_dir(config.downloads_dir(), fetcher, config.download_timeout)
    }

    pub fn with_downloads_dir(
        downloads_dir: PathBuf,
        fetcher: Arc<dyn ArchiveFetcher>,
        download_timeout: Duration,
    ) -> Self {
        Self {
            downloads_dir,
            fetcher,
            download_timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    pub fn pack_dir(&self, name: &str) -> PathBuf {
        self.downloads_dir.join(name)
    }

    /// The lock serializing every operation on pack `name`.
    ///
    /// Callers that must keep other state in step with the pack directory
    /// hold it across both and use the `*_locked` variants.
    pub async fn pack_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    /// Downloads, extracts, and atomically places `pack`.
    ///
    /// On any error (including cancellation via `cancel`) the staging data
    /// is removed and an existing copy of the pack is left untouched.
    pub async fn materialize(
        &self,
        pack: &Pack,
        progress: &ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> SyncResult<LocalPackHandle> {
        let lock = self.pack_lock(&pack.name).await;
        let _guard = lock.lock().await;
        self.materialize_locked(pack, progress, cancel).await
    }

    /// [`materialize`](Self::materialize) for a caller already holding the
    /// pack's lock.
    pub async fn materialize_locked(
        &self,
        pack: &Pack,
        progress: &ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> SyncResult<LocalPackHandle> {
        validate_pack_name(&pack.name)?;

        info!(
            "Materializing pack '{}' at {} from {}",
            pack.name, pack.content_id, pack.archive_url
        );

        fs::create_dir_all(&self.downloads_dir)
            .map_err(|e| SyncError::io(&self.downloads_dir, e))?;
        recover_stale(&self.downloads_dir, &pack.name)?;

        // Shared with the extraction task: if this future is dropped while
        // extraction runs, the task removes the directory once it stops.
        let staging = Arc::new(StagingDir::create(&self.downloads_dir, &pack.name)?);
        let cancel = cancel.child_token();
        let _stop_on_drop = cancel.clone().drop_guard();
        let archive_path = staging.path().join("archive.zip");

        let fetch = self.fetcher.fetch(&pack.archive_url, &archive_path, progress);
        let summary = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(SyncError::Cancelled { pack: pack.name.clone() });
            }
            result = tokio::time::timeout(self.download_timeout, fetch) => {
                result.map_err(|_| SyncError::Timeout {
                    url: pack.archive_url.clone(),
                    secs: self.download_timeout.as_secs(),
                })??
            }
        };
        debug!("Fetched {} bytes for '{}'", summary.bytes, pack.name);

        let extracted = {
            let staging = Arc::clone(&staging);
            let archive_path = archive_path.clone();
            let name = pack.name.clone();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                let extract_dir = staging.path().join("extract");
                extract_pack_archive(&archive_path, &extract_dir, &name, &cancel)
            })
            .await
            .map_err(|e| SyncError::extraction(&pack.name, e))??
        };

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled {
                pack: pack.name.clone(),
            });
        }

        let destination = self.pack_dir(&pack.name);
        swap_into_place(&extracted, &destination, &pack.name)?;
        drop(staging);

        let mut handle = LocalPackHandle::open(destination)?;
        handle.archive_sha256 = Some(summary.sha256);

        info!(
            "Pack '{}' materialized with {} assets",
            handle.name,
            handle.assets.len()
        );
        Ok(handle)
    }

    /// Names of the packs on disk, sorted. Dot-prefixed entries are ignored.
    pub fn list_local_packs(&self) -> SyncResult<BTreeSet<String>> {
        let entries = match fs::read_dir(&self.downloads_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(SyncError::io(&self.downloads_dir, e)),
        };

        let mut packs = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| SyncError::io(&self.downloads_dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') && entry.path().is_dir() {
                packs.insert(name);
            }
        }
        Ok(packs)
    }

    /// Opens a pack on disk.
    pub fn open(&self, name: &str) -> SyncResult<LocalPackHandle> {
        validate_pack_name(name).map_err(|_| SyncError::UnknownPack(name.to_string()))?;
        LocalPackHandle::open(self.pack_dir(name))
    }

    /// Removes a pack. Removing an absent pack is not an error.
    pub async fn remove(&self, name: &str) -> SyncResult<()> {
        let lock = self.pack_lock(name).await;
        let _guard = lock.lock().await;
        self.remove_locked(name)
    }

    /// [`remove`](Self::remove) for a caller already holding the pack's lock.
    pub fn remove_locked(&self, name: &str) -> SyncResult<()> {
        validate_pack_name(name)?;
        let dir = self.pack_dir(name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!("Removed pack '{}'", name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::io(&dir, e)),
        }
    }

    /// Removes every pack on disk. Returns the number removed.
    pub async fn remove_all(&self) -> SyncResult<usize> {
        let packs = self.list_local_packs()?;
        for name in &packs {
            self.remove(name).await?;
        }
        Ok(packs.len())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::sync::Semaphore;

    pub(crate) use super::extractor::tests::build_zip;

    /// Holds fetches until the test lets them through.
    pub(crate) struct FetchGate {
        started: Semaphore,
        release: Semaphore,
    }

    impl FetchGate {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                started: Semaphore::new(0),
                release: Semaphore::new(0),
            })
        }

        /// Waits until `n` fetches are parked at the gate.
        pub async fn wait_started(&self, n: u32) {
            self.started.acquire_many(n).await.unwrap().forget();
        }

        pub fn open(&self, n: usize) {
            self.release.add_permits(n);
        }
    }

    /// Serves archives from memory, keyed by URL.
    #[derive(Default)]
    pub(crate) struct FakeFetcher {
        pub archives: std::sync::Mutex<HashMap<String, Vec<u8>>>,
        pub hang: bool,
        pub gate: Option<Arc<FetchGate>>,
        pub calls: AtomicUsize,
    }

    impl FakeFetcher {
        pub fn serve(&self, url: &str, archive: Vec<u8>) {
            self.archives
                .lock()
                .unwrap()
                .insert(url.to_string(), archive);
        }
    }

    #[async_trait]
    impl ArchiveFetcher for FakeFetcher {
        async fn fetch(
            &self,
            url: &str,
            dest: &Path,
            progress: &ProgressFn<'_>,
        ) -> SyncResult<DownloadSummary> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.started.add_permits(1);
                gate.release.acquire().await.unwrap().forget();
            }
            if self.hang {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            let data = self
                .archives
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| SyncError::network(url, "HTTP 404 Not Found"))?;
            let total = data.len() as u64;
            progress(DownloadProgress::new(0, Some(total)));
            tokio::fs::write(dest, &data)
                .await
                .map_err(|e| SyncError::io(dest, e))?;
            progress(DownloadProgress::new(total, Some(total)));
            Ok(DownloadSummary {
                bytes: total,
                sha256: "fake".into(),
            })
        }
    }

    pub(crate) fn pack(name: &str, sha: &str) -> Pack {
        Pack {
            name: name.to_string(),
            content_id: sha.to_string(),
            source: "test/icons".to_string(),
            archive_url: format!("https://github.com/test/icons/archive/refs/heads/{}.zip", name),
            preview_url: None,
            assets: Vec::new(),
        }
    }

    fn setup() -> (TempDir, Arc<FakeFetcher>, PackStore) {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(FakeFetcher::default());
        let store = PackStore::with_downloads_dir(
            temp.path().join("downloads"),
            fetcher.clone(),
            Duration::from_secs(5),
        );
        (temp, fetcher, store)
    }

    fn no_progress(_: DownloadProgress) {}

    #[tokio::test]
    async fn test_materialize_places_pack() {
        let (_temp, fetcher, store) = setup();
        let dark = pack("dark", "abc");
        fetcher.serve(
            &dark.archive_url,
            build_zip(&[
                ("icons-dark/Safari.icns", b"safari"),
                ("icons-dark/Notes.png", b"notes"),
                ("icons-dark/README.md", b"readme"),
            ]),
        );

        let seen = std::sync::Mutex::new(Vec::new());
        let record = |p: DownloadProgress| seen.lock().unwrap().push(p.bytes_done);
        let handle = store
            .materialize(&dark, &record, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(handle.name, "dark");
        assert_eq!(handle.root, store.pack_dir("dark"));
        let names: Vec<_> = handle.assets.iter().map(|a| a.file_name.as_str()).collect();
        assert_eq!(names, vec!["Notes.png", "Safari.icns"]);
        assert_eq!(handle.archive_sha256.as_deref(), Some("fake"));
        assert_eq!(seen.lock().unwrap().first(), Some(&0));

        // Only the pack itself is left in the downloads root.
        let local = store.list_local_packs().unwrap();
        assert_eq!(local.into_iter().collect::<Vec<_>>(), vec!["dark"]);
        assert_eq!(fs::read_dir(store.downloads_dir()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_archive_keeps_existing_pack() {
        let (_temp, fetcher, store) = setup();
        let v1 = pack("dark", "abc");
        fetcher.serve(&v1.archive_url, build_zip(&[("root/Safari.icns", b"v1")]));
        store
            .materialize(&v1, &no_progress, &CancellationToken::new())
            .await
            .unwrap();

        let v2 = pack("dark", "def");
        fetcher.serve(&v2.archive_url, b"garbage".to_vec());
        let err = store
            .materialize(&v2, &no_progress, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Extraction { .. }));
        assert_eq!(
            fs::read(store.pack_dir("dark").join("Safari.icns")).unwrap(),
            b"v1"
        );
        assert_eq!(fs::read_dir(store.downloads_dir()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_update_replaces_pack_contents() {
        let (_temp, fetcher, store) = setup();
        let dark = pack("dark", "abc");
        fetcher.serve(&dark.archive_url, build_zip(&[("root/Old.icns", b"1")]));
        store
            .materialize(&dark, &no_progress, &CancellationToken::new())
            .await
            .unwrap();

        fetcher.serve(&dark.archive_url, build_zip(&[("root/New.icns", b"2")]));
        let handle = store
            .materialize(&dark, &no_progress, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(handle.assets.len(), 1);
        assert_eq!(handle.assets[0].file_name, "New.icns");
        assert!(!store.pack_dir("dark").join("Old.icns").exists());
    }

    #[tokio::test]
    async fn test_stale_staging_does_not_block_rerun() {
        let (_temp, fetcher, store) = setup();
        // Simulate a crash between extraction and rename.
        let stale = store
            .downloads_dir()
            .join(".staging-dark-0123456789abcdef0123456789abcdef");
        fs::create_dir_all(stale.join("extract/root")).unwrap();
        fs::write(stale.join("extract/root/Safari.icns"), b"half").unwrap();

        let dark = pack("dark", "abc");
        fetcher.serve(&dark.archive_url, build_zip(&[("root/Safari.icns", b"full")]));
        store
            .materialize(&dark, &no_progress, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!stale.exists());
        assert_eq!(
            fs::read(store.pack_dir("dark").join("Safari.icns")).unwrap(),
            b"full"
        );
    }

    #[tokio::test]
    async fn test_network_error_leaves_no_staging() {
        let (_temp, _fetcher, store) = setup();
        let err = store
            .materialize(&pack("dark", "abc"), &no_progress, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(store.list_local_packs().unwrap().is_empty());
        assert_eq!(fs::read_dir(store.downloads_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_discards_staging() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(FakeFetcher {
            hang: true,
            ..Default::default()
        });
        let store = Arc::new(PackStore::with_downloads_dir(
            temp.path().join("downloads"),
            fetcher,
            Duration::from_secs(60),
        ));
        let cancel = CancellationToken::new();

        let task = {
            let store = Arc::clone(&store);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                store
                    .materialize(&pack("dark", "abc"), &no_progress, &cancel)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(fs::read_dir(store.downloads_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_download_timeout() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(FakeFetcher {
            hang: true,
            ..Default::default()
        });
        let store = PackStore::with_downloads_dir(
            temp.path().join("downloads"),
            fetcher,
            Duration::from_millis(50),
        );

        let err = store
            .materialize(&pack("dark", "abc"), &no_progress, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Timeout { .. }));
        assert_eq!(fs::read_dir(store.downloads_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_pack_name_rejected() {
        let (_temp, fetcher, store) = setup();
        let err = store
            .materialize(&pack("../evil", "abc"), &no_progress, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Extraction { .. }));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_list_ignores_hidden_and_files() {
        let (_temp, _fetcher, store) = setup();
        fs::create_dir_all(store.pack_dir("dark")).unwrap();
        fs::create_dir_all(store.pack_dir(".DS_Store_dir")).unwrap();
        fs::write(store.downloads_dir().join("loose.zip"), b"x").unwrap();

        let packs = store.list_local_packs().unwrap();
        assert_eq!(packs.into_iter().collect::<Vec<_>>(), vec!["dark"]);
    }

    fn staging_entries(store: &PackStore) -> Vec<String> {
        fs::read_dir(store.downloads_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(".staging-"))
            .collect()
    }

    #[tokio::test]
    async fn test_dropped_materialize_leaves_no_staging() {
        let temp = TempDir::new().unwrap();
        let gate = FetchGate::new();
        let fetcher = Arc::new(FakeFetcher {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let entries: Vec<(String, Vec<u8>)> = (0..2000)
            .map(|i| (format!("root/Icon{}.icns", i), vec![b'x'; 4096]))
            .collect();
        let refs: Vec<(&str, &[u8])> = entries
            .iter()
            .map(|(name, data)| (name.as_str(), data.as_slice()))
            .collect();
        let dark = pack("dark", "abc");
        fetcher.serve(&dark.archive_url, build_zip(&refs));
        let store = Arc::new(PackStore::with_downloads_dir(
            temp.path().join("downloads"),
            fetcher,
            Duration::from_secs(30),
        ));

        let task = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .materialize(&dark, &no_progress, &CancellationToken::new())
                    .await
            })
        };
        gate.wait_started(1).await;
        gate.open(1);
        tokio::time::sleep(Duration::from_millis(5)).await;
        task.abort();
        let _ = task.await;

        // Extraction may still be winding down on the blocking pool.
        for _ in 0..200 {
            if staging_entries(&store).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(staging_entries(&store).is_empty());
    }

    #[tokio::test]
    async fn test_remove_waits_for_materialize() {
        let temp = TempDir::new().unwrap();
        let gate = FetchGate::new();
        let fetcher = Arc::new(FakeFetcher {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let dark = pack("dark", "abc");
        fetcher.serve(&dark.archive_url, build_zip(&[("root/Safari.icns", b"s")]));
        let store = PackStore::with_downloads_dir(
            temp.path().join("downloads"),
            fetcher,
            Duration::from_secs(5),
        );

        let cancel = CancellationToken::new();
        let (materialized, removed, _) = tokio::join!(
            store.materialize(&dark, &no_progress, &cancel),
            store.remove("dark"),
            async {
                gate.wait_started(1).await;
                gate.open(1);
            }
        );

        materialized.unwrap();
        removed.unwrap();
        assert!(!store.pack_dir("dark").exists());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (_temp, _fetcher, store) = setup();
        fs::create_dir_all(store.pack_dir("dark")).unwrap();

        store.remove("dark").await.unwrap();
        store.remove("dark").await.unwrap();
        assert!(!store.pack_dir("dark").exists());
    }

    #[tokio::test]
    async fn test_remove_all() {
        let (_temp, _fetcher, store) = setup();
        fs::create_dir_all(store.pack_dir("dark")).unwrap();
        fs::create_dir_all(store.pack_dir("light")).unwrap();

        assert_eq!(store.remove_all().await.unwrap(), 2);
        assert!(store.list_local_packs().unwrap().is_empty());
    }

    #[test]
    fn test_find_asset_first_match_wins() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("dark");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("Safari.icns"), b"1").unwrap();
        fs::write(root.join("safari_alt.png"), b"2").unwrap();

        let handle = LocalPackHandle::open(root).unwrap();
        assert_eq!(handle.find_asset("Safari").unwrap().file_name, "Safari.icns");
        assert!(handle.find_asset("Mail").is_none());
    }

    #[test]
    fn test_open_missing_pack() {
        let temp = TempDir::new().unwrap();
        let err = LocalPackHandle::open(temp.path().join("nope")).unwrap_err();
        assert!(matches!(err, SyncError::UnknownPack(ref n) if n == "nope"));
    }
}
