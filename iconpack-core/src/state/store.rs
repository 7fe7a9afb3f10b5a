//! State persistence and the single-writer state store.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::local::LocalState;
use crate::error::{SyncError, SyncResult};

// ============================================================================
// Persistence
// ============================================================================

/// Loads state, reporting a malformed file as [`SyncError::StateCorrupt`].
///
/// A missing file is an empty state.
pub fn try_load(path: &Path) -> SyncResult<LocalState> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("State file not found at {}, starting empty", path.display());
            return Ok(LocalState::default());
        }
        Err(e) => return Err(SyncError::io(path, e)),
    };

    serde_json::from_str(&content).map_err(|e| SyncError::StateCorrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Loads state, never failing: an unreadable or corrupt file is logged and
/// treated as empty.
pub fn load(path: &Path) -> LocalState {
    try_load(path).unwrap_or_else(|e| {
        warn!("{}. Starting with empty state.", e);
        LocalState::default()
    })
}

/// Saves state with write-to-temp-then-rename so a crash leaves either the
/// old or the new file, never a truncated one.
pub fn save(path: &Path, state: &LocalState) -> SyncResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;

    let content = serde_json::to_vec_pretty(state).map_err(|e| SyncError::StateCorrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let result = write_synced(&temp_path, &content)
        .and_then(|_| fs::rename(&temp_path, path).map_err(|e| SyncError::io(path, e)));

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    } else {
        debug!("State saved to {}", path.display());
    }
    result
}

fn write_synced(path: &Path, content: &[u8]) -> SyncResult<()> {
    let mut file = fs::File::create(path).map_err(|e| SyncError::io(path, e))?;
    file.write_all(content).map_err(|e| SyncError::io(path, e))?;
    file.sync_all().map_err(|e| SyncError::io(path, e))
}

// ============================================================================
// State Store
// ============================================================================

/// Owns the in-memory state and serializes every mutate-and-persist sequence.
///
/// Locking is in-process only; two processes sharing one state file are not
/// coordinated.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: Mutex<LocalState>,
}

impl StateStore {
    /// Opens the store, loading whatever is on disk.
    pub fn open(path: PathBuf) -> Self {
        let state = load(&path);
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a copy of the current state.
    pub async fn snapshot(&self) -> LocalState {
        self.state.lock().await.clone()
    }

    /// Applies `mutate` to a copy of the state and persists it. The in-memory
    /// state only changes if the save succeeded.
    pub async fn transact<T, F>(&self, mutate: F) -> SyncResult<T>
    where
        F: FnOnce(&mut LocalState) -> T,
    {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let out = mutate(&mut next);
        if next != *guard {
            save(&self.path, &next)?;
            *guard = next;
        }
        Ok(out)
    }
}
