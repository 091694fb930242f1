//! Registry state sharing and snapshot persistence.
//!
//! The in-memory [`RegistryState`] is shared as [`SharedState`]
//! (`Arc<RwLock<_>>`). Locks are taken for synchronous catalog steps only
//! and never held across an `.await`.
//!
//! [`RegistryStore`] owns the on-disk snapshot (`registry.json`). Writes go
//! to `registry.json.tmp` on a blocking thread and are renamed over the
//! target; an async mutex keeps writes from interleaving.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tokio::sync::Mutex;

use service_public_core::catalog::{RegistrySnapshot, RegistryState};

use crate::error::PersistError;

pub type SharedState = Arc<RwLock<RegistryState>>;

pub fn shared_state(state: RegistryState) -> SharedState {
    Arc::new(RwLock::new(state))
}

/// Read access that survives a poisoned lock.
pub fn read_state(state: &SharedState) -> RwLockReadGuard<'_, RegistryState> {
    state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Write access that survives a poisoned lock.
pub fn write_state(state: &SharedState) -> RwLockWriteGuard<'_, RegistryState> {
    state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Hook the orchestrator calls after fresh data has been fetched.
#[async_trait]
pub trait SnapshotPersister: Send + Sync {
    async fn persist(&self) -> Result<(), PersistError>;
}

pub struct RegistryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot; `Ok(None)` when no file exists yet.
    pub fn load(&self) -> Result<Option<RegistryState>, PersistError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path).map_err(|source| PersistError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        let snapshot: RegistrySnapshot =
            serde_json::from_str(&content).map_err(|source| PersistError::Json {
                path: self.path.display().to_string(),
                source,
            })?;
        Ok(Some(RegistryState::from_snapshot(snapshot)))
    }

    /// Snapshot `state` and write it out.
    ///
    /// The snapshot is taken under the write lock, so the last save to
    /// finish always carries the newest state.
    pub async fn save(&self, state: &SharedState) -> Result<(), PersistError> {
        let _guard = self.write_lock.lock().await;
        let snapshot = read_state(state).to_snapshot();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_snapshot(&path, &snapshot))
            .await
            .map_err(|e| PersistError::Task(e.to_string()))??;
        tracing::debug!(path = %self.path.display(), "registry snapshot saved");
        Ok(())
    }
}

fn write_snapshot(path: &Path, snapshot: &RegistrySnapshot) -> Result<(), PersistError> {
    let io_err = |source| PersistError::Io {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
    }

    let json = serde_json::to_string_pretty(snapshot).map_err(|source| PersistError::Json {
        path: path.display().to_string(),
        source,
    })?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, json).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

/// Saves a particular shared state through a store.
#[derive(Clone)]
pub struct StatePersister {
    store: Arc<RegistryStore>,
    state: SharedState,
}

impl StatePersister {
    pub fn new(store: Arc<RegistryStore>, state: SharedState) -> Self {
        Self { store, state }
    }
}

#[async_trait]
impl SnapshotPersister for StatePersister {
    async fn persist(&self) -> Result<(), PersistError> {
        self.store.save(&self.state).await
    }
}
