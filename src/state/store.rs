//! State store with write-through persistence
//!
//! Reads and mutations are synchronous against an in-memory copy so that the
//! capture path never suspends. Disk writes happen either explicitly via
//! [`StateStore::persist`] or from the background flush task.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::LocalState;
use crate::types::{RelayError, Result};

pub struct StateStore {
    state: RwLock<LocalState>,
    path: Option<PathBuf>,
    dirty: AtomicBool,
    flush_notify: Notify,
    write_lock: Mutex<()>,
}

impl StateStore {
    /// Memory-only store (nothing is written to disk)
    pub fn in_memory() -> Self {
        Self::in_memory_with(LocalState::default())
    }

    /// Memory-only store seeded with the given state
    pub fn in_memory_with(state: LocalState) -> Self {
        Self {
            state: RwLock::new(state),
            path: None,
            dirty: AtomicBool::new(false),
            flush_notify: Notify::new(),
            write_lock: Mutex::new(()),
        }
    }

    /// Open a file-backed store, loading existing state if present.
    ///
    /// A corrupt file is logged and replaced by an empty state on the next
    /// write rather than failing startup.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<LocalState>(&bytes) {
                Ok(state) => {
                    info!("Loaded relay state from {}", path.display());
                    state
                }
                Err(e) => {
                    warn!("State file {} is unreadable, starting empty: {}", path.display(), e);
                    LocalState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {}, starting empty", path.display());
                LocalState::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
            dirty: AtomicBool::new(false),
            flush_notify: Notify::new(),
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Clone of the current state
    pub fn snapshot(&self) -> LocalState {
        self.read(|s| s.clone())
    }

    /// Read from the current state
    pub fn read<R>(&self, f: impl FnOnce(&LocalState) -> R) -> R {
        let guard = self.state.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    /// Mutate the state in place and schedule a flush
    pub fn update<R>(&self, f: impl FnOnce(&mut LocalState) -> R) -> R {
        let result = {
            let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
            f(&mut guard)
        };
        self.dirty.store(true, Ordering::Release);
        self.flush_notify.notify_one();
        result
    }

    /// Mutate the state; a flush is scheduled only when `f` reports a change.
    ///
    /// The check and the write happen under one lock, so concurrent callers
    /// cannot both observe the old value.
    pub fn update_if(&self, f: impl FnOnce(&mut LocalState) -> bool) -> bool {
        let changed = {
            let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
            f(&mut guard)
        };
        if changed {
            self.dirty.store(true, Ordering::Release);
            self.flush_notify.notify_one();
        }
        changed
    }

    /// Whether there are changes not yet written to disk
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Write the current state to disk now
    pub async fn persist(&self) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            self.dirty.store(false, Ordering::Release);
            return Ok(());
        };

        let _write = self.write_lock.lock().await;
        self.dirty.store(false, Ordering::Release);

        let bytes = {
            let guard = self.state.read().unwrap_or_else(|e| e.into_inner());
            serde_json::to_vec_pretty(&*guard)
                .map_err(|e| RelayError::Storage(format!("Failed to encode state: {}", e)))?
        };

        let tmp = path.with_extension("json.tmp");
        let written = match tokio::fs::write(&tmp, &bytes).await {
            Ok(()) => tokio::fs::rename(&tmp, path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            // Leave the change pending so a later flush retries it
            self.dirty.store(true, Ordering::Release);
            return Err(e.into());
        }
        Ok(())
    }

    /// Flush in the background whenever the state changes
    pub fn spawn_flush_task(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                store.flush_notify.notified().await;
                if !store.dirty.load(Ordering::Acquire) {
                    continue;
                }
                if let Err(e) = store.persist().await {
                    error!("Failed to flush relay state: {}", e);
                }
            }
        })
    }
}
