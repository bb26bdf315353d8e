//! Durable record store.
//!
//! Wraps the engine [`Ledger`] with a lock and a JSON file. Every mutation
//! is applied to a copy of the ledger, written to `<path>.tmp`, synced and
//! renamed over `<path>`. The copy only becomes live once the rename
//! succeeded, so a failed write leaves memory and disk at the previous state.
//!
//! Write and swap run in their own task while holding the lock. A caller
//! that stops waiting (timeout, dropped request) cannot leave the file ahead
//! of memory.

use crate::error::StoreError;
use attend_engine::{
    ActivitySummary, AppendReceipt, AttendanceRecord, DeviceMeta, Eviction, Ledger,
    LedgerSnapshot, RecordFilter, RecordId, RecordPage, StoreStats, Timestamp,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};

/// Persistent, capacity-bounded attendance store.
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    device: DeviceMeta,
    lock_timeout: Duration,
    ledger: Arc<Mutex<Ledger>>,
}

impl RecordStore {
    /// Open the store at `path`, creating an empty one if the file is missing.
    ///
    /// A leftover temporary file from an interrupted write is discarded. If
    /// the file holds more records than `capacity`, the excess is evicted and
    /// the result persisted before the store is returned.
    pub async fn open(
        path: impl Into<PathBuf>,
        capacity: usize,
        device: DeviceMeta,
        lock_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = tmp_path(&path);
        match tokio::fs::remove_file(&tmp).await {
            Ok(()) => tracing::warn!(path = %tmp.display(), "Removed stale temporary store file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let snapshot = match tokio::fs::read_to_string(&path).await {
            Ok(json) => LedgerSnapshot::from_json(&json).map_err(|e| {
                tracing::error!(path = %path.display(), error = %e, "Store file is corrupt");
                StoreError::Corrupt(e.to_string())
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LedgerSnapshot::empty(),
            Err(e) => return Err(e.into()),
        };

        let (ledger, evicted) = Ledger::from_snapshot(snapshot, capacity)?;
        if !evicted.is_empty() {
            log_evictions(&evicted);
            persist(&path, &ledger).await?;
        }

        tracing::info!(
            path = %path.display(),
            records = ledger.len(),
            unsynced = ledger.unsynced_count(),
            last_id = ledger.last_id(),
            "Record store opened"
        );

        Ok(Self {
            path,
            device,
            lock_timeout,
            ledger: Arc::new(Mutex::new(ledger)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn device(&self) -> &DeviceMeta {
        &self.device
    }

    /// Append a new pending record.
    pub async fn append(
        &self,
        identifier: &str,
        observed_at: Timestamp,
    ) -> Result<AppendReceipt, StoreError> {
        let device = self.device.clone();
        let receipt = self
            .mutate(|ledger| ledger.append(identifier, observed_at, device))
            .await?;

        if let Some(eviction) = &receipt.evicted {
            log_evictions(std::slice::from_ref(eviction));
        }
        tracing::debug!(id = receipt.id, "Record appended");

        Ok(receipt)
    }

    /// Oldest undelivered records, at most `limit`.
    pub async fn list_unsynced(&self, limit: usize) -> Result<Vec<AttendanceRecord>, StoreError> {
        Ok(self.lock().await?.list_unsynced(limit))
    }

    pub async fn unsynced_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock().await?.unsynced_count())
    }

    /// A copy of a single record.
    pub async fn get(&self, id: RecordId) -> Result<Option<AttendanceRecord>, StoreError> {
        Ok(self.lock().await?.get(id).cloned())
    }

    /// Mark records as delivered. Returns how many changed state.
    pub async fn mark_synced(&self, ids: &[RecordId], now: Timestamp) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.mutate(|ledger| Ok(ledger.mark_synced(ids, now))).await
    }

    /// Record an unacknowledged attempt. Returns how many changed state.
    pub async fn mark_failed(&self, ids: &[RecordId], now: Timestamp) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.mutate(|ledger| Ok(ledger.mark_failed(ids, now))).await
    }

    /// Remove all synced records.
    pub async fn clear_synced(&self) -> Result<usize, StoreError> {
        let removed = self.mutate(|ledger| Ok(ledger.clear_synced())).await?;
        tracing::info!(removed, "Cleared synced records");
        Ok(removed)
    }

    /// Apply a new capacity, evicting records if needed.
    pub async fn set_capacity(&self, capacity: usize) -> Result<Vec<Eviction>, StoreError> {
        let evicted = self.mutate(|ledger| ledger.set_capacity(capacity)).await?;
        log_evictions(&evicted);
        Ok(evicted)
    }

    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(self.lock().await?.stats())
    }

    pub async fn activity(&self, now: Timestamp) -> Result<ActivitySummary, StoreError> {
        Ok(self.lock().await?.activity(now))
    }

    /// Copy out a page of records matching `filter`.
    pub async fn snapshot(&self, filter: &RecordFilter) -> Result<RecordPage, StoreError> {
        Ok(self.lock().await?.query(filter))
    }

    /// Rewrite the current state to disk.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let ledger = self.lock().await?;
        persist(&self.path, &ledger).await
    }

    async fn lock(&self) -> Result<MutexGuard<'_, Ledger>, StoreError> {
        tokio::time::timeout(self.lock_timeout, self.ledger.lock())
            .await
            .map_err(|_| StoreError::Busy {
                waited: self.lock_timeout,
            })
    }

    async fn lock_owned(&self) -> Result<OwnedMutexGuard<Ledger>, StoreError> {
        tokio::time::timeout(self.lock_timeout, self.ledger.clone().lock_owned())
            .await
            .map_err(|_| StoreError::Busy {
                waited: self.lock_timeout,
            })
    }

    async fn mutate<T, F>(&self, change: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Ledger) -> attend_engine::error::Result<T>,
    {
        let mut live = self.lock_owned().await?;
        let mut next = Ledger::clone(&live);
        let value = change(&mut next)?;

        let path = self.path.clone();
        tokio::spawn(async move {
            persist(&path, &next).await?;
            *live = next;
            Ok::<T, StoreError>(value)
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn log_evictions(evicted: &[Eviction]) {
    for eviction in evicted {
        if eviction.lossy {
            tracing::warn!(
                id = eviction.record.id,
                identifier = %eviction.record.identifier,
                "Store full: evicted undelivered record"
            );
        } else {
            tracing::debug!(id = eviction.record.id, "Store full: evicted synced record");
        }
    }
}

/// Atomically replace the store file with the ledger's current state.
async fn persist(path: &Path, ledger: &Ledger) -> Result<(), StoreError> {
    let json = ledger.export_state().to_json()?;
    let path = path.to_path_buf();

    let result = tokio::task::spawn_blocking(move || write_atomic(&path, json.as_bytes()))
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?;

    if let Err(e) = &result {
        tracing::error!(error = %e, "Failed to persist record store");
    }
    result.map_err(StoreError::from)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let tmp = tmp_path(path);
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;

    // The new file is in place from here on; memory must follow it
    if let Err(e) = sync_parent(path) {
        tracing::warn!(error = %e, "Failed to sync store directory");
    }
    Ok(())
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> std::io::Result<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => std::fs::File::open(parent)?.sync_all(),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
