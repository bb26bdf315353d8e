//! Sync engine - delivers stored records to the collection service.
//!
//! A cycle checks that the service is reachable, then submits the oldest
//! undelivered records in batches. Acknowledged records become synced and
//! everything else in a submitted batch is marked failed, so it is retried
//! by a later cycle. Cancellation is only observed between batches.

use crate::error::{StoreError, SyncError};
use crate::remote::CollectionClient;
use crate::store::RecordStore;
use crate::{config::SyncSettings, now_ms};
use attend_engine::{AttendanceRecord, Backoff, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Classification of a finished cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Every submitted record was acknowledged
    Ok,
    /// Nothing to deliver
    Idle,
    /// Some records acknowledged, some not
    Partial,
    /// Records submitted, none acknowledged
    Failed,
    /// Health check failed, no record touched
    Unreachable,
    /// Credentials rejected, sync suspended
    AuthRejected,
    /// Skipped because sync is suspended
    AuthSuspended,
    /// Store lock not acquired in time
    StorageBusy,
    /// Store read or write failed
    StorageError,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Ok => "ok",
            SyncOutcome::Idle => "idle",
            SyncOutcome::Partial => "partial",
            SyncOutcome::Failed => "failed",
            SyncOutcome::Unreachable => "unreachable",
            SyncOutcome::AuthRejected => "auth_rejected",
            SyncOutcome::AuthSuspended => "auth_suspended",
            SyncOutcome::StorageBusy => "storage_busy",
            SyncOutcome::StorageError => "storage_error",
        }
    }

    /// Outcomes that stretch the sync interval.
    pub fn is_failure(&self) -> bool {
        matches!(self, SyncOutcome::Failed | SyncOutcome::Unreachable)
    }

    /// Outcomes that reset the sync interval.
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Ok | SyncOutcome::Idle)
    }

    fn from_store_error(err: &StoreError) -> Self {
        if err.is_busy() {
            SyncOutcome::StorageBusy
        } else {
            SyncOutcome::StorageError
        }
    }
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleTrigger {
    Scheduled,
    Manual,
    Final,
}

/// Result of delivering one record within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Acked,
    NotAcked,
}

/// Summary of one sync cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub trigger: CycleTrigger,
    pub outcome: SyncOutcome,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Health check round trip, when the service answered
    pub latency_ms: Option<u64>,
    pub batches: usize,
    pub submitted: usize,
    pub synced: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CycleReport {
    fn new(trigger: CycleTrigger) -> Self {
        Self {
            trigger,
            outcome: SyncOutcome::Idle,
            started_at: Utc::now(),
            duration_ms: 0,
            latency_ms: None,
            batches: 0,
            submitted: 0,
            synced: 0,
            failed: 0,
            error: None,
        }
    }

    fn reachable(&self) -> bool {
        self.latency_ms.is_some()
    }
}

/// Observable sync state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_result: Option<SyncOutcome>,
    pub last_report: Option<CycleReport>,
    pub consecutive_failures: u32,
    pub auth_suspended: bool,
    pub device_registered: bool,
    pub cycles: u64,
    pub records_synced: u64,
    pub records_failed: u64,
    pub next_interval_secs: u64,
}

/// Cycle tuning that does not change at runtime.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub max_batches_per_cycle: usize,
    pub min_records_for_sync: usize,
    pub cleanup_after_sync: bool,
    pub max_backoff: Duration,
    pub backoff_threshold: u32,
}

impl From<&crate::config::Config> for SyncOptions {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            max_batches_per_cycle: config.max_batches_per_cycle,
            min_records_for_sync: config.min_records_for_sync,
            cleanup_after_sync: config.cleanup_after_sync,
            max_backoff: config.max_backoff,
            backoff_threshold: config.backoff_threshold,
        }
    }
}

/// Drives delivery of stored records.
pub struct SyncEngine {
    store: Arc<RecordStore>,
    client: CollectionClient,
    settings: watch::Receiver<SyncSettings>,
    options: SyncOptions,
    backoff: Mutex<Backoff>,
    status: watch::Sender<SyncStatus>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<RecordStore>,
        client: CollectionClient,
        settings: watch::Receiver<SyncSettings>,
        options: SyncOptions,
    ) -> Self {
        let base = settings.borrow().sync_interval;
        let backoff = Backoff::new(base, options.max_backoff, options.backoff_threshold);
        let status = SyncStatus {
            next_interval_secs: base.as_secs(),
            ..Default::default()
        };

        Self {
            store,
            client,
            settings,
            options,
            backoff: Mutex::new(backoff),
            status: watch::Sender::new(status),
        }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn client(&self) -> &CollectionClient {
        &self.client
    }

    /// Current sync status.
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Watch sync status changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn is_auth_suspended(&self) -> bool {
        self.status.borrow().auth_suspended
    }

    /// Lift an auth suspension so the next scheduled cycle checks health again.
    pub fn clear_auth_suspension(&self) {
        self.status.send_if_modified(|status| {
            let was = status.auth_suspended;
            status.auth_suspended = false;
            was
        });
    }

    /// Interval until the next scheduled cycle, stretched after failures.
    pub async fn next_interval(&self) -> Duration {
        let mut backoff = self.backoff.lock().await;
        backoff.set_base(self.settings.borrow().sync_interval);
        backoff.next_interval()
    }

    /// Ping the collection service.
    pub async fn health_check(&self) -> Result<Duration, SyncError> {
        self.client.health().await
    }

    /// Submit one batch and classify each record.
    ///
    /// Records missing from the response count as not acknowledged.
    pub async fn sync_batch(
        &self,
        records: &[AttendanceRecord],
    ) -> Result<Vec<(RecordId, BatchOutcome)>, SyncError> {
        let batch_id = Uuid::new_v4();
        tracing::debug!(%batch_id, size = records.len(), "Submitting batch");

        let results = self.client.submit_batch(batch_id, records).await?;
        let acked: HashMap<RecordId, bool> = results
            .into_iter()
            .map(|r| {
                if let Some(error) = &r.error {
                    tracing::debug!(record_id = r.record_id, error = %error, "Record rejected");
                }
                (r.record_id, r.success)
            })
            .collect();

        Ok(records
            .iter()
            .map(|r| {
                let outcome = if acked.get(&r.id).copied().unwrap_or(false) {
                    BatchOutcome::Acked
                } else {
                    BatchOutcome::NotAcked
                };
                (r.id, outcome)
            })
            .collect())
    }

    /// Register this device with the collection service.
    pub async fn register_device(&self) -> Result<(), SyncError> {
        let result = self.client.register_device().await;
        match &result {
            Ok(()) => {
                tracing::info!(device_id = %self.client.device().device_id, "Device registered");
                self.status.send_modify(|s| s.device_registered = true);
            }
            Err(SyncError::AuthRejected { status }) => {
                tracing::error!(status, "Device registration rejected");
                self.suspend_auth();
            }
            Err(e) => tracing::warn!(error = %e, "Device registration failed"),
        }
        result
    }

    pub async fn heartbeat(&self) -> Result<(), SyncError> {
        self.client.heartbeat().await
    }

    pub async fn device_info(&self) -> Result<serde_json::Value, SyncError> {
        self.client.device_info().await
    }

    /// Deliver one record right away.
    ///
    /// Returns `Ok(true)` when the record was acknowledged. Unknown or
    /// already synced records, and a suspended sync, yield `Ok(false)`.
    pub async fn deliver_one(&self, id: RecordId) -> Result<bool, SyncError> {
        if self.is_auth_suspended() {
            return Ok(false);
        }
        let record = match self.store.get(id).await? {
            Some(record) if !record.is_synced() => record,
            _ => return Ok(false),
        };

        match self.client.submit_one(&record).await {
            Ok(()) => {
                self.store.mark_synced(&[id], now_ms()).await?;
                self.status.send_modify(|s| s.records_synced += 1);
                tracing::debug!(id, "Record delivered immediately");
                Ok(true)
            }
            Err(SyncError::AuthRejected { status }) => {
                tracing::error!(status, "Credentials rejected, suspending sync");
                self.suspend_auth();
                Err(SyncError::AuthRejected { status })
            }
            Err(e) => {
                self.store.mark_failed(&[id], now_ms()).await?;
                self.status.send_modify(|s| s.records_failed += 1);
                tracing::warn!(id, error = %e, "Immediate delivery failed, left for batch sync");
                Err(e)
            }
        }
    }

    /// Run one sync cycle.
    pub async fn cycle(&self, trigger: CycleTrigger, cancel: &CancellationToken) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::new(trigger);

        if trigger == CycleTrigger::Scheduled && self.is_auth_suspended() {
            report.outcome = SyncOutcome::AuthSuspended;
            return self.finish(report, started).await;
        }

        match self.health_check().await {
            Ok(latency) => {
                report.latency_ms = Some(latency.as_millis() as u64);
                self.clear_auth_suspension();
            }
            Err(SyncError::AuthRejected { status }) => {
                tracing::error!(status, "Credentials rejected by health check, suspending sync");
                self.suspend_auth();
                report.outcome = SyncOutcome::AuthRejected;
                report.error = Some(format!("HTTP {}", status));
                return self.finish(report, started).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Collection service unreachable");
                report.outcome = SyncOutcome::Unreachable;
                report.error = Some(e.to_string());
                return self.finish(report, started).await;
            }
        }

        if let Err(e) = self.deliver_batches(&mut report, cancel).await {
            report.error = Some(e.to_string());
            report.outcome = match &e {
                SyncError::AuthRejected { .. } => SyncOutcome::AuthRejected,
                SyncError::Store(store_err) => SyncOutcome::from_store_error(store_err),
                _ => SyncOutcome::Failed,
            };
        } else {
            report.outcome = match (report.synced, report.failed) {
                (0, 0) => SyncOutcome::Idle,
                (_, 0) => SyncOutcome::Ok,
                (0, _) => SyncOutcome::Failed,
                _ => SyncOutcome::Partial,
            };
        }

        if report.reachable() && report.outcome != SyncOutcome::AuthRejected {
            self.after_reachable_cycle(&report).await;
        }

        self.finish(report, started).await
    }

    async fn deliver_batches(
        &self,
        report: &mut CycleReport,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let backlog = self.store.unsynced_count().await?;
        if backlog == 0 || backlog < self.options.min_records_for_sync {
            tracing::debug!(backlog, "Nothing to sync");
            return Ok(());
        }

        let batch_size = self.settings.borrow().batch_size;
        for _ in 0..self.options.max_batches_per_cycle {
            if cancel.is_cancelled() {
                tracing::debug!("Cycle cancelled at batch boundary");
                break;
            }

            let records = self.store.list_unsynced(batch_size).await?;
            if records.is_empty() {
                break;
            }
            let ids: Vec<RecordId> = records.iter().map(|r| r.id).collect();
            report.batches += 1;
            report.submitted += ids.len();

            let outcomes = match self.sync_batch(&records).await {
                Ok(outcomes) => outcomes,
                Err(SyncError::AuthRejected { status }) => {
                    tracing::error!(status, "Credentials rejected, suspending sync");
                    self.suspend_auth();
                    report.submitted -= ids.len();
                    return Err(SyncError::AuthRejected { status });
                }
                Err(e) => {
                    tracing::warn!(error = %e, size = ids.len(), "Batch delivery failed");
                    report.failed += self.store.mark_failed(&ids, now_ms()).await?;
                    report.error = Some(e.to_string());
                    break;
                }
            };

            let (acked, not_acked): (Vec<_>, Vec<_>) = outcomes
                .into_iter()
                .partition(|(_, outcome)| *outcome == BatchOutcome::Acked);
            let acked: Vec<RecordId> = acked.into_iter().map(|(id, _)| id).collect();
            let not_acked: Vec<RecordId> = not_acked.into_iter().map(|(id, _)| id).collect();

            let now = now_ms();
            report.synced += self.store.mark_synced(&acked, now).await?;
            report.failed += self.store.mark_failed(&not_acked, now).await?;

            tracing::info!(
                synced = acked.len(),
                failed = not_acked.len(),
                "Batch delivered"
            );

            if !not_acked.is_empty() {
                break;
            }
        }

        Ok(())
    }

    async fn after_reachable_cycle(&self, report: &CycleReport) {
        if self.options.cleanup_after_sync && report.synced > 0 {
            if let Err(e) = self.store.clear_synced().await {
                tracing::warn!(error = %e, "Cleanup after sync failed");
            }
        }

        if !self.status.borrow().device_registered {
            let _ = self.register_device().await;
        }

        if report.trigger == CycleTrigger::Scheduled {
            if let Err(e) = self.heartbeat().await {
                tracing::debug!(error = %e, "Heartbeat failed");
            }
        }
    }

    async fn finish(&self, mut report: CycleReport, started: Instant) -> CycleReport {
        report.duration_ms = started.elapsed().as_millis() as u64;

        let (failures, next) = {
            let mut backoff = self.backoff.lock().await;
            backoff.set_base(self.settings.borrow().sync_interval);
            if report.outcome.is_failure() {
                backoff.record_failure();
            } else if report.outcome.is_success() {
                backoff.record_success();
            }
            (backoff.consecutive_failures(), backoff.next_interval())
        };

        self.status.send_modify(|status| {
            status.last_sync_at = Some(report.started_at);
            status.last_sync_result = Some(report.outcome);
            status.last_report = Some(report.clone());
            status.consecutive_failures = failures;
            status.cycles += 1;
            status.records_synced += report.synced as u64;
            status.records_failed += report.failed as u64;
            status.next_interval_secs = next.as_secs();
        });

        tracing::info!(
            trigger = ?report.trigger,
            outcome = %report.outcome,
            batches = report.batches,
            synced = report.synced,
            failed = report.failed,
            duration_ms = report.duration_ms,
            next_in_secs = next.as_secs(),
            "Sync cycle finished"
        );

        report
    }

    fn suspend_auth(&self) {
        self.status.send_modify(|s| s.auth_suspended = true);
    }
}
