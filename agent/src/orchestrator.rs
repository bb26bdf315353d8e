//! Orchestrator - wires capture, storage and delivery together.
//!
//! Two tasks run while the agent is up:
//!
//! - **capture** reads [`ScanEvent`]s from a bounded queue, drops repeated
//!   reads of the same card and appends the rest to the store.
//! - **scheduler** runs sync cycles on the backoff-adjusted interval and
//!   serves manual triggers and immediate deliveries.
//!
//! Lifecycle is `Starting -> Running -> Draining -> Stopped` and is published
//! through a watch channel.

use crate::config::{Config, SyncSettings};
use crate::error::{StartError, StoreError};
use crate::remote::CollectionClient;
use crate::source::{EventSender, ScanEvent};
use crate::store::RecordStore;
use crate::sync::{CycleReport, CycleTrigger, SyncEngine, SyncOptions};
use attend_engine::{RecordId, ScanDebouncer};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const APPEND_RETRY_DELAY: Duration = Duration::from_millis(25);
const IMMEDIATE_QUEUE: usize = 256;

/// Agent lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Starting,
    Running,
    Draining,
    Stopped,
}

/// Requests served by the scheduler task.
#[derive(Debug)]
pub enum Command {
    /// Run an extra cycle now without moving the scheduled deadline
    TriggerSyncNow(oneshot::Sender<CycleReport>),
}

/// Capture path counters.
#[derive(Debug, Default)]
pub struct CaptureCounters {
    accepted: AtomicU64,
    debounced: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`CaptureCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStats {
    /// Events appended to the store
    pub accepted: u64,
    /// Events dropped as repeated reads
    pub debounced: u64,
    /// Events with an unusable identifier
    pub rejected: u64,
    /// Events lost to storage errors
    pub failed: u64,
}

impl CaptureCounters {
    pub fn snapshot(&self) -> CaptureStats {
        CaptureStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            debounced: self.debounced.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Cloneable handle to a running agent.
#[derive(Clone)]
pub struct AgentHandle {
    config: Arc<Config>,
    store: Arc<RecordStore>,
    engine: Arc<SyncEngine>,
    settings: Arc<watch::Sender<SyncSettings>>,
    settings_update: Arc<Mutex<()>>,
    lifecycle: watch::Receiver<Lifecycle>,
    capture: Arc<CaptureCounters>,
    events: EventSender,
    commands: mpsc::Sender<Command>,
}

impl AgentHandle {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Sender for feeding scan events into the agent.
    pub fn events(&self) -> EventSender {
        self.events.clone()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    pub fn watch_lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.clone()
    }

    pub fn capture_stats(&self) -> CaptureStats {
        self.capture.snapshot()
    }

    pub fn settings(&self) -> SyncSettings {
        *self.settings.borrow()
    }

    /// Held across a read-modify-publish of the runtime settings so
    /// concurrent updates apply one after the other.
    pub async fn lock_settings(&self) -> MutexGuard<'_, ()> {
        self.settings_update.lock().await
    }

    /// Publish new runtime settings.
    pub fn publish_settings(&self, settings: SyncSettings) {
        self.settings.send_replace(settings);
    }

    /// Ask the scheduler for an extra cycle and wait for its report.
    ///
    /// Returns `None` once the scheduler has stopped.
    pub async fn trigger_sync_now(&self) -> Option<CycleReport> {
        let (reply, report) = oneshot::channel();
        self.commands
            .send(Command::TriggerSyncNow(reply))
            .await
            .ok()?;
        report.await.ok()
    }
}

/// Owns the agent tasks. Dropping it without [`Orchestrator::shutdown`]
/// leaves the tasks running until the runtime stops.
pub struct Orchestrator {
    handle: AgentHandle,
    lifecycle: watch::Sender<Lifecycle>,
    cancel: CancellationToken,
    capture_task: JoinHandle<()>,
    scheduler_task: JoinHandle<()>,
}

impl Orchestrator {
    /// Open storage, build the sync engine and start the agent tasks.
    pub async fn start(config: Config) -> Result<Self, StartError> {
        let (lifecycle_tx, lifecycle_rx) = watch::channel(Lifecycle::Starting);
        config.validate()?;
        let config = Arc::new(config);

        let store = Arc::new(
            RecordStore::open(
                &config.storage_path,
                config.sync.capacity,
                config.device.clone(),
                config.lock_timeout,
            )
            .await?,
        );

        let (settings_tx, settings_rx) = watch::channel(config.sync);
        let client = CollectionClient::new(&config)?;
        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            client,
            settings_rx.clone(),
            SyncOptions::from(&*config),
        ));

        // Best effort; retried after reachable cycles
        let _ = engine.register_device().await;

        let cancel = CancellationToken::new();
        let capture = Arc::new(CaptureCounters::default());
        let (events_tx, events_rx) = mpsc::channel(config.event_queue_capacity);
        let (commands_tx, commands_rx) = mpsc::channel(8);
        let (immediate_tx, immediate_rx) = mpsc::channel(IMMEDIATE_QUEUE);

        let capture_loop = CaptureLoop {
            store: store.clone(),
            counters: capture.clone(),
            debouncer: ScanDebouncer::new(config.debounce_interval.as_millis() as u64),
            retries: config.append_retries,
            immediate: config.immediate_sync.then_some(immediate_tx),
        };
        let capture_task = tokio::spawn(capture_loop.run(
            events_rx,
            cancel.clone(),
            config.drain_timeout,
        ));

        let scheduler = Scheduler {
            engine: engine.clone(),
            settings: settings_rx,
            commands: commands_rx,
            immediate: immediate_rx,
        };
        let scheduler_task = tokio::spawn(scheduler.run(cancel.clone()));

        lifecycle_tx.send_replace(Lifecycle::Running);
        tracing::info!(
            device_id = %config.device.device_id,
            immediate_sync = config.immediate_sync,
            interval_secs = config.sync.sync_interval.as_secs(),
            "Agent running"
        );

        Ok(Self {
            handle: AgentHandle {
                config,
                store,
                engine,
                settings: Arc::new(settings_tx),
                settings_update: Arc::new(Mutex::new(())),
                lifecycle: lifecycle_rx,
                capture,
                events: events_tx,
                commands: commands_tx,
            },
            lifecycle: lifecycle_tx,
            cancel,
            capture_task,
            scheduler_task,
        })
    }

    pub fn handle(&self) -> AgentHandle {
        self.handle.clone()
    }

    /// Token that starts draining when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the cancel token, then shut down.
    pub async fn run_until_cancelled(self) -> Result<(), StoreError> {
        self.cancel.cancelled().await;
        self.shutdown().await
    }

    /// Drain queued events, finish in-flight work, optionally run a final
    /// cycle and flush storage.
    pub async fn shutdown(self) -> Result<(), StoreError> {
        self.lifecycle.send_replace(Lifecycle::Draining);
        tracing::info!("Agent draining");
        self.cancel.cancel();

        if let Err(e) = self.capture_task.await {
            tracing::error!(error = %e, "Capture task failed");
        }
        if let Err(e) = self.scheduler_task.await {
            tracing::error!(error = %e, "Scheduler task failed");
        }

        if self.handle.config.final_sync {
            self.handle
                .engine
                .cycle(CycleTrigger::Final, &CancellationToken::new())
                .await;
        }

        let flushed = self.handle.store.flush().await;
        self.lifecycle.send_replace(Lifecycle::Stopped);
        tracing::info!("Agent stopped");
        flushed
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

struct CaptureLoop {
    store: Arc<RecordStore>,
    counters: Arc<CaptureCounters>,
    debouncer: ScanDebouncer,
    retries: u32,
    immediate: Option<mpsc::Sender<RecordId>>,
}

impl CaptureLoop {
    async fn run(
        mut self,
        mut events: mpsc::Receiver<ScanEvent>,
        cancel: CancellationToken,
        drain_timeout: Duration,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.capture(event).await,
                    None => return,
                },
            }
        }

        events.close();
        let deadline = Instant::now() + drain_timeout;
        let mut drained = 0u64;
        let mut dropped = 0u64;
        while let Ok(event) = events.try_recv() {
            if Instant::now() >= deadline {
                dropped += 1;
                continue;
            }
            self.capture(event).await;
            drained += 1;
        }

        if dropped > 0 {
            self.counters.failed.fetch_add(dropped, Ordering::Relaxed);
            tracing::warn!(
                drained,
                dropped,
                timeout_ms = drain_timeout.as_millis() as u64,
                "Drain timed out, remaining events dropped"
            );
        } else {
            tracing::info!(drained, "Event queue drained");
        }
    }

    async fn capture(&mut self, event: ScanEvent) {
        let identifier = event.identifier.trim();
        if !identifier.is_empty() && self.debouncer.is_repeat(identifier, event.observed_at) {
            self.counters.debounced.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(identifier, "Repeated read suppressed");
            return;
        }

        let mut delay = APPEND_RETRY_DELAY;
        let mut attempt = 0;
        loop {
            match self.store.append(identifier, event.observed_at).await {
                Ok(receipt) => {
                    self.debouncer.record(identifier, event.observed_at);
                    self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                    if let Some(immediate) = &self.immediate {
                        // A full queue only delays delivery to the next batch
                        let _ = immediate.try_send(receipt.id);
                    }
                    return;
                }
                Err(e) if e.is_busy() && attempt < self.retries => {
                    attempt += 1;
                    tracing::debug!(attempt, "Store busy, retrying append");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(StoreError::Rejected(e)) => {
                    self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %e, "Scan rejected");
                    return;
                }
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(identifier, error = %e, "Failed to store scan");
                    return;
                }
            }
        }
    }
}

struct Scheduler {
    engine: Arc<SyncEngine>,
    settings: watch::Receiver<SyncSettings>,
    commands: mpsc::Receiver<Command>,
    immediate: mpsc::Receiver<RecordId>,
}

impl Scheduler {
    async fn run(mut self, cancel: CancellationToken) {
        let mut last_run = Instant::now();
        let mut deadline = last_run + self.engine.next_interval().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => {
                    self.engine.cycle(CycleTrigger::Scheduled, &cancel).await;
                    last_run = Instant::now();
                    deadline = last_run + self.engine.next_interval().await;
                }
                Some(command) = self.commands.recv() => match command {
                    Command::TriggerSyncNow(reply) => {
                        let report = self.engine.cycle(CycleTrigger::Manual, &cancel).await;
                        let _ = reply.send(report);
                    }
                },
                Some(id) = self.immediate.recv() => {
                    if let Err(e) = self.engine.deliver_one(id).await {
                        tracing::debug!(id, error = %e, "Immediate delivery not completed");
                    }
                }
                Ok(()) = self.settings.changed() => {
                    deadline = last_run + self.engine.next_interval().await;
                    tracing::debug!("Sync settings changed, schedule updated");
                }
            }
        }

        tracing::debug!("Scheduler stopped");
    }
}
