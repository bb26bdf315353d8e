//! Inspection interface.
//!
//! Read-mostly view of a running agent used by the HTTP routes. Every value
//! returned here is a copy; nothing hands out references into live state.

use crate::config::{SettingsUpdate, SyncSettings};
use crate::error::{AppError, Result};
use crate::orchestrator::{AgentHandle, CaptureStats, Lifecycle};
use crate::remote::to_datetime;
use crate::sync::{CycleReport, SyncStatus};
use crate::now_ms;
use attend_engine::{
    ActivitySummary, AttendanceRecord, DeviceMeta, RecordFilter, RecordPage, StoreStats,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of the whole agent.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub lifecycle: Lifecycle,
    pub version: &'static str,
    pub device: DeviceMeta,
    pub store: StoreStats,
    pub sync: SyncStatus,
    pub capture: CaptureStats,
    pub settings: SyncSettings,
}

/// Store counters plus capture activity.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordStats {
    #[serde(flatten)]
    pub store: StoreStats,
    pub activity: ActivitySummary,
}

/// Configuration as shown to operators. The API key is masked.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigView {
    pub device: DeviceMeta,
    pub api_url: String,
    pub api_key: String,
    pub storage_path: String,
    #[serde(flatten)]
    pub settings: SyncSettings,
    pub max_batches_per_cycle: usize,
    pub min_records_for_sync: usize,
    pub immediate_sync: bool,
    pub cleanup_after_sync: bool,
    pub final_sync: bool,
    pub debounce_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

/// A rendered export.
#[derive(Debug, Clone)]
pub struct Export {
    pub content_type: &'static str,
    pub filename: String,
    pub body: String,
}

#[derive(Serialize)]
struct CsvRow<'a> {
    id: u64,
    identifier: &'a str,
    captured_at: DateTime<Utc>,
    device_id: &'a str,
    device_name: &'a str,
    location: &'a str,
    state: &'static str,
    attempts: u32,
    last_attempt_at: Option<DateTime<Utc>>,
}

impl<'a> From<&'a AttendanceRecord> for CsvRow<'a> {
    fn from(record: &'a AttendanceRecord) -> Self {
        Self {
            id: record.id,
            identifier: &record.identifier,
            captured_at: to_datetime(record.captured_at),
            device_id: &record.device.device_id,
            device_name: &record.device.device_name,
            location: &record.device.location,
            state: record.sync_state.label(),
            attempts: record.sync_state.attempts(),
            last_attempt_at: record.last_attempt_at.map(to_datetime),
        }
    }
}

/// Inspection operations over a running agent.
#[derive(Clone)]
pub struct Inspector {
    agent: AgentHandle,
}

impl Inspector {
    pub fn new(agent: AgentHandle) -> Self {
        Self { agent }
    }

    pub fn agent(&self) -> &AgentHandle {
        &self.agent
    }

    pub async fn status(&self) -> Result<AgentStatus> {
        Ok(AgentStatus {
            lifecycle: self.agent.lifecycle(),
            version: env!("CARGO_PKG_VERSION"),
            device: self.agent.config().device.clone(),
            store: self.agent.store().stats().await?,
            sync: self.agent.engine().status(),
            capture: self.agent.capture_stats(),
            settings: self.agent.settings(),
        })
    }

    pub async fn list_records(&self, filter: &RecordFilter) -> Result<RecordPage> {
        Ok(self.agent.store().snapshot(filter).await?)
    }

    pub async fn stats(&self) -> Result<RecordStats> {
        let store = self.agent.store();
        Ok(RecordStats {
            store: store.stats().await?,
            activity: store.activity(now_ms()).await?,
        })
    }

    pub async fn activity(&self) -> Result<ActivitySummary> {
        Ok(self.agent.store().activity(now_ms()).await?)
    }

    /// Run a cycle now. Also lifts an auth suspension if the service
    /// accepts the credentials again.
    pub async fn trigger_sync_now(&self) -> Result<CycleReport> {
        self.agent
            .trigger_sync_now()
            .await
            .ok_or_else(|| AppError::Unavailable("Agent is shutting down".to_string()))
    }

    pub async fn clear_synced(&self) -> Result<usize> {
        Ok(self.agent.store().clear_synced().await?)
    }

    pub fn get_config(&self) -> ConfigView {
        let config = self.agent.config();
        ConfigView {
            device: config.device.clone(),
            api_url: config.api_url.clone(),
            api_key: config.masked_api_key(),
            storage_path: config.storage_path.display().to_string(),
            settings: self.agent.settings(),
            max_batches_per_cycle: config.max_batches_per_cycle,
            min_records_for_sync: config.min_records_for_sync,
            immediate_sync: config.immediate_sync,
            cleanup_after_sync: config.cleanup_after_sync,
            final_sync: config.final_sync,
            debounce_secs: config.debounce_interval.as_secs(),
        }
    }

    /// Validate and apply a settings change.
    ///
    /// A capacity change is persisted before the new settings are published.
    /// Updates are serialized; each one starts from the latest published value.
    pub async fn update_config(&self, update: &SettingsUpdate) -> Result<ConfigView> {
        if update.is_empty() {
            return Err(AppError::BadRequest("No settings to update".to_string()));
        }

        let _update = self.agent.lock_settings().await;
        let current = self.agent.settings();
        let next = current.apply(update)?;

        if next.capacity != current.capacity {
            let evicted = self.agent.store().set_capacity(next.capacity).await?;
            if !evicted.is_empty() {
                tracing::warn!(
                    evicted = evicted.len(),
                    capacity = next.capacity,
                    "Capacity reduced, records evicted"
                );
            }
        }

        self.agent.publish_settings(next);
        self.agent.engine().clear_auth_suspension();
        tracing::info!(
            interval_secs = next.sync_interval.as_secs(),
            batch_size = next.batch_size,
            capacity = next.capacity,
            "Settings updated"
        );

        Ok(self.get_config())
    }

    pub async fn export_records(
        &self,
        format: ExportFormat,
        filter: &RecordFilter,
    ) -> Result<Export> {
        let page = self.agent.store().snapshot(filter).await?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let device = &self.agent.config().device.device_id;

        match format {
            ExportFormat::Json => Ok(Export {
                content_type: "application/json",
                filename: format!("attendance_{}_{}.json", device, stamp),
                body: serde_json::to_string_pretty(&page.records)
                    .map_err(|e| AppError::Internal(e.to_string()))?,
            }),
            ExportFormat::Csv => Ok(Export {
                content_type: "text/csv",
                filename: format!("attendance_{}_{}.csv", device, stamp),
                body: render_csv(&page.records)?,
            }),
        }
    }

    pub async fn register_device(&self) -> Result<()> {
        Ok(self.agent.engine().register_device().await?)
    }
}

fn render_csv(records: &[AttendanceRecord]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer
            .serialize(CsvRow::from(record))
            .map_err(|e| AppError::Internal(e.to_string()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Internal(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| AppError::Internal(e.to_string()))
}
