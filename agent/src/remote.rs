//! HTTP client for the remote collection service.

use crate::config::Config;
use crate::error::SyncError;
use attend_engine::{AttendanceRecord, DeviceMeta, RecordId, Timestamp};
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A record as submitted to the collection service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRecord {
    pub record_id: RecordId,
    pub device_id: String,
    pub device_name: String,
    pub location: String,
    pub identifier: String,
    pub captured_at: DateTime<Utc>,
}

impl From<&AttendanceRecord> for WireRecord {
    fn from(record: &AttendanceRecord) -> Self {
        Self {
            record_id: record.id,
            device_id: record.device.device_id.clone(),
            device_name: record.device.device_name.clone(),
            location: record.device.location.clone(),
            identifier: record.identifier.clone(),
            captured_at: to_datetime(record.captured_at),
        }
    }
}

/// Body of `POST /attendance/batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub batch_id: Uuid,
    pub records: Vec<WireRecord>,
}

/// Per-record result in a batch response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordResult {
    pub record_id: RecordId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    #[serde(default)]
    pub results: Vec<RecordResult>,
}

/// Body of `POST /devices/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub device_id: String,
    pub device_name: String,
    pub location: String,
    pub metadata: RegisterMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterMetadata {
    pub software_version: String,
    pub registered_at: DateTime<Utc>,
}

/// Body of `POST /devices/heartbeat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub device_id: String,
    pub ts: DateTime<Utc>,
}

/// Client for the collection service.
#[derive(Debug, Clone)]
pub struct CollectionClient {
    base_url: String,
    api_key: String,
    device: DeviceMeta,
    timeout: Duration,
    client: Client,
}

impl CollectionClient {
    pub fn new(config: &Config) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::NetworkUnavailable(e.to_string()))?;

        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            device: config.device.clone(),
            timeout: config.request_timeout,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn device(&self) -> &DeviceMeta {
        &self.device
    }

    /// Ping the service. Returns the round-trip time.
    pub async fn health(&self) -> Result<Duration, SyncError> {
        let started = Instant::now();
        let resp = self.get("/health").send().await?;
        check(resp)?;
        Ok(started.elapsed())
    }

    /// Submit a single record.
    pub async fn submit_one(&self, record: &AttendanceRecord) -> Result<(), SyncError> {
        let resp = self
            .post("/attendance")
            .json(&WireRecord::from(record))
            .send()
            .await?;
        check(resp)?;
        Ok(())
    }

    /// Submit a batch of records and return the per-record results.
    pub async fn submit_batch(
        &self,
        batch_id: Uuid,
        records: &[AttendanceRecord],
    ) -> Result<Vec<RecordResult>, SyncError> {
        let body = BatchRequest {
            batch_id,
            records: records.iter().map(WireRecord::from).collect(),
        };

        let resp = self
            .post("/attendance/batch")
            .timeout(self.timeout * 2)
            .json(&body)
            .send()
            .await?;

        let parsed: BatchResponse = check(resp)?
            .json()
            .await
            .map_err(|e| SyncError::Decode(e.to_string()))?;

        Ok(parsed.results)
    }

    pub async fn register_device(&self) -> Result<(), SyncError> {
        let body = RegisterRequest {
            device_id: self.device.device_id.clone(),
            device_name: self.device.device_name.clone(),
            location: self.device.location.clone(),
            metadata: RegisterMetadata {
                software_version: env!("CARGO_PKG_VERSION").to_string(),
                registered_at: Utc::now(),
            },
        };

        let resp = self.post("/devices/register").json(&body).send().await?;
        check(resp)?;
        Ok(())
    }

    pub async fn heartbeat(&self) -> Result<(), SyncError> {
        let body = Heartbeat {
            device_id: self.device.device_id.clone(),
            ts: Utc::now(),
        };

        let resp = self.post("/devices/heartbeat").json(&body).send().await?;
        check(resp)?;
        Ok(())
    }

    /// Fetch what the service knows about this device.
    pub async fn device_info(&self) -> Result<serde_json::Value, SyncError> {
        let path = format!("/devices/{}", self.device.device_id);
        let resp = self.get(&path).send().await?;
        check(resp)?
            .json()
            .await
            .map_err(|e| SyncError::Decode(e.to_string()))
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.get(format!("{}{}", self.base_url, path)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.post(format!("{}{}", self.base_url, path)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.api_key)
            .header("X-Device-Id", &self.device.device_id)
    }
}

fn check(resp: Response) -> Result<Response, SyncError> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(SyncError::AuthRejected {
            status: status.as_u16(),
        });
    }
    if !status.is_success() {
        return Err(SyncError::Remote {
            status: status.as_u16(),
        });
    }
    Ok(resp)
}

/// Convert engine milliseconds to a UTC timestamp.
pub fn to_datetime(ms: Timestamp) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
