//! Configuration management for the agent.
//!
//! Static settings are loaded once from the environment. The subset that can
//! change at runtime lives in [`SyncSettings`], an immutable value swapped as
//! a whole through a watch channel.

use attend_engine::DeviceMeta;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Largest batch the remote service is asked to accept in one call.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Agent configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Device identity stamped on every record
    pub device: DeviceMeta,
    /// Base URL of the collection service
    pub api_url: String,
    /// Pre-shared bearer credential
    pub api_key: String,
    /// Timeout for single remote calls; batch calls get twice this
    pub request_timeout: Duration,
    /// Path of the persisted record store
    pub storage_path: PathBuf,
    /// How long store callers wait for the lock before giving up
    pub lock_timeout: Duration,
    /// Runtime-adjustable sync settings
    pub sync: SyncSettings,
    /// Batches submitted per cycle while every batch is fully acknowledged
    pub max_batches_per_cycle: usize,
    /// Minimum backlog before a cycle submits anything
    pub min_records_for_sync: usize,
    /// Ceiling for the backed-off sync interval
    pub max_backoff: Duration,
    /// Failed cycles tolerated before the interval starts growing
    pub backoff_threshold: u32,
    /// Deliver each record right after capture, in addition to batches
    pub immediate_sync: bool,
    /// Clear synced records after a cycle that delivered something
    pub cleanup_after_sync: bool,
    /// Run one last cycle while draining
    pub final_sync: bool,
    /// Repeated reads of the same card inside this window are dropped
    pub debounce_interval: Duration,
    /// Capacity of the scan event queue
    pub event_queue_capacity: usize,
    /// Bound on appending queued events during shutdown
    pub drain_timeout: Duration,
    /// Attempts for an append that keeps hitting a busy store
    pub append_retries: u32,
    /// Reader device path; stdin when unset
    pub reader_path: Option<PathBuf>,
    /// Inspection server host address
    pub host: String,
    /// Inspection server port
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let device = DeviceMeta::new(
            required("ATTEND_DEVICE_ID")?,
            env::var("ATTEND_DEVICE_NAME").unwrap_or_else(|_| "Attendance Reader".to_string()),
            env::var("ATTEND_LOCATION").unwrap_or_else(|_| "Unknown".to_string()),
        );

        let sync = SyncSettings {
            sync_interval: Duration::from_secs(parse_or("ATTEND_SYNC_INTERVAL_SECS", 300)?),
            batch_size: parse_or("ATTEND_BATCH_SIZE", 50)?,
            capacity: parse_or("ATTEND_MAX_RECORDS", 10_000)?,
        };
        sync.validate()?;

        let config = Self {
            device,
            api_url: required("ATTEND_API_URL")?
                .trim_end_matches('/')
                .to_string(),
            api_key: required("ATTEND_API_KEY")?,
            request_timeout: Duration::from_secs(parse_or("ATTEND_REQUEST_TIMEOUT_SECS", 10)?),
            storage_path: env::var("ATTEND_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/attendance.json")),
            lock_timeout: Duration::from_millis(parse_or("ATTEND_LOCK_TIMEOUT_MS", 2000)?),
            sync,
            max_batches_per_cycle: parse_or("ATTEND_MAX_BATCHES_PER_CYCLE", 20)?,
            min_records_for_sync: parse_or("ATTEND_MIN_RECORDS_FOR_SYNC", 1)?,
            max_backoff: Duration::from_secs(parse_or("ATTEND_MAX_BACKOFF_SECS", 3600)?),
            backoff_threshold: parse_or("ATTEND_BACKOFF_THRESHOLD", 1)?,
            immediate_sync: parse_or("ATTEND_IMMEDIATE_SYNC", false)?,
            cleanup_after_sync: parse_or("ATTEND_CLEANUP_AFTER_SYNC", false)?,
            final_sync: parse_or("ATTEND_FINAL_SYNC", true)?,
            debounce_interval: Duration::from_secs(parse_or("ATTEND_DEBOUNCE_SECS", 2)?),
            event_queue_capacity: parse_or("ATTEND_EVENT_QUEUE", 256)?,
            drain_timeout: Duration::from_secs(parse_or("ATTEND_DRAIN_TIMEOUT_SECS", 5)?),
            append_retries: parse_or("ATTEND_APPEND_RETRIES", 4)?,
            reader_path: env::var("ATTEND_READER_PATH").ok().map(PathBuf::from),
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_or("PORT", 8080)?,
        };
        config.validate()?;

        Ok(config)
    }

    /// A configuration with defaults for everything but identity and endpoint.
    pub fn new(device: DeviceMeta, api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            device,
            api_url: api_url.into(),
            api_key: api_key.into(),
            request_timeout: Duration::from_secs(10),
            storage_path: PathBuf::from("data/attendance.json"),
            lock_timeout: Duration::from_secs(2),
            sync: SyncSettings::default(),
            max_batches_per_cycle: 20,
            min_records_for_sync: 1,
            max_backoff: Duration::from_secs(3600),
            backoff_threshold: 1,
            immediate_sync: false,
            cleanup_after_sync: false,
            final_sync: true,
            debounce_interval: Duration::from_secs(2),
            event_queue_capacity: 256,
            drain_timeout: Duration::from_secs(5),
            append_retries: 4,
            reader_path: None,
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sync.validate()?;
        if self.device.device_id.trim().is_empty() {
            return Err(ConfigError::Invalid("ATTEND_DEVICE_ID", "must not be empty".into()));
        }
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(ConfigError::Invalid(
                "ATTEND_API_URL",
                "must start with http:// or https://".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid("ATTEND_REQUEST_TIMEOUT_SECS", "must be positive".into()));
        }
        if self.event_queue_capacity == 0 {
            return Err(ConfigError::Invalid("ATTEND_EVENT_QUEUE", "must be positive".into()));
        }
        if self.max_batches_per_cycle == 0 {
            return Err(ConfigError::Invalid(
                "ATTEND_MAX_BATCHES_PER_CYCLE",
                "must be positive".into(),
            ));
        }
        Ok(())
    }

    /// API key with all but the last four characters hidden.
    pub fn masked_api_key(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        if chars.len() <= 8 {
            return "***".to_string();
        }
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("***{}", tail)
    }
}

/// Settings that can be changed while the agent runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// Base interval between scheduled cycles
    #[serde(with = "duration_secs")]
    pub sync_interval: Duration,
    /// Records per batch call
    pub batch_size: usize,
    /// Maximum number of stored records
    pub capacity: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(300),
            batch_size: 50,
            capacity: 10_000,
        }
    }
}

impl SyncSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync_interval < Duration::from_secs(1) {
            return Err(ConfigError::Invalid(
                "ATTEND_SYNC_INTERVAL_SECS",
                "must be at least 1 second".into(),
            ));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::Invalid(
                "ATTEND_BATCH_SIZE",
                format!("must be between 1 and {}", MAX_BATCH_SIZE),
            ));
        }
        if self.capacity == 0 {
            return Err(ConfigError::Invalid("ATTEND_MAX_RECORDS", "must be at least 1".into()));
        }
        Ok(())
    }

    /// Apply a partial update, returning the validated result.
    pub fn apply(&self, update: &SettingsUpdate) -> Result<Self, ConfigError> {
        let next = Self {
            sync_interval: update
                .sync_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(self.sync_interval),
            batch_size: update.batch_size.unwrap_or(self.batch_size),
            capacity: update.capacity.unwrap_or(self.capacity),
        };
        next.validate()?;
        Ok(next)
    }
}

/// Partial update of [`SyncSettings`] from the inspection surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SettingsUpdate {
    pub sync_interval_secs: Option<u64>,
    pub batch_size: Option<usize>,
    pub capacity: Option<usize>,
}

impl SettingsUpdate {
    pub fn is_empty(&self) -> bool {
        self.sync_interval_secs.is_none() && self.batch_size.is_none() && self.capacity.is_none()
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name, format!("cannot parse '{}'", raw))),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("Invalid {0}: {1}")]
    Invalid(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::new(
            DeviceMeta::new("gate-01", "North Gate", "Building A"),
            "http://localhost:3000",
            "secret-key-123456",
        )
    }

    #[test]
    fn defaults_are_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn rejects_bad_url() {
        let mut config = config();
        config.api_url = "localhost:3000".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid("ATTEND_API_URL", _))
        ));
    }

    #[test]
    fn masks_api_key() {
        assert_eq!(config().masked_api_key(), "***3456");

        let mut short = config();
        short.api_key = "abc".to_string();
        assert_eq!(short.masked_api_key(), "***");
    }

    #[test]
    fn settings_update_applies_subset() {
        let settings = SyncSettings::default();
        let update = SettingsUpdate {
            batch_size: Some(25),
            ..Default::default()
        };

        let next = settings.apply(&update).unwrap();
        assert_eq!(next.batch_size, 25);
        assert_eq!(next.sync_interval, settings.sync_interval);
        assert_eq!(next.capacity, settings.capacity);
    }

    #[test]
    fn settings_update_validates() {
        let settings = SyncSettings::default();

        let zero_interval = SettingsUpdate {
            sync_interval_secs: Some(0),
            ..Default::default()
        };
        assert!(settings.apply(&zero_interval).is_err());

        let huge_batch = SettingsUpdate {
            batch_size: Some(MAX_BATCH_SIZE + 1),
            ..Default::default()
        };
        assert!(settings.apply(&huge_batch).is_err());

        let zero_capacity = SettingsUpdate {
            capacity: Some(0),
            ..Default::default()
        };
        assert!(settings.apply(&zero_capacity).is_err());
    }

    #[test]
    fn settings_update_rejects_unknown_fields() {
        let parsed: Result<SettingsUpdate, _> =
            serde_json::from_str(r#"{"batchSize": 10, "apiKey": "x"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn settings_serialize_interval_as_seconds() {
        let value = serde_json::to_value(SyncSettings::default()).unwrap();
        assert_eq!(value["syncInterval"], 300);
        assert_eq!(value["batchSize"], 50);
    }
}
