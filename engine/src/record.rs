//! Attendance records and their delivery state.

use crate::{RecordId, Timestamp};
use serde::{Deserialize, Serialize};

/// Delivery state of a record.
///
/// Transitions are `Pending -> Synced` (terminal) and `Pending <-> Failed`.
/// A failed record stays eligible for delivery and may still become `Synced`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SyncState {
    /// Stored locally, not yet attempted
    Pending,
    /// Acknowledged by the remote service
    Synced,
    /// At least one delivery attempt was not acknowledged
    Failed { attempts: u32 },
}

impl SyncState {
    /// Whether the record still needs delivering.
    pub fn is_unsynced(&self) -> bool {
        !matches!(self, SyncState::Synced)
    }

    /// Number of unacknowledged delivery attempts so far.
    pub fn attempts(&self) -> u32 {
        match self {
            SyncState::Failed { attempts } => *attempts,
            _ => 0,
        }
    }

    /// Short lowercase label, as used in filters and exports.
    pub fn label(&self) -> &'static str {
        match self {
            SyncState::Pending => "pending",
            SyncState::Synced => "synced",
            SyncState::Failed { .. } => "failed",
        }
    }
}

/// Static metadata of the capturing device, stamped on every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMeta {
    pub device_id: String,
    pub device_name: String,
    pub location: String,
}

impl DeviceMeta {
    pub fn new(
        device_id: impl Into<String>,
        device_name: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
            location: location.into(),
        }
    }
}

/// A single captured badge scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    /// Local sequence number, never reused
    pub id: RecordId,
    /// Badge code as read from the card
    pub identifier: String,
    /// When the card was scanned (milliseconds since epoch, UTC)
    pub captured_at: Timestamp,
    /// Device metadata at capture time
    #[serde(flatten)]
    pub device: DeviceMeta,
    /// Delivery state
    #[serde(flatten)]
    pub sync_state: SyncState,
    /// When delivery was last attempted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<Timestamp>,
}

impl AttendanceRecord {
    /// Create a new pending record.
    pub fn new(
        id: RecordId,
        identifier: impl Into<String>,
        captured_at: Timestamp,
        device: DeviceMeta,
    ) -> Self {
        Self {
            id,
            identifier: identifier.into(),
            captured_at,
            device,
            sync_state: SyncState::Pending,
            last_attempt_at: None,
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self.sync_state, SyncState::Synced)
    }

    /// Record an acknowledged delivery. Returns false if already synced.
    pub fn mark_synced(&mut self, now: Timestamp) -> bool {
        if self.is_synced() {
            return false;
        }
        self.sync_state = SyncState::Synced;
        self.last_attempt_at = Some(now);
        true
    }

    /// Record an unacknowledged delivery attempt. Returns false if already synced.
    pub fn mark_failed(&mut self, now: Timestamp) -> bool {
        if self.is_synced() {
            return false;
        }
        self.sync_state = SyncState::Failed {
            attempts: self.sync_state.attempts().saturating_add(1),
        };
        self.last_attempt_at = Some(now);
        true
    }
}
