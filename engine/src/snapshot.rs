//! Snapshot format for persisting the ledger.
//!
//! The snapshot is the full persisted document: every record plus the id
//! high-water mark and the loss counter. Records are kept in ascending id
//! order so serialization is deterministic.

use crate::{error::Result, AttendanceRecord, Error, RecordId};
use serde::{Deserialize, Serialize};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time copy of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Highest id ever assigned
    pub last_id: RecordId,
    /// Undelivered records lost to eviction
    pub loss_count: u64,
    /// All stored records, ascending by id
    pub records: Vec<AttendanceRecord>,
}

impl LedgerSnapshot {
    pub fn new(last_id: RecordId, loss_count: u64, records: Vec<AttendanceRecord>) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            last_id,
            loss_count,
            records,
        }
    }

    /// An empty snapshot, as for a freshly provisioned device.
    pub fn empty() -> Self {
        Self::new(0, 0, Vec::new())
    }

    /// Check structural invariants: unique ascending ids, none above the
    /// high-water mark, no blank identifiers.
    pub fn validate(&self) -> Result<()> {
        if self.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                self.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        let mut previous: Option<RecordId> = None;
        for record in &self.records {
            if let Some(prev) = previous {
                if record.id == prev {
                    return Err(Error::DuplicateRecordId(record.id));
                }
                if record.id < prev {
                    return Err(Error::InvalidSnapshot(format!(
                        "records out of order: {} after {}",
                        record.id, prev
                    )));
                }
            }
            if record.id > self.last_id {
                return Err(Error::InvalidSnapshot(format!(
                    "record id {} above high-water mark {}",
                    record.id, self.last_id
                )));
            }
            if record.identifier.trim().is_empty() {
                return Err(Error::InvalidSnapshot(format!(
                    "record {} has an empty identifier",
                    record.id
                )));
            }
            previous = Some(record.id);
        }

        Ok(())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON and validate.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }
}
