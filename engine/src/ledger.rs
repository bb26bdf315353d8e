//! Ledger - the in-memory attendance record set.
//!
//! The ledger owns every stored record, the id high-water mark and the loss
//! counter. It enforces the capacity bound on every insertion and applies
//! delivery results. Persistence is the caller's job: export the state with
//! [`Ledger::export_state`] after each mutation and restore it with
//! [`Ledger::from_snapshot`].

use crate::{
    error::Result, AttendanceRecord, DeviceMeta, Error, LedgerSnapshot, RecordFilter, RecordId,
    RecordPage, SyncState, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const HOUR_MS: u64 = 3_600_000;
const DAY_MS: u64 = 24 * HOUR_MS;

/// A record removed to respect the capacity bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eviction {
    pub record: AttendanceRecord,
    /// True when the evicted record had not been delivered
    pub lossy: bool,
}

/// Result of appending a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendReceipt {
    /// Id assigned to the new record
    pub id: RecordId,
    /// Record evicted to make room, if any
    pub evicted: Option<Eviction>,
}

/// Counters describing the ledger contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total: usize,
    pub pending: usize,
    pub synced: usize,
    pub failed: usize,
    /// Undelivered records evicted over the store's lifetime
    pub loss_count: u64,
    pub capacity: usize,
    /// Highest id ever assigned
    pub last_id: RecordId,
    pub usage_percent: f64,
}

/// Capture activity relative to a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySummary {
    /// Records captured on the same UTC day
    pub today_count: usize,
    /// Records captured during the last hour
    pub last_hour_count: usize,
    /// Today's records per UTC hour
    pub hourly_distribution: [usize; 24],
}

/// The capacity-bounded record set.
#[derive(Debug, Clone, PartialEq)]
pub struct Ledger {
    capacity: usize,
    last_id: RecordId,
    loss_count: u64,
    records: BTreeMap<RecordId, AttendanceRecord>,
}

impl Ledger {
    /// Create an empty ledger.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidCapacity(capacity));
        }
        Ok(Self {
            capacity,
            last_id: 0,
            loss_count: 0,
            records: BTreeMap::new(),
        })
    }

    /// Restore a ledger from a snapshot, evicting down to `capacity` if the
    /// snapshot holds more records.
    pub fn from_snapshot(snapshot: LedgerSnapshot, capacity: usize) -> Result<(Self, Vec<Eviction>)> {
        snapshot.validate()?;

        let mut ledger = Self::new(capacity)?;
        ledger.last_id = snapshot.last_id;
        ledger.loss_count = snapshot.loss_count;
        ledger.records = snapshot.records.into_iter().map(|r| (r.id, r)).collect();

        let evicted = ledger.shrink_to(capacity);
        Ok((ledger, evicted))
    }

    /// Export the full state for persistence.
    pub fn export_state(&self) -> LedgerSnapshot {
        LedgerSnapshot::new(
            self.last_id,
            self.loss_count,
            self.records.values().cloned().collect(),
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last_id(&self) -> RecordId {
        self.last_id
    }

    pub fn loss_count(&self) -> u64 {
        self.loss_count
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: RecordId) -> Option<&AttendanceRecord> {
        self.records.get(&id)
    }

    /// All records in ascending id order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &AttendanceRecord> {
        self.records.values()
    }

    /// Append a new pending record.
    ///
    /// When the ledger is full, the oldest synced record is evicted first.
    /// Without any synced record the oldest undelivered one goes and the
    /// loss counter is incremented.
    pub fn append(
        &mut self,
        identifier: &str,
        captured_at: Timestamp,
        device: DeviceMeta,
    ) -> Result<AppendReceipt> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(Error::EmptyIdentifier);
        }

        let evicted = if self.records.len() >= self.capacity {
            self.evict_one()
        } else {
            None
        };

        self.last_id += 1;
        let id = self.last_id;
        self.records
            .insert(id, AttendanceRecord::new(id, identifier, captured_at, device));

        Ok(AppendReceipt { id, evicted })
    }

    /// Oldest undelivered records, ascending by id.
    pub fn list_unsynced(&self, limit: usize) -> Vec<AttendanceRecord> {
        self.records
            .values()
            .filter(|r| r.sync_state.is_unsynced())
            .take(limit)
            .cloned()
            .collect()
    }

    /// Number of undelivered records.
    pub fn unsynced_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.sync_state.is_unsynced())
            .count()
    }

    /// Mark records as delivered.
    ///
    /// Already synced and unknown ids are ignored. Returns how many records
    /// changed state.
    pub fn mark_synced(&mut self, ids: &[RecordId], now: Timestamp) -> usize {
        let mut changed = 0;
        for id in ids.iter().collect::<BTreeSet<_>>() {
            if let Some(record) = self.records.get_mut(id) {
                if record.mark_synced(now) {
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Record an unacknowledged delivery attempt for each id.
    ///
    /// Already synced and unknown ids are ignored. Returns how many records
    /// changed state.
    pub fn mark_failed(&mut self, ids: &[RecordId], now: Timestamp) -> usize {
        let mut changed = 0;
        for id in ids.iter().collect::<BTreeSet<_>>() {
            if let Some(record) = self.records.get_mut(id) {
                if record.mark_failed(now) {
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Remove every synced record. Returns the number removed.
    pub fn clear_synced(&mut self) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| !r.is_synced());
        before - self.records.len()
    }

    /// Change the capacity, evicting records if the ledger is now over it.
    pub fn set_capacity(&mut self, capacity: usize) -> Result<Vec<Eviction>> {
        if capacity == 0 {
            return Err(Error::InvalidCapacity(capacity));
        }
        self.capacity = capacity;
        Ok(self.shrink_to(capacity))
    }

    /// Query a page of records.
    pub fn query(&self, filter: &RecordFilter) -> RecordPage {
        filter.apply(self.records.values())
    }

    pub fn stats(&self) -> StoreStats {
        let mut pending = 0;
        let mut synced = 0;
        let mut failed = 0;
        for record in self.records.values() {
            match record.sync_state {
                SyncState::Pending => pending += 1,
                SyncState::Synced => synced += 1,
                SyncState::Failed { .. } => failed += 1,
            }
        }

        let total = self.records.len();
        let usage_percent = (total as f64 * 1000.0 / self.capacity as f64).round() / 10.0;

        StoreStats {
            total,
            pending,
            synced,
            failed,
            loss_count: self.loss_count,
            capacity: self.capacity,
            last_id: self.last_id,
            usage_percent,
        }
    }

    /// Summarize capture activity as seen at `now`.
    pub fn activity(&self, now: Timestamp) -> ActivitySummary {
        let today = now / DAY_MS;
        let hour_ago = now.saturating_sub(HOUR_MS);

        let mut summary = ActivitySummary {
            today_count: 0,
            last_hour_count: 0,
            hourly_distribution: [0; 24],
        };

        for record in self.records.values() {
            let at = record.captured_at;
            if at / DAY_MS == today {
                summary.today_count += 1;
                summary.hourly_distribution[((at % DAY_MS) / HOUR_MS) as usize] += 1;
            }
            if at >= hour_ago {
                summary.last_hour_count += 1;
            }
        }

        summary
    }

    fn shrink_to(&mut self, capacity: usize) -> Vec<Eviction> {
        let mut evicted = Vec::new();
        while self.records.len() > capacity {
            match self.evict_one() {
                Some(eviction) => evicted.push(eviction),
                None => break,
            }
        }
        evicted
    }

    fn evict_one(&mut self) -> Option<Eviction> {
        let victim = self
            .records
            .values()
            .find(|r| r.is_synced())
            .or_else(|| self.records.values().next())
            .map(|r| r.id)?;

        let record = self.records.remove(&victim)?;
        let lossy = !record.is_synced();
        if lossy {
            self.loss_count += 1;
        }
        Some(Eviction { record, lossy })
    }
}
