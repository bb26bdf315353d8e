//! # Attend Engine
//!
//! The pure core of the attend edge agent: the capacity-bounded attendance
//! ledger and the policies that drive its delivery to a remote service.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches files, network, or clocks. Callers
//!   pass timestamps in and persist snapshots out.
//! - **Deterministic**: the same inputs always produce the same ledger.
//! - **Testable**: pure logic, no mocks needed.
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! Every badge scan becomes an [`AttendanceRecord`] with:
//! - A local sequence id, strictly increasing and never reused
//! - The badge identifier and capture timestamp
//! - Device metadata ([`DeviceMeta`])
//! - A delivery state ([`SyncState`]): pending, synced, or failed with an
//!   attempt count
//!
//! ### Ledger
//!
//! The [`Ledger`] holds the records under a fixed capacity. When full, it
//! evicts the oldest synced record, or the oldest undelivered one if nothing
//! has been synced yet, counting the latter as a loss.
//!
//! ### Policies
//!
//! - [`Backoff`] stretches the sync interval after consecutive failures
//! - [`ScanDebouncer`] drops repeated reads of the same card
//!
//! ## Quick Start
//!
//! ```rust
//! use attend_engine::{DeviceMeta, Ledger, LedgerSnapshot, SyncState};
//!
//! let device = DeviceMeta::new("gate-01", "North Gate", "Building A");
//! let mut ledger = Ledger::new(1000).unwrap();
//!
//! let receipt = ledger.append("04A1B2C3", 1706745600000, device).unwrap();
//! assert_eq!(receipt.id, 1);
//!
//! let batch = ledger.list_unsynced(50);
//! assert_eq!(batch.len(), 1);
//!
//! ledger.mark_synced(&[receipt.id], 1706745660000);
//! assert_eq!(ledger.get(receipt.id).unwrap().sync_state, SyncState::Synced);
//!
//! let json = ledger.export_state().to_json().unwrap();
//! let snapshot = LedgerSnapshot::from_json(&json).unwrap();
//! let (restored, _) = Ledger::from_snapshot(snapshot, 1000).unwrap();
//! assert_eq!(restored.last_id(), 1);
//! ```

pub mod backoff;
pub mod debounce;
pub mod error;
pub mod filter;
pub mod ledger;
pub mod record;
pub mod snapshot;

// Re-export main types at crate root
pub use backoff::Backoff;
pub use debounce::ScanDebouncer;
pub use error::Error;
pub use filter::{RecordFilter, RecordPage, SortOrder, StateFilter, DEFAULT_PAGE_LIMIT};
pub use ledger::{ActivitySummary, AppendReceipt, Eviction, Ledger, StoreStats};
pub use record::{AttendanceRecord, DeviceMeta, SyncState};
pub use snapshot::{LedgerSnapshot, SNAPSHOT_FORMAT_VERSION};

/// Type aliases for clarity
pub type RecordId = u64;
pub type Timestamp = u64;
