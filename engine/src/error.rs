//! Error types for the attendance engine.

use crate::RecordId;
use thiserror::Error;

/// All possible errors from the attendance engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Input errors
    #[error("badge identifier is empty")]
    EmptyIdentifier,

    #[error("invalid capacity: {0} (must be at least 1)")]
    InvalidCapacity(usize),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("duplicate record id in snapshot: {0}")]
    DuplicateRecordId(RecordId),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
