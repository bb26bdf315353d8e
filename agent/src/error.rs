//! Unified error handling for the agent.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;

/// Record store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store busy: lock not acquired within {waited:?}")]
    Busy { waited: Duration },

    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored state is corrupt: {0}")]
    Corrupt(String),

    #[error("Rejected: {0}")]
    Rejected(#[from] attend_engine::Error),
}

impl StoreError {
    pub fn is_busy(&self) -> bool {
        matches!(self, StoreError::Busy { .. })
    }
}

/// Errors talking to the collection service.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Collection service unreachable: {0}")]
    NetworkUnavailable(String),

    #[error("Credentials rejected (HTTP {status})")]
    AuthRejected { status: u16 },

    #[error("Collection service returned HTTP {status}")]
    Remote { status: u16 },

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Decode(err.to_string())
        } else {
            SyncError::NetworkUnavailable(err.to_string())
        }
    }
}

/// Errors that prevent the agent from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Sync setup error: {0}")]
    Sync(#[from] SyncError),
}

/// Inspection API error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Store busy")]
    Busy,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Busy { .. } => AppError::Busy,
            StoreError::Rejected(e) => AppError::BadRequest(e.to_string()),
            other => AppError::Storage(other.to_string()),
        }
    }
}

impl From<crate::config::ConfigError> for AppError {
    fn from(err: crate::config::ConfigError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Store(e) => e.into(),
            other => AppError::Unavailable(other.to_string()),
        }
    }
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            AppError::Busy => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Store busy, retry shortly".to_string(),
                None,
            ),
            AppError::Storage(msg) => {
                tracing::error!("Storage error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Storage error".to_string(),
                    Some(msg.clone()),
                )
            }
            AppError::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Unavailable".to_string(),
                Some(msg.clone()),
            ),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    Some(msg.clone()),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
