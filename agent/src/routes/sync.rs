//! Manual sync trigger.

use axum::{extract::State, routing::post, Json, Router};

use crate::error::Result;
use crate::sync::CycleReport;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/sync", post(trigger_handler))
}

/// POST /api/sync - Run a sync cycle now and return its report.
async fn trigger_handler(State(state): State<AppState>) -> Result<Json<CycleReport>> {
    Ok(Json(state.inspector.trigger_sync_now().await?))
}
