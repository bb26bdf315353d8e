//! Agent status endpoint.

use axum::{extract::State, routing::get, Json, Router};

use crate::error::Result;
use crate::inspect::AgentStatus;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/status", get(status_handler))
}

/// GET /api/status - Store, sync and capture state.
async fn status_handler(State(state): State<AppState>) -> Result<Json<AgentStatus>> {
    Ok(Json(state.inspector.status().await?))
}
