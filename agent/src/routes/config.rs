//! Runtime configuration routes.

use axum::{extract::State, routing::get, Json, Router};

use crate::config::SettingsUpdate;
use crate::error::Result;
use crate::inspect::ConfigView;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/config", get(get_handler).patch(update_handler))
}

/// GET /api/config - Effective configuration, API key masked.
async fn get_handler(State(state): State<AppState>) -> Json<ConfigView> {
    Json(state.inspector.get_config())
}

/// PATCH /api/config - Change sync interval, batch size or capacity.
async fn update_handler(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<ConfigView>> {
    Ok(Json(state.inspector.update_config(&update).await?))
}
