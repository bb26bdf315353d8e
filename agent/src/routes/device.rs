//! Device registration route.

use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;

use crate::error::Result;
use crate::AppState;

#[derive(Serialize)]
pub struct RegisterResponse {
    pub registered: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/device/register", post(register_handler))
}

/// POST /api/device/register - Register this device with the collection service.
async fn register_handler(State(state): State<AppState>) -> Result<Json<RegisterResponse>> {
    state.inspector.register_device().await?;
    Ok(Json(RegisterResponse { registered: true }))
}
