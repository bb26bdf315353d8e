//! HTTP route definitions.

mod config;
mod device;
mod health;
mod records;
mod status;
mod sync;

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(status::routes())
        .merge(records::routes())
        .merge(sync::routes())
        .merge(config::routes())
        .merge(device::routes())
}
