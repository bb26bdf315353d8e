//! Attend Agent - edge agent for badge attendance capture.
//!
//! Badge reads are appended to a durable local store the moment they happen
//! and delivered to a remote collection service in the background. The
//! agent keeps capturing while the network is down and catches up once it
//! is back.

pub mod config;
pub mod error;
pub mod inspect;
pub mod orchestrator;
pub mod remote;
pub mod routes;
pub mod source;
pub mod store;
pub mod sync;

use crate::inspect::Inspector;
use attend_engine::Timestamp;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub inspector: Inspector,
}

/// Build the inspection router.
pub fn app(inspector: Inspector) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(AppState { inspector })
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}
