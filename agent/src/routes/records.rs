//! Record listing, statistics and export routes.

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::inspect::{ExportFormat, RecordStats};
use crate::AppState;
use attend_engine::{RecordFilter, RecordPage, SortOrder, StateFilter};

/// Largest page a single listing request may ask for.
const MAX_PAGE_LIMIT: usize = 1000;

/// Query parameters for an export.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExportQuery {
    pub format: ExportFormat,
    pub state: Option<StateFilter>,
    pub search: Option<String>,
    pub order: Option<SortOrder>,
}

impl ExportQuery {
    fn filter(&self) -> RecordFilter {
        RecordFilter {
            state: self.state,
            search: self.search.clone(),
            order: self.order.unwrap_or(SortOrder::Oldest),
            ..RecordFilter::all()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearResponse {
    pub removed: usize,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/records", get(list_handler))
        .route("/api/records/stats", get(stats_handler))
        .route("/api/records/export", get(export_handler))
        .route("/api/records/clear-synced", post(clear_handler))
}

/// GET /api/records - Page through stored records.
async fn list_handler(
    State(state): State<AppState>,
    Query(mut filter): Query<RecordFilter>,
) -> Result<Json<RecordPage>> {
    filter.limit = filter.limit.min(MAX_PAGE_LIMIT);
    Ok(Json(state.inspector.list_records(&filter).await?))
}

/// GET /api/records/stats - Counters and capture activity.
async fn stats_handler(State(state): State<AppState>) -> Result<Json<RecordStats>> {
    Ok(Json(state.inspector.stats().await?))
}

/// GET /api/records/export - Download records as CSV or JSON.
async fn export_handler(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Response> {
    let export = state
        .inspector
        .export_records(query.format, &query.filter())
        .await?;

    let disposition = format!("attachment; filename=\"{}\"", export.filename);
    Ok((
        [
            (header::CONTENT_TYPE, export.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        export.body,
    )
        .into_response())
}

/// POST /api/records/clear-synced - Remove delivered records.
async fn clear_handler(State(state): State<AppState>) -> Result<Json<ClearResponse>> {
    let removed = state.inspector.clear_synced().await?;
    Ok(Json(ClearResponse { removed }))
}
