//! Monitor handlers.

use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use serde_json::json;

use super::MonitorState;
use crate::db::ImportRun;
use crate::downloader::StatsSnapshot;
use crate::error::Result;
use crate::types::StatusCounts;

/// Body of `GET /status`
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Live counters, or `null` when no download is attached
    pub run: Option<StatsSnapshot>,
    /// Records per status in the index
    pub index: StatusCounts,
    /// Total records in the index
    pub total: u64,
    /// Most recent finished import
    pub last_import: Option<ImportRun>,
}

/// GET /health - Health check
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// GET /status - Run progress and index counts
pub async fn status(State(state): State<MonitorState>) -> Result<Json<StatusResponse>> {
    let index = state.db.status_counts().await?;
    let last_import = state.db.last_import().await?;

    Ok(Json(StatusResponse {
        run: state.stats.as_ref().map(|stats| stats.snapshot()),
        total: index.total(),
        index,
        last_import,
    }))
}
