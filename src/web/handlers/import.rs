//! Import surface: file intake, validation preview, direct enrichment.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::import::record::{PreviewRecord, StageOutcome, StageStats};
use crate::web::errors::ApiError;
use crate::web::state::AppState;

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub accepted: u64,
    pub stats: StageStats,
}

/// `POST /import`: accept a raw CSV body and enqueue one job per record.
pub async fn import(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<ImportResponse>, ApiError> {
    let stats = state.pipeline.import(&body).await?;
    Ok(Json(ImportResponse {
        accepted: stats.success,
        stats,
    }))
}

/// `POST /validate`: parse and validate without touching the queues.
pub async fn validate(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<StageOutcome>, ApiError> {
    Ok(Json(state.pipeline.validate(&body)?))
}

/// `POST /enrich`: re-validate, enrich, and persist the given records.
pub async fn enrich(
    State(state): State<AppState>,
    Json(records): Json<Vec<PreviewRecord>>,
) -> Result<Json<StageOutcome>, ApiError> {
    if records.is_empty() {
        return Err(ApiError::bad_request("no records to enrich"));
    }
    Ok(Json(state.pipeline.enrich(records).await?))
}
