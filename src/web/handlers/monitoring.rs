//! Monitoring surface: error analytics, metrics history, store health.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::monitoring::error_classifier::ErrorStats;
use crate::monitoring::metrics::MetricsSnapshot;
use crate::queue::job::QueueName;
use crate::queue::store::StoreHealth;
use crate::web::errors::ApiError;
use crate::web::state::AppState;

/// `GET /errors`
pub async fn errors(State(state): State<AppState>) -> Json<ErrorStats> {
    Json(state.classifier.error_stats())
}

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    pub queue: Option<String>,
}

/// `GET /metrics`: retained snapshots, optionally filtered to one queue.
pub async fn metrics(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<Vec<MetricsSnapshot>>, ApiError> {
    let queue = query
        .queue
        .as_deref()
        .map(|q| {
            QueueName::parse(q).ok_or_else(|| ApiError::bad_request(format!("unknown queue: {q}")))
        })
        .transpose()?;
    Ok(Json(state.metrics.metrics(queue)))
}

/// `GET /store/health`
pub async fn store_health(State(state): State<AppState>) -> Result<Json<StoreHealth>, ApiError> {
    Ok(Json(state.orchestrator.store().health().await?))
}

/// `GET /health`: liveness only; no dependencies are touched.
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
