//! Queue management: job listing, deletion, queue status, pause/resume.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::queue::job::{JobState, QueueJob, QueueName};
use crate::queue::orchestrator::QueueStatus;
use crate::web::errors::ApiError;
use crate::web::state::AppState;

#[derive(Debug, Deserialize)]
pub struct JobListQuery {
    pub queue: Option<String>,
    pub state: Option<String>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_page() -> u64 {
    1
}

fn default_limit() -> u64 {
    50
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<QueueJob>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

fn parse_queue(value: &str) -> Result<QueueName, ApiError> {
    QueueName::parse(value)
        .ok_or_else(|| ApiError::bad_request(format!("unknown queue: {value}")))
}

/// `GET /jobs`: paginated listing with optional queue and state filters.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobListQuery>,
) -> Result<Json<JobListResponse>, ApiError> {
    let queue = query.queue.as_deref().map(parse_queue).transpose()?;
    let job_state = query
        .state
        .as_deref()
        .map(|s| {
            JobState::parse(s).ok_or_else(|| ApiError::bad_request(format!("unknown state: {s}")))
        })
        .transpose()?;

    let (jobs, total) = state
        .orchestrator
        .list_jobs(queue, job_state, query.page, query.limit)
        .await?;
    Ok(Json(JobListResponse {
        jobs,
        total,
        page: query.page.max(1),
        limit: query.limit,
    }))
}

/// `DELETE /jobs/{queue}/{id}`
pub async fn delete_job(
    State(state): State<AppState>,
    Path((queue, id)): Path<(String, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let queue = parse_queue(&queue)?;
    if state.orchestrator.delete_job(queue, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("no job {id} on {queue}")))
    }
}

/// `GET /queues/status`: counts, lifetime totals, and control state for
/// every queue.
pub async fn queues_status(
    State(state): State<AppState>,
) -> Result<Json<Vec<QueueStatus>>, ApiError> {
    Ok(Json(state.orchestrator.queue_status().await?))
}

/// `POST /queues/{queue}/pause`
pub async fn pause_queue(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.pause(parse_queue(&queue)?);
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /queues/{queue}/resume`
pub async fn resume_queue(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.resume(parse_queue(&queue)?);
    Ok(StatusCode::NO_CONTENT)
}
