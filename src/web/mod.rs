//! HTTP surface for the pipeline: import endpoints, queue management, and
//! monitoring, served by axum over the shared [`AppState`].

pub mod errors;
pub mod handlers;
pub mod state;

use axum::routing::{delete, get, post};
use axum::Router;

pub use errors::ApiError;
pub use state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/import", post(handlers::import::import))
        .route("/validate", post(handlers::import::validate))
        .route("/enrich", post(handlers::import::enrich))
        .route("/jobs", get(handlers::jobs::list_jobs))
        .route("/jobs/:queue/:id", delete(handlers::jobs::delete_job))
        .route("/queues/status", get(handlers::jobs::queues_status))
        .route("/queues/:queue/pause", post(handlers::jobs::pause_queue))
        .route("/queues/:queue/resume", post(handlers::jobs::resume_queue))
        .route("/errors", get(handlers::monitoring::errors))
        .route("/metrics", get(handlers::monitoring::metrics))
        .route("/store/health", get(handlers::monitoring::store_health))
        .route("/health", get(handlers::monitoring::health))
        .with_state(state)
}
