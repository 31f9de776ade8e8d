//! # Pipeline Error Taxonomy
//!
//! Structured error types shared across the import pipeline, the queue
//! orchestrator, and the web surface.
//!
//! The taxonomy follows the propagation policy of the system: per-record
//! failures are collected into stats, per-job failures are retried or
//! retained by the orchestrator, and only structural or infrastructure
//! failures surface as request-level errors.

use thiserror::Error;

/// Errors produced by the import pipeline and queue layer.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed input file. Fatal to the import call; no job is enqueued.
    #[error("structural error: {0}")]
    Structural(String),

    /// Per-record validation failure. Non-fatal, collected into stats.
    #[error("validation error: {0}")]
    Validation(String),

    /// Enrichment collaborator failure. Retried with backoff, then retained.
    #[error("external service error: {0}")]
    ExternalService(String),

    /// Collaborator rate limit. A retryable subset of external failures.
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    /// Queue store or I/O failure. Fatal to the initiating call.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    /// Invalid or missing configuration. Requires operator intervention.
    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::Infrastructure(format!("queue store: {err}"))
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Infrastructure(format!("io: {err}"))
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Validation(format!("payload: {err}"))
    }
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        PipelineError::Structural(format!("malformed tabular input: {err}"))
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        if err
            .status()
            .is_some_and(|s| s == reqwest::StatusCode::TOO_MANY_REQUESTS)
        {
            PipelineError::RateLimited(err.to_string())
        } else {
            PipelineError::ExternalService(err.to_string())
        }
    }
}
