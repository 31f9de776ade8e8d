//! API error mapping. The pipeline taxonomy determines the HTTP status;
//! the body is a stable `{ "error": ... }` envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::PipelineError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::Structural(_) | PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            PipelineError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            PipelineError::Infrastructure(_) | PipelineError::Configuration(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status() {
        let err: ApiError = PipelineError::Structural("bad file".to_string()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err: ApiError = PipelineError::RateLimited("quota".to_string()).into();
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);

        let err: ApiError = PipelineError::Infrastructure("store".to_string()).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
