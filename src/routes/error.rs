use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::models::upscale::ErrorResponse;
use crate::services::jobs::JobError;

/// Errors surfaced by the HTTP layer, rendered as `{"detail": "..."}`.
///
/// Collaborator messages are passed through to the caller unchanged.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Upload failed: {0}")]
    UploadFailure(String),

    #[error("Queue publish failed: {0}")]
    QueuePublishFailure(String),

    #[error("Status store unavailable: {0}")]
    StatusUnavailable(String),

    #[error("Job not found")]
    JobNotFound(Uuid),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    Unauthorized(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::UploadFailure(_)
            | ApiError::QueuePublishFailure(_)
            | ApiError::StatusUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::JobNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<JobError> for ApiError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::UploadFailure(e) => ApiError::UploadFailure(e.to_string()),
            JobError::QueuePublishFailure(e) => ApiError::QueuePublishFailure(e.to_string()),
            JobError::StatusUnavailable(e) => ApiError::StatusUnavailable(e.to_string()),
            JobError::JobNotFound(job_id) => ApiError::JobNotFound(job_id),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorResponse {
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
