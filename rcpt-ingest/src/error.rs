//! Error types for rcpt-ingest HTTP handlers
//!
//! Every lifecycle failure is translated here into a status code and a JSON
//! body: `{ "message", "error": { "code", "message" } }`, plus extraction
//! diagnostics (`errorDetail`, `rawResponse`, `promptFeedback`) when present.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;

use crate::services::{ExtractionFailure, LifecycleError};

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request (400)
    #[error("{0}")]
    BadRequest(String),

    /// Controller failure, mapped per variant
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Lifecycle(err) => match err {
                LifecycleError::NotFound(_) => StatusCode::NOT_FOUND,
                LifecycleError::PreconditionFailed(_)
                | LifecycleError::UnsupportedMediaType(_)
                | LifecycleError::InvalidUpload(_) => StatusCode::BAD_REQUEST,
                LifecycleError::Conflict(_) => StatusCode::CONFLICT,
                LifecycleError::Extraction(_)
                | LifecycleError::Filesystem(_)
                | LifecycleError::Storage(_)
                | LifecycleError::Reconciliation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Lifecycle(err) => match err {
                LifecycleError::NotFound(_) => "NOT_FOUND",
                LifecycleError::PreconditionFailed(_) => "PRECONDITION_FAILED",
                LifecycleError::UnsupportedMediaType(_) => "UNSUPPORTED_MEDIA_TYPE",
                LifecycleError::InvalidUpload(_) => "INVALID_UPLOAD",
                LifecycleError::Conflict(_) => "CONFLICT",
                LifecycleError::Extraction(failure) => failure.kind(),
                LifecycleError::Filesystem(_) => "FILESYSTEM_ERROR",
                LifecycleError::Storage(_) => "DATABASE_ERROR",
                LifecycleError::Reconciliation { .. } => "RECONCILIATION_ERROR",
            },
        }
    }

    /// User-facing summary for the top-level `message`
    fn summary(&self) -> String {
        match self {
            ApiError::Lifecycle(LifecycleError::Extraction(failure)) => match failure {
                ExtractionFailure::Parse { .. } => {
                    "Failed to parse data extracted by AI.".to_string()
                }
                ExtractionFailure::RateLimited(_) => {
                    "AI processing failed due to rate limiting or quota issues.".to_string()
                }
                ExtractionFailure::SafetyBlocked { .. } => {
                    "AI processing blocked due to safety settings.".to_string()
                }
                ExtractionFailure::Adapter(_) => "Error processing file with AI.".to_string(),
            },
            ApiError::Lifecycle(LifecycleError::Storage(_)) => "Database error.".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }

        let mut body = json!({
            "message": self.summary(),
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });

        if let ApiError::Lifecycle(LifecycleError::Extraction(failure)) = &self {
            let extra = extraction_details(failure);
            if let (Value::Object(body), Value::Object(extra)) = (&mut body, extra) {
                body.extend(extra);
            }
        }

        (status, Json(body)).into_response()
    }
}

fn extraction_details(failure: &ExtractionFailure) -> Value {
    match failure {
        ExtractionFailure::Parse { reason, raw_text } => json!({
            "errorDetail": reason,
            "rawResponse": raw_text,
        }),
        ExtractionFailure::SafetyBlocked { feedback } => json!({
            "errorDetail": failure.to_string(),
            "promptFeedback": feedback,
        }),
        ExtractionFailure::RateLimited(detail) | ExtractionFailure::Adapter(detail) => json!({
            "errorDetail": detail,
        }),
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
