//! Error types for each layer, and the HTTP mapping of API failures.

use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// JSON data file failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} holds JSON that is not a record list, refusing to overwrite it")]
    NotAList { path: PathBuf },
}

/// Template workflow failures.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow file not found at: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read workflow {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid workflow document {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// Failures talking to the image backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("ComfyUI is not accessible: {0}")]
    Unavailable(String),

    #[error("Failed to upload image: {0}")]
    Upload(String),

    #[error("ComfyUI prompt submission failed: {0}")]
    Submit(String),

    #[error("Generation failed on ComfyUI: {0}")]
    GenerationFailed(String),

    #[error("Generation completed but no output image found")]
    NoOutput,

    #[error("Generation timeout after {0} attempts")]
    Timeout(u32),

    #[error("ComfyUI returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("ComfyUI request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failures of a single generation request.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Insufficient credits")]
    InsufficientCredits,

    #[error("Account blocked")]
    Blocked,

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GenerationError {
    /// Message safe to show to the end user, chosen by failure kind.
    pub fn user_message(&self) -> &'static str {
        match self {
            GenerationError::InsufficientCredits => "Insufficient credits",
            GenerationError::Blocked => "Account blocked",
            GenerationError::Workflow(WorkflowError::NotFound(_)) => {
                "Workflow configuration missing. Please check server setup."
            }
            GenerationError::Backend(BackendError::Unavailable(_)) => {
                "AI service is temporarily unavailable. Please try again in a few minutes."
            }
            GenerationError::Backend(BackendError::Timeout(_)) => {
                "Generation is taking longer than expected. Please try again."
            }
            GenerationError::Backend(BackendError::Upload(_)) => {
                "Failed to upload your image. Please try a different image or try again."
            }
            _ => "Professional headshot generation failed. Please try again.",
        }
    }
}

/// Error returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Misconfigured(&'static str),

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::Misconfigured(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg }))
            }
            ApiError::Generation(GenerationError::InsufficientCredits) => (
                StatusCode::PAYMENT_REQUIRED,
                json!({ "error": "Insufficient credits" }),
            ),
            ApiError::Generation(GenerationError::Blocked) => {
                (StatusCode::FORBIDDEN, json!({ "error": "Account blocked" }))
            }
            ApiError::Generation(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": e.user_message(),
                    "details": e.to_string(),
                    "code": "GENERATION_FAILED",
                }),
            ),
            ApiError::Internal(details) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": "Internal server error",
                    "details": details,
                    "code": "API_ERROR",
                }),
            ),
            ApiError::Store(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": "Internal server error",
                    "details": e.to_string(),
                    "code": "API_ERROR",
                }),
            ),
            ApiError::Backend(e) => (
                StatusCode::BAD_GATEWAY,
                json!({ "error": "Image backend request failed", "details": e.to_string() }),
            ),
        };

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "API error: {self}");
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_messages_follow_failure_kind() {
        let missing = GenerationError::from(WorkflowError::NotFound(PathBuf::from("wf.json")));
        assert!(missing.user_message().starts_with("Workflow configuration missing"));

        let offline = GenerationError::from(BackendError::Unavailable("offline".into()));
        assert!(offline.user_message().starts_with("AI service is temporarily unavailable"));

        let timeout = GenerationError::from(BackendError::Timeout(60));
        assert!(timeout.user_message().starts_with("Generation is taking longer"));

        let upload = GenerationError::from(BackendError::Upload("HTTP 500".into()));
        assert!(upload.user_message().starts_with("Failed to upload your image"));

        let other = GenerationError::from(BackendError::NoOutput);
        assert_eq!(
            other.user_message(),
            "Professional headshot generation failed. Please try again."
        );
    }

    #[test]
    fn status_codes_match_failure_kind() {
        let resp = ApiError::from(GenerationError::InsufficientCredits).into_response();
        assert_eq!(resp.status(), StatusCode::PAYMENT_REQUIRED);

        let resp = ApiError::from(GenerationError::Blocked).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = ApiError::from(GenerationError::from(BackendError::NoOutput)).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let resp = ApiError::Unauthorized("Unauthorized").into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
