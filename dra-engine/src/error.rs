//! Error types for dra-engine
//!
//! [`AnalysisError`] is the pipeline taxonomy; it is `Clone` because every
//! caller attached to one in-flight run receives the same failure.
//! [`ApiError`] renders errors as HTTP responses.

use axum::{
    extract::rejection::JsonRejection,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failure of one analysis request
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnalysisError {
    /// Malformed domain; never retried
    #[error("Invalid domain: {0}")]
    InvalidInput(String),

    /// Archive kept failing after the retry budget was spent
    #[error("Snapshot source unavailable: {0}")]
    SourceUnavailable(String),

    /// Whole fetch exceeded the analysis timeout
    #[error("Analysis timed out after {0} ms")]
    Timeout(u64),

    /// No concurrency slot within the admission timeout
    #[error("Analysis capacity exhausted; retry after {retry_after_secs}s")]
    Overloaded { retry_after_secs: u64 },

    /// Report could not be persisted; nothing was committed
    #[error("Report store failure: {0}")]
    StoreFailure(String),

    /// Shutdown or caller cancellation
    #[error("Analysis cancelled")]
    Cancelled,
}

impl AnalysisError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::InvalidInput(_) => "INVALID_DOMAIN",
            AnalysisError::SourceUnavailable(_) => "SOURCE_UNAVAILABLE",
            AnalysisError::Timeout(_) => "ANALYSIS_TIMEOUT",
            AnalysisError::Overloaded { .. } => "OVERLOADED",
            AnalysisError::StoreFailure(_) => "STORE_FAILURE",
            AnalysisError::Cancelled => "CANCELLED",
        }
    }

    /// Whether the caller may usefully try again later
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AnalysisError::InvalidInput(_))
    }
}

impl From<dra_common::Error> for AnalysisError {
    fn from(err: dra_common::Error) -> Self {
        match err {
            dra_common::Error::InvalidInput(msg) => AnalysisError::InvalidInput(msg),
            other => AnalysisError::StoreFailure(other.to_string()),
        }
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Missing or rejected bearer token (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Pipeline failure, mapped per kind
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// dra-common error
    #[error("Common error: {0}")]
    Common(#[from] dra_common::Error),
}

/// Unreadable JSON bodies take the same `{"error": ...}` shape as handler errors
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
            }
            ApiError::Analysis(err) => {
                let status = match err {
                    AnalysisError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                    AnalysisError::SourceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    AnalysisError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                    AnalysisError::Overloaded { .. } => StatusCode::TOO_MANY_REQUESTS,
                    AnalysisError::StoreFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    AnalysisError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, err.code(), err.to_string())
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
            ApiError::Common(dra_common::Error::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone())
            }
            ApiError::Common(dra_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone())
            }
            ApiError::Common(dra_common::Error::Auth(msg)) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
            }
            ApiError::Common(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = self.parts();
        let retryable = match &self {
            ApiError::Analysis(err) => err.is_retryable(),
            _ => status.is_server_error(),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
                "retryable": retryable,
            }
        }));

        let mut response = (status, body).into_response();
        if let ApiError::Analysis(AnalysisError::Overloaded { retry_after_secs }) = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
