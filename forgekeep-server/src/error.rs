//! # Error Handling and Response Types
//!
//! This module provides the error handling for the module registry server.
//! It defines the application error enum, a machine-readable classification,
//! and the standardized JSON error response returned by all API endpoints.
//!
//! ## Error Classifications
//!
//! Errors are classified into categories that map to HTTP status codes:
//!
//! - **Validation Errors** (400 Bad Request): bad slugs, malformed metadata,
//!   empty archive payloads
//! - **Not Found** (404 Not Found): unknown modules, releases, or files
//! - **Internal Errors** (500 Internal Server Error): I/O and other
//!   server-side faults
//! - **Upstream Errors** (502 Bad Gateway): upstream registry failures that
//!   escaped the fallback path
//!
//! ## Error Response Format
//!
//! ```json
//! {
//!   "error": "Human-readable error message",
//!   "code": "machine_readable_error_code",
//!   "details": {...},
//!   "timestamp": "2024-01-01T12:00:00Z"
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

/// Standardized error response structure for consistent API error handling
#[derive(Serialize, Debug)]
pub struct ApiErrorResponse {
    pub error: String,          // Human-readable error message
    pub code: String,           // Machine-readable error code
    pub details: Option<Value>, // Additional error details
    pub timestamp: String,      // ISO 8601 timestamp
}

/// Error code classification for machine-readable error types
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorCode {
    ValidationError, // For input validation failures
    NotFound,        // For missing resources
    InternalError,   // For server-side errors
    UpstreamError,   // For upstream registry failures
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::NotFound => "not_found",
            ErrorCode::InternalError => "internal_error",
            ErrorCode::UpstreamError => "upstream_error",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::UpstreamError => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Application-specific error types with error codes
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Upstream registry error: {0}")]
    Upstream(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    /// Get the appropriate error code for this error type
    pub fn error_code(&self) -> ErrorCode {
        match self {
            AppError::BadRequest(_) | AppError::Json(_) => ErrorCode::ValidationError,
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::Upstream(_) => ErrorCode::UpstreamError,
            AppError::InternalError(_) | AppError::Io(_) | AppError::Anyhow(_) => {
                ErrorCode::InternalError
            }
        }
    }

    /// Get additional error details if available
    pub fn details(&self) -> Option<Value> {
        match self {
            AppError::Anyhow(e) => e
                .source()
                .map(|source| json!({"source": source.to_string()})),
            _ => None,
        }
    }

    /// Create a standardized error response
    pub fn to_error_response(&self) -> ApiErrorResponse {
        let code = self.error_code();
        ApiErrorResponse {
            error: self.to_string(),
            code: code.as_str().to_string(),
            details: self.details(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the error before moving values out
        tracing::error!(error = %self, "Request failed");

        let error_response = self.to_error_response();
        let status = self.error_code().http_status();

        if matches!(self.error_code(), ErrorCode::InternalError) {
            if let AppError::Anyhow(ref e) = self {
                tracing::error!(source = ?e.source(), "Internal server error details");
            }
        }

        tracing::debug!(status = %status, code = %error_response.code, "Returning standardized error response");

        (status, axum::Json(error_response)).into_response()
    }
}

/// Convenient result type for application operations.
///
/// This type alias provides a standard Result type using [`AppError`] for all
/// application-level operations, reducing boilerplate in function signatures.
pub type AppResult<T> = Result<T, AppError>;
