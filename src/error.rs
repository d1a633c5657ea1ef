//! # Error Handling
//!
//! Defines the engine's error taxonomy and how each variant maps to an HTTP
//! response when it surfaces through the control-surface handlers.
//!
//! ## Error Categories:
//! - **InvalidState**: An illegal lifecycle transition was attempted (409)
//! - **InvalidArgument**: A caller-supplied value is out of range (400)
//! - **NotFound**: The referenced job does not exist (404)
//! - **ModelNotFound**: The backing model artifact is missing, fatal for the
//!   one job that requested it but never for the cache (500)
//! - **TranscriptionFailed**: Wraps a backend failure (500)
//! - **Internal**: Everything else (500)
//!
//! Errors inside a running job never travel this path: the worker boundary
//! converts them into a `failed` job record instead.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Engine error taxonomy.
///
/// ## Usage Example:
/// ```rust
/// return Err(EngineError::InvalidArgument("concurrency must be >= 1".to_string()));
/// ```
#[derive(Debug)]
pub enum EngineError {
    /// An illegal job-lifecycle transition was attempted
    InvalidState(String),

    /// A caller-supplied argument is invalid (e.g. concurrency < 1)
    InvalidArgument(String),

    /// The referenced job record does not exist
    NotFound(String),

    /// The backing model artifact could not be located or loaded
    ModelNotFound(String),

    /// The transcription backend reported a failure
    TranscriptionFailed(String),

    /// Unexpected internal failure (store errors, IO, etc.)
    Internal(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            EngineError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            EngineError::NotFound(msg) => write!(f, "Not found: {}", msg),
            EngineError::ModelNotFound(msg) => write!(f, "Model not found: {}", msg),
            EngineError::TranscriptionFailed(msg) => write!(f, "Transcription failed: {}", msg),
            EngineError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

/// Maps each variant to an HTTP status code and a machine-readable type tag.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "invalid_state",
///     "message": "cannot cancel a completed job",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for EngineError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            EngineError::InvalidState(msg) => (
                actix_web::http::StatusCode::CONFLICT,
                "invalid_state",
                msg.clone(),
            ),
            EngineError::InvalidArgument(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "invalid_argument",
                msg.clone(),
            ),
            EngineError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
            EngineError::ModelNotFound(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "model_not_found",
                msg.clone(),
            ),
            EngineError::TranscriptionFailed(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "transcription_failed",
                msg.clone(),
            ),
            EngineError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Anything that bubbles up through anyhow is treated as an internal failure.
impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Internal(format!("JSON error: {}", err))
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Internal(format!("Configuration error: {}", err))
    }
}

/// Shorthand for results carrying an [`EngineError`].
pub type EngineResult<T> = Result<T, EngineError>;
