//! # Error Handling
//!
//! Custom error types and their HTTP mappings.
//!
//! ## Error Categories:
//! - **Internal**: server-side problems (500)
//! - **BadRequest / ValidationError**: client sent invalid data (400)
//! - **NotFound**: requested resource doesn't exist (404)
//! - **ConfigError**: configuration problems (500)
//! - **InvalidLanguage**: unsupported `speak`/`listen` locale (400, rejected
//!   before the WebSocket upgrade)
//! - **DuplicateSession**: a client id is already registered (409)
//! - **SessionLimit**: concurrent session cap reached (503)
//! - **Speech / Translation**: a cloud capability failed (502 where surfaced
//!   over HTTP; on the socket path these are logged and end the session)
//!
//! Failures on an established socket are never reported to the client beyond
//! connection closure; all visibility there is server-side logging.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// Input failed validation rules
    ValidationError(String),

    /// A `speak` or `listen` selector outside the supported language set
    InvalidLanguage(String),

    /// A session with this client id is already registered
    DuplicateSession(String),

    /// The concurrent session limit was reached
    SessionLimit(usize),

    /// The cloud recognition or synthesis service failed
    Speech(String),

    /// The hosted language-model translation pass failed
    Translation(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::InvalidLanguage(value) => {
                write!(f, "Unsupported language selector: '{}'", value)
            }
            AppError::DuplicateSession(id) => {
                write!(f, "Session '{}' is already registered", id)
            }
            AppError::SessionLimit(max) => {
                write!(f, "Maximum concurrent sessions ({}) reached", max)
            }
            AppError::Speech(msg) => write!(f, "Speech service error: {}", msg),
            AppError::Translation(msg) => write!(f, "Translation service error: {}", msg),
        }
    }
}

/// Converts errors into JSON HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "invalid_language",
///     "message": "Unsupported language selector: 'fr-FR'",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type) = match self {
            AppError::Internal(_) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
            ),
            AppError::BadRequest(_) => (actix_web::http::StatusCode::BAD_REQUEST, "bad_request"),
            AppError::NotFound(_) => (actix_web::http::StatusCode::NOT_FOUND, "not_found"),
            AppError::ConfigError(_) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
            ),
            AppError::ValidationError(_) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "validation_error",
            ),
            AppError::InvalidLanguage(_) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "invalid_language",
            ),
            AppError::DuplicateSession(_) => {
                (actix_web::http::StatusCode::CONFLICT, "duplicate_session")
            }
            AppError::SessionLimit(_) => (
                actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
                "session_limit",
            ),
            AppError::Speech(_) => (actix_web::http::StatusCode::BAD_GATEWAY, "speech_error"),
            AppError::Translation(_) => (
                actix_web::http::StatusCode::BAD_GATEWAY,
                "translation_error",
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// WebSocket failures against the cloud speech endpoints.
impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        AppError::Speech(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_language_maps_to_400() {
        let err = AppError::InvalidLanguage("xx-XX".to_string());
        let response = err.error_response();
        assert_eq!(response.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_session_limit_maps_to_503() {
        let err = AppError::SessionLimit(8);
        let response = err.error_response();
        assert_eq!(
            response.status(),
            actix_web::http::StatusCode::SERVICE_UNAVAILABLE
        );
        assert!(err.to_string().contains("8"));
    }

    #[test]
    fn test_speech_error_maps_to_502() {
        let err = AppError::Speech("recognition canceled".to_string());
        let response = err.error_response();
        assert_eq!(response.status(), actix_web::http::StatusCode::BAD_GATEWAY);
    }
}
