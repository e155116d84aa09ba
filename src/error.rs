//! Centralized error handling module
//!
//! Provides unified error types and HTTP response mapping for the entire application.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::auth::AuthError;

/// Application-wide error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Non-2xx answer from the FHIR backend, forwarded with its status code
    #[error("FHIR request failed: {message}")]
    Upstream {
        status: u16,
        message: String,
        details: Option<Value>,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingConfiguration(name) => {
                AppError::Configuration(format!("{name} is not set"))
            }
            AuthError::TokenRejected { .. } => AppError::Authentication(err.to_string()),
            AuthError::Transport(_) | AuthError::MalformedResponse(_) => {
                AppError::Internal(err.to_string())
            }
        }
    }
}

/// Error envelope returned to the dashboard
#[derive(Serialize)]
pub struct ErrorResponse {
    /// Always `false`; lets the UI branch without inspecting the status
    pub ok: bool,
    /// Human-readable error message (safe for clients)
    pub message: String,
    /// Upstream payload, when the error came from the FHIR backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Unique correlation ID for tracing
    pub correlation_id: String,
    /// Timestamp of the error
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(message: &str, details: Option<Value>) -> Self {
        Self {
            ok: false,
            message: message.to_string(),
            details,
            correlation_id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();

        let (message, details) = match self {
            AppError::Internal(msg) => {
                // Log internal errors but return safe message to client
                error!(error = %msg, "Internal server error occurred");
                ("An internal error occurred".to_string(), None)
            }
            AppError::Upstream {
                message, details, ..
            } => (message.clone(), details.clone()),
            other => (other.to_string(), None),
        };

        let error_response = ErrorResponse::new(&message, details);

        error!(
            correlation_id = %error_response.correlation_id,
            status_code = %status.as_u16(),
            message = %error_response.message,
            "Error response generated"
        );

        HttpResponse::build(status).json(error_response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;
