//! Error types for the Berth control plane

use api_models::requests::ErrorResponse;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Main error type for the control plane
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Limit reached: {0}")]
    LimitReached(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{service} error: {message}")]
    Backend { service: String, message: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Shutdown error: {0}")]
    Shutdown(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlatformError {
    pub fn backend(service: impl Into<String>, message: impl Into<String>) -> Self {
        PlatformError::Backend {
            service: service.into(),
            message: message.into(),
        }
    }

    /// A referenced record is absent: fatal, never retried
    pub fn is_precondition(&self) -> bool {
        matches!(self, PlatformError::NotFound(_))
    }

    /// The backend-provided reason without the wrapper prefix
    pub fn reason(&self) -> String {
        match self {
            PlatformError::Backend { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            PlatformError::NotFound(_) => "not_found",
            PlatformError::Validation(_) => "validation",
            PlatformError::InvalidTransition(_) => "invalid_transition",
            PlatformError::LimitReached(_) => "limit_reached",
            PlatformError::Conflict(_) => "conflict",
            PlatformError::Unauthorized(_) => "unauthorized",
            PlatformError::Forbidden(_) => "forbidden",
            PlatformError::Backend { .. } | PlatformError::Http(_) => "backend",
            PlatformError::Timeout(_) => "timeout",
            _ => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PlatformError::NotFound(_) => StatusCode::NOT_FOUND,
            PlatformError::Validation(_) | PlatformError::Json(_) => StatusCode::BAD_REQUEST,
            PlatformError::InvalidTransition(_) | PlatformError::Conflict(_) => {
                StatusCode::CONFLICT
            }
            PlatformError::LimitReached(_) | PlatformError::Forbidden(_) => StatusCode::FORBIDDEN,
            PlatformError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            PlatformError::Backend { .. } | PlatformError::Http(_) => StatusCode::BAD_GATEWAY,
            PlatformError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for PlatformError {
    fn from(err: anyhow::Error) -> Self {
        PlatformError::Internal(err.to_string())
    }
}

impl IntoResponse for PlatformError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
