/**
 * Backend Error Types
 *
 * Errors returned by HTTP handlers. Each variant maps to a status code and,
 * where one applies, to a wire `ErrorCode` so HTTP clients see the same
 * codes as WebSocket clients.
 *
 * # Status Mapping
 *
 * - Unknown documents: 404
 * - Duplicate creation: 409
 * - Session mid-shutdown: 503 (`SESSION_CLOSING`, retry)
 * - Bad or missing credentials: 401
 * - Everything else from the engine: 500
 */
use axum::http::StatusCode;
use thiserror::Error;

use crate::backend::collab::RegistryError;
use crate::backend::store::StoreError;
use crate::shared::message::ErrorCode;
use crate::shared::SharedError;

/// Backend-specific error types
///
/// # Usage
///
/// ```rust
/// use pagecollab::backend::error::BackendError;
/// use axum::http::StatusCode;
///
/// let err = BackendError::handler(StatusCode::BAD_REQUEST, "schema must be an object");
/// assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
/// ```
#[derive(Debug, Error)]
pub enum BackendError {
    /// Handler error (e.g., invalid request body)
    #[error("Handler error: {message}")]
    HandlerError {
        /// HTTP status code for this error
        status: StatusCode,
        /// Human-readable error message
        message: String,
    },

    /// Authentication failed
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// Session lookup or creation failed
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Persistence failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Shared error (from shared module)
    #[error(transparent)]
    SharedError(#[from] SharedError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl BackendError {
    /// Create a new handler error with a status code
    pub fn handler(status: StatusCode, message: impl Into<String>) -> Self {
        Self::HandlerError {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::handler(StatusCode::NOT_FOUND, message)
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::HandlerError { status, .. } => *status,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Registry(err) => match err {
                RegistryError::DocumentNotFound(_) => StatusCode::NOT_FOUND,
                RegistryError::Closing(_) => StatusCode::SERVICE_UNAVAILABLE,
                RegistryError::Session(session) if session.error_code() == ErrorCode::SessionClosing => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                RegistryError::Load(_) | RegistryError::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Store(err) => match err {
                StoreError::NotFound => StatusCode::NOT_FOUND,
                StoreError::AlreadyExists => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::SharedError(err) => match err {
                SharedError::SerializationError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                SharedError::ValidationError { .. } | SharedError::PayloadError { .. } => StatusCode::BAD_REQUEST,
            },
            Self::SerializationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Wire error code matching this failure, if there is one
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Unauthorized { .. } => Some(ErrorCode::Unauthorized),
            Self::Registry(err) => Some(err.error_code()),
            Self::Store(StoreError::NotFound) => Some(ErrorCode::SessionNotFound),
            _ => None,
        }
    }

    /// Get the error message
    pub fn message(&self) -> String {
        match self {
            Self::HandlerError { message, .. } => message.clone(),
            Self::Unauthorized { message } => message.clone(),
            Self::Registry(err) => err.to_string(),
            Self::Store(err) => err.to_string(),
            Self::SharedError(err) => err.to_string(),
            Self::SerializationError(err) => err.to_string(),
        }
    }
}
