//! Shared Error Types
//!
//! This module defines error types that are shared between the engine and
//! anything speaking its wire protocol. They describe failures to encode,
//! decode or validate protocol data, never failures of the engine itself.
//!
//! # Error Categories
//!
//! - `SerializationError` - JSON serialization/deserialization failures
//! - `ValidationError` - A field is present but its value is unacceptable
//! - `PayloadError` - The envelope parsed but its payload does not match its kind
//!
//! # Usage
//!
//! ```rust
//! use pagecollab::shared::error::SharedError;
//!
//! let error = SharedError::validation("documentId", "must not be empty");
//! ```
use thiserror::Error;

use crate::shared::message::MessageKind;

/// Shared error types for protocol data
#[derive(Debug, Error, Clone)]
pub enum SharedError {
    /// JSON serialization or deserialization error
    #[error("Serialization error: {message}")]
    SerializationError {
        /// Human-readable error message
        message: String,
    },

    /// Data validation error
    #[error("Validation error in field '{field}': {message}")]
    ValidationError {
        /// The field that failed validation
        field: String,
        /// Human-readable error message
        message: String,
    },

    /// The payload does not have the shape its message kind requires
    #[error("Invalid {kind} payload: {message}")]
    PayloadError {
        /// Kind announced by the envelope
        kind: MessageKind,
        /// Human-readable error message
        message: String,
    },
}

impl SharedError {
    /// Create a new serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new payload error for the given kind
    pub fn payload(kind: MessageKind, message: impl Into<String>) -> Self {
        Self::PayloadError {
            kind,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for SharedError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}
