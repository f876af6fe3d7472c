//! Shared Module
//!
//! This module contains types that are shared between the collaboration
//! engine and its clients. Everything here is plain data: it serializes to
//! the JSON wire format and carries no runtime behavior of its own.

/// Wire protocol envelopes and payloads
pub mod message;

/// Document identity, versions and the default page schema
pub mod document;

/// Shared error types
pub mod error;

/// Engine configuration
pub mod config;

/// Re-export commonly used types for convenience
pub use message::{Envelope, ErrorCode, MessageBody, MessageKind, Participant, SenderId};
pub use document::{DocumentId, PageSchema, Version};
pub use error::SharedError;
pub use config::{ConfigError, EngineConfig, EngineConfigBuilder};
