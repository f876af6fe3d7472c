//! Persistence Service Contract
//!
//! The collaboration core never talks to a database directly. Everything it
//! needs from durable storage goes through the `DocumentStore` trait:
//!
//! - `load_state` - last saved snapshot and version, or `NotFound`
//! - `exists` - cheap existence check
//! - `save_state` - conditional write, accepted only if the stored version
//!   still equals `expected_old`
//!
//! The remaining methods back the document lifecycle routes (create, read,
//! delete) and are never called from inside a session.
//!
//! # Implementations
//!
//! - **`memory`** - `MemoryDocumentStore`, used by tests and by the server
//!   when no `DATABASE_URL` is configured
//! - **`postgres`** - `PgDocumentStore` backed by `sqlx` (server feature)

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::shared::document::{DocumentId, Version};

/// In-memory document store
pub mod memory;

/// PostgreSQL document store
#[cfg(feature = "server")]
pub mod postgres;

pub use memory::MemoryDocumentStore;
#[cfg(feature = "server")]
pub use postgres::PgDocumentStore;

/// Snapshot/version pair as last persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredState {
    pub snapshot: Bytes,
    pub version: Version,
}

/// Full durable record of a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRecord {
    pub document_id: DocumentId,
    pub snapshot: Bytes,
    pub version: Version,
    pub creator_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a document record
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub document_id: DocumentId,
    pub snapshot: Bytes,
    pub version: Version,
    pub creator_id: String,
}

/// Persistence failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record exists for the document
    #[error("document not found")]
    NotFound,

    /// A record with this id already exists
    #[error("document already exists")]
    AlreadyExists,

    /// The stored version differs from the expected old version
    #[error("optimistic lock failed: stored version does not match the expected version")]
    VersionMismatch,

    /// Stored data could not be interpreted
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Backend-specific failure
    #[error("store backend error: {0}")]
    Backend(String),

    #[cfg(feature = "server")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence service consumed by sessions and the registry
pub trait DocumentStore: Send + Sync + 'static {
    /// Last saved snapshot and version; `StoreError::NotFound` if absent
    fn load_state<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, Result<StoredState, StoreError>>;

    fn exists<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>>;

    /// Persist `snapshot` as `new_version`, only if the stored version is `expected_old`
    ///
    /// Returns `StoreError::VersionMismatch` when another writer got there
    /// first (or the record disappeared).
    fn save_state<'a>(
        &'a self,
        document_id: &'a str,
        snapshot: Bytes,
        expected_old: Version,
        new_version: Version,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Insert a new record; `StoreError::AlreadyExists` on duplicate id
    fn create(&self, document: NewDocument) -> BoxFuture<'_, Result<DocumentRecord, StoreError>>;

    fn get<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, Result<Option<DocumentRecord>, StoreError>>;

    /// Remove a record; returns whether one existed
    fn delete<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>>;
}
