//! PageCollab - Real-time Collaboration Engine
//!
//! PageCollab backs a collaborative page editor: several users edit one
//! JSON-structured page at the same time, see each other's edits in near
//! real time, and every accepted edit eventually lands in durable storage.
//!
//! # Overview
//!
//! The library is organized into two main modules:
//!
//! - **`shared`** - Types shared between the engine and its clients
//!   - Wire protocol envelopes and payloads
//!   - Document identity and the default page schema
//!   - Engine configuration and shared error types
//!
//! - **`backend`** - Server-side code
//!   - `collab` - per-document sessions, connections and the session registry
//!   - `store` - the persistence contract plus in-memory and PostgreSQL stores
//!   - Axum server wiring, routes and JWT auth (only with the `server` feature)
//!
//! # Feature Flags
//!
//! - **`server`** (default) - Axum HTTP/WebSocket server, PostgreSQL store,
//!   JWT verification and the `collab-server` binary.
//!
//! # Usage
//!
//! ```rust,no_run
//! use pagecollab::backend::collab::SessionRegistry;
//! use pagecollab::backend::store::MemoryDocumentStore;
//! use pagecollab::shared::EngineConfig;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let store = Arc::new(MemoryDocumentStore::new());
//! let registry = SessionRegistry::new(store, EngineConfig::default());
//! let session = registry.get_or_create("page-1").await;
//! # }
//! ```
//!
//! # Concurrency
//!
//! Every live document is owned by a single session event loop. All edits
//! to one document are totally ordered by that loop; nothing orders edits
//! across documents.

/// Shared types and data structures
pub mod shared;

/// Backend server-side code
pub mod backend;
