//! Backend Module
//!
//! Server-side code for the collaboration engine: the per-document session
//! core, the persistence contract, and the axum server that exposes them.
//!
//! # Architecture
//!
//! - **`collab`** - Session actor, participant connections, session registry
//! - **`store`** - `DocumentStore` trait with in-memory and PostgreSQL backends
//! - **`server`** - Application state, configuration, initialization
//! - **`routes`** - WebSocket and document lifecycle routes
//! - **`middleware`** - Bearer-token authentication for HTTP routes
//! - **`auth`** - JWT verification
//! - **`error`** - HTTP-facing error type
//!
//! ```text
//! backend/
//! ├── collab/      - Session, Connection, SessionRegistry
//! ├── store/       - DocumentStore + memory/postgres
//! ├── server/      - AppState, ServerConfig, create_app
//! ├── routes/      - /ws, /api/documents, /health
//! ├── middleware/  - auth_middleware, AuthUser
//! ├── auth/        - Claims, JwtKeys, verify_token
//! └── error/       - BackendError
//! ```
//!
//! `collab` and `store` are always compiled; everything that pulls in axum,
//! sqlx or jsonwebtoken sits behind the `server` feature.
//!
//! # Example
//!
//! ```rust,no_run
//! use pagecollab::backend::server::{create_app, config::ServerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::from_env()?;
//! let (app, state) = create_app(&config).await?;
//! let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
//! axum::serve(listener, app).await?;
//! state.registry.shutdown().await;
//! # Ok(())
//! # }
//! ```

/// Real-time collaboration core
pub mod collab;

/// Persistence service contract and implementations
pub mod store;

/// Server setup and configuration
#[cfg(feature = "server")]
pub mod server;

/// Route configuration
#[cfg(feature = "server")]
pub mod routes;

/// Backend error types
#[cfg(feature = "server")]
pub mod error;

/// JWT verification
#[cfg(feature = "server")]
pub mod auth;

/// Middleware for request processing
#[cfg(feature = "server")]
pub mod middleware;

pub use collab::{Connection, Session, SessionError, SessionRegistry};
pub use store::{DocumentStore, MemoryDocumentStore, StoreError};
#[cfg(feature = "server")]
pub use error::BackendError;
#[cfg(feature = "server")]
pub use server::create_app;
