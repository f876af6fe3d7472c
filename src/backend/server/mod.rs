//! Server Module
//!
//! Initialization and configuration of the Axum HTTP server.
//!
//! # Architecture
//!
//! - **`state`** - `AppState` and its `FromRef` implementations
//! - **`config`** - `ServerConfig` from the environment, database loading
//! - **`init`** - store selection, registry creation, router assembly
//!
//! # Module Structure
//!
//! ```text
//! server/
//! ├── mod.rs          - Module exports and documentation
//! ├── state.rs        - AppState and FromRef implementations
//! ├── config.rs       - ServerConfig, database pool loading
//! └── init.rs         - create_app
//! ```
//!
//! # Initialization Flow
//!
//! 1. **Configuration Loading**: `ServerConfig::from_env`, engine settings
//!    from the optional TOML file plus `COLLAB_*` overrides
//! 2. **Store Selection**: PostgreSQL when `DATABASE_URL` is set (a
//!    failed connection or migration aborts startup), otherwise the
//!    in-memory store
//! 3. **Registry Creation**: one `SessionRegistry` for the process
//! 4. **Router Creation**: WebSocket, document and health routes
//!
//! The caller keeps the returned `AppState` so it can run
//! `registry.shutdown()` once the listener stops.

/// Application state management
pub mod state;

/// Server configuration loading
pub mod config;

/// Server initialization
pub mod init;

pub use config::{ServerConfig, StartupError};
pub use init::create_app;
pub use state::AppState;
