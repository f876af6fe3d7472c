//! Backend Error Module
//!
//! HTTP-facing error type for the server routes.
//!
//! # Architecture
//!
//! - **`types`** - `BackendError` and its status-code mapping
//! - **`conversion`** - axum `IntoResponse` implementation
//!
//! ```text
//! error/
//! ├── mod.rs        - Module exports and documentation
//! ├── types.rs      - Error type definitions
//! └── conversion.rs - Error conversion implementations
//! ```
//!
//! Engine errors (`RegistryError`, `StoreError`) convert into `BackendError`
//! with `?`, so handlers rarely construct one by hand.

/// Error type definitions
pub mod types;

/// Error conversion implementations
pub mod conversion;

pub use types::BackendError;
