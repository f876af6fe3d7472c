//! Middleware Module
//!
//! HTTP middleware for the document routes.
//!
//! - **`auth`** - Bearer-token authentication for `/api` routes
//!
//! # Example
//!
//! ```rust,no_run
//! use axum::{middleware, routing::get, Router};
//! use pagecollab::backend::middleware::auth_middleware;
//! use pagecollab::backend::server::state::AppState;
//!
//! fn protect(state: AppState) -> Router<AppState> {
//!     Router::new()
//!         .route("/api/ping", get(|| async { "pong" }))
//!         .route_layer(middleware::from_fn_with_state(state, auth_middleware))
//! }
//! ```

pub mod auth;

pub use auth::{auth_middleware, bearer_token, AuthUser, AuthenticatedUser};
