//! Common test utilities and helpers
//!
//! This module provides shared utilities for all tests including:
//! - Store and configuration fixtures
//! - An in-memory transport for driving `Connection`s
//! - Token helpers for the HTTP routes
//! - Custom assertion macros

pub mod assertions;
pub mod auth_helpers;
pub mod transport;

pub use auth_helpers::*;
pub use fixtures::*;
pub use transport::*;
