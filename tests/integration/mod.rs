//! Integration tests across the collaboration core
//!
//! These drive sessions, connections and the registry together through
//! their public APIs, with the in-memory store standing in for PostgreSQL.

pub mod connection_test;
pub mod registry_test;
pub mod session_test;

#[cfg(feature = "server")]
pub mod api;
