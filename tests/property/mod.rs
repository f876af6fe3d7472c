//! Property-based tests

pub mod message_proptest;
pub mod version_proptest;
