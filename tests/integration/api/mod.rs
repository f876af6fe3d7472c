//! HTTP route tests, driven with `tower::ServiceExt::oneshot`

pub mod routes_test;
