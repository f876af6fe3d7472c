//! Authentication test helpers

#[cfg(feature = "server")]
use pagecollab::backend::auth::{create_token, JwtKeys};

pub const TEST_SECRET: &[u8] = b"integration-test-secret";

#[cfg(feature = "server")]
pub fn test_keys() -> JwtKeys {
    JwtKeys::from_secret(TEST_SECRET)
}

/// Generate a one-hour test JWT for `user_id`
#[cfg(feature = "server")]
pub fn generate_test_token(user_id: &str, name: Option<&str>) -> String {
    create_token(&test_keys(), user_id, name, std::time::Duration::from_secs(3600))
        .expect("Failed to generate test token")
}

/// Create authorization header value
pub fn auth_header(token: &str) -> String {
    format!("Bearer {}", token)
}
