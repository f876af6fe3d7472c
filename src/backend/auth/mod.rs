//! Authentication Module
//!
//! Stateless JWT verification. The engine never stores users: a token's
//! `sub` claim is the user id and its optional `name` claim is the display
//! name shown to other participants.
//!
//! # Architecture
//!
//! - **`tokens`** - `Claims`, `JwtKeys`, token creation and verification
//!
//! # Authentication Flow
//!
//! 1. **WebSocket**: token arrives as `?token=` or `Sec-WebSocket-Protocol`,
//!    verified before the upgrade
//! 2. **HTTP**: `Authorization: Bearer <token>`, verified by
//!    `middleware::auth_middleware`
//!
//! Tokens are HS256 and must carry `exp`.

/// JWT claims, keys and verification
pub mod tokens;

pub use tokens::{create_token, verify_token, Claims, JwtKeys};
