/**
 * JWT Tokens
 *
 * HS256 token creation and validation. Creation exists for tooling and
 * tests; the server itself only verifies tokens issued elsewhere.
 */
use std::fmt;
use std::time::Duration;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::shared::message::Participant;

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at time (Unix timestamp)
    pub iat: u64,
}

impl Claims {
    /// Participant identity for this token; the user id doubles as the name
    /// when the token carries none.
    pub fn participant(&self) -> Participant {
        let name = self
            .name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.sub.clone());
        Participant::new(self.sub.clone(), name)
    }
}

/// Signing and verification keys derived from `JWT_SECRET`
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtKeys {
    pub fn from_secret(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtKeys").finish_non_exhaustive()
    }
}

/// Create a JWT token for a user
///
/// # Arguments
/// * `keys` - Signing keys
/// * `user_id` - Value for the `sub` claim
/// * `name` - Optional display name
/// * `ttl` - Lifetime from now
pub fn create_token(
    keys: &JwtKeys,
    user_id: &str,
    name: Option<&str>,
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    let claims = Claims {
        sub: user_id.to_string(),
        name: name.map(str::to_string),
        exp: now + ttl.as_secs(),
        iat: now,
    };

    encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
}

/// Verify and decode a JWT token
///
/// Rejects bad signatures, expired tokens and tokens with an empty `sub`.
pub fn verify_token(token: &str, keys: &JwtKeys) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(token, &keys.decoding, &keys.validation)?;
    if token_data.claims.sub.trim().is_empty() {
        return Err(jsonwebtoken::errors::ErrorKind::InvalidSubject.into());
    }
    Ok(token_data.claims)
}
