/**
 * Authentication Middleware
 *
 * Extracts and verifies the JWT from the `Authorization` header and makes
 * the caller's identity available to handlers through `AuthUser`.
 */
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::backend::auth::verify_token;
use crate::backend::error::BackendError;
use crate::backend::server::state::AppState;

/// Authenticated user data extracted from JWT token
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub name: Option<String>,
}

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Authentication middleware
///
/// Returns 401 Unauthorized if the token is missing or invalid; otherwise
/// attaches an `AuthenticatedUser` to the request extensions.
pub async fn auth_middleware(
    State(app_state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, BackendError> {
    let token = bearer_token(request.headers()).ok_or_else(|| {
        tracing::warn!("[Auth] Missing or malformed Authorization header");
        BackendError::unauthorized("missing bearer token")
    })?;

    let claims = verify_token(token, &app_state.jwt).map_err(|e| {
        tracing::warn!("[Auth] Invalid token: {}", e);
        BackendError::unauthorized("invalid token")
    })?;

    request.extensions_mut().insert(AuthenticatedUser {
        user_id: claims.sub,
        name: claims.name,
    });

    Ok(next.run(request).await)
}

/// Axum extractor for the user set by `auth_middleware`
#[derive(Clone, Debug)]
pub struct AuthUser(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = BackendError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .map(AuthUser)
            .ok_or_else(|| {
                tracing::warn!("[Auth] AuthenticatedUser not found in request extensions");
                BackendError::unauthorized("not authenticated")
            })
    }
}
