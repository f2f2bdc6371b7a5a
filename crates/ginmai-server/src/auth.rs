//! Caller identity.
//!
//! Phone verification happens at the identity provider; the API only sees the
//! opaque user id it issued, presented as `Authorization: Bearer <uuid>`.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use ginmai_shared::protocol::AUTH_HEADER;
use ginmai_shared::types::UserId;

use crate::error::ServerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub UserId);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(AUTH_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(ServerError::MissingIdentity)?;

        bearer_user(raw).map(AuthUser).ok_or(ServerError::MissingIdentity)
    }
}

fn bearer_user(header: &str) -> Option<UserId> {
    let token = header.trim().strip_prefix("Bearer ")?;
    token.trim().parse().ok()
}
