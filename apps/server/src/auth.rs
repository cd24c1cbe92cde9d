//! Caller identity from the `Authorization: Bearer <identity>` header.
//!
//! Issuing and verifying credentials belongs to the identity provider in
//! front of this service; the bearer value is trusted as the identity.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use questsync_core::progress::Identity;

use crate::error::ApiError;

pub struct BearerIdentity(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for BearerIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer identity".to_string()))?;
        let value = header
            .to_str()
            .map_err(|_| ApiError::Unauthorized("Malformed authorization header".to_string()))?;
        let token = value
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::Unauthorized("Expected a bearer credential".to_string()))?;
        let identity = Identity::new(token).map_err(ApiError::from)?;
        Ok(Self(identity))
    }
}
