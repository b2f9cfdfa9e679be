//! Identity extraction. Authentication itself is out of scope (distilled-spec
//! §1): the core treats the user id as an opaque string handed to it by the
//! transport layer, so this extractor's only job is reading `X-User-ID`.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use scheduler_core::UserId;

use crate::error::ApiError;

pub const USER_HEADER: &str = "X-User-ID";

/// Extracts the caller's tenant id from the `X-User-ID` header.
pub struct AuthUser(pub UserId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| AuthUser(v.to_string()))
            .ok_or(ApiError::MissingUser)
    }
}
