//! Caller identification.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sha2::{Digest, Sha256};

use super::{ApiError, AppState};

const USER_ID_HEADER: &str = "x-user-id";
const API_KEY_HEADER: &str = "x-api-key";

/// Local user on whose behalf a trade API call is made.
///
/// Authentication happens in front of this service; the gateway forwards the
/// resolved user id in `X-User-Id`.
#[derive(Debug, Clone, Copy)]
pub struct Requester(pub i64);

impl<S: Send + Sync> FromRequestParts<S> for Requester {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized("missing X-User-Id header".into()))?;

        value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(Requester)
            .ok_or_else(|| ApiError::Unauthorized("invalid X-User-Id header".into()))
    }
}

/// Marker for a request authenticated with the partner bank's shared secret.
#[derive(Debug, Clone, Copy)]
pub struct InterbankCaller;

impl FromRequestParts<AppState> for InterbankCaller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.inbound_key_digest.as_deref() else {
            return Err(ApiError::Unauthorized("interbank access is disabled".into()));
        };

        let presented = parts
            .headers
            .get(API_KEY_HEADER)
            .map(|value| Sha256::digest(value.as_bytes()))
            .ok_or_else(|| ApiError::Unauthorized("missing X-Api-Key header".into()))?;

        if presented.as_slice() != expected {
            return Err(ApiError::Unauthorized("invalid API key".into()));
        }
        Ok(InterbankCaller)
    }
}
