//! Token codec: signed, time-limited bearer tokens carrying an [`Identity`].
//!
//! Tokens are compact HS256 JWTs with the payload `{ user, iat, exp }` and a
//! fixed lifetime (24h by default). Possession of a valid token is
//! authentication as the embedded identity, so token material is never logged.
//!
//! [`TokenCodec::verify`] is the only authentication decision. [`decode_unsafe`]
//! and [`decode_unexpired`] read the payload without the secret and exist for
//! client-side expiry pre-checks.

mod codec;
mod error;

pub use codec::{check_expiry, decode_unexpired, decode_unsafe, TokenCodec};
pub use error::TokenError;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Default token lifetime: 24 hours.
pub const DEFAULT_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;

/// The authenticated user as carried inside a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub is_system_admin: bool,
}

/// Decoded token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user: Identity,
    pub iat: i64,
    pub exp: i64,
}

/// Seconds since the Unix epoch, saturating on clock errors.
pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| i64::try_from(duration.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// Milliseconds since the Unix epoch, used for event timestamps.
pub(crate) fn unix_now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
