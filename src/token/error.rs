use thiserror::Error;

/// Why a token was rejected or could not be minted.
///
/// Callers on the session path collapse every variant into "no session"; the
/// distinction only exists for diagnostics.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("identity is missing required field: {0}")]
    IncompleteIdentity(&'static str),
    #[error("failed to sign token")]
    Encode(#[source] jsonwebtoken::errors::Error),
}

impl TokenError {
    #[must_use]
    pub const fn is_expired(&self) -> bool {
        matches!(self, Self::Expired)
    }
}
