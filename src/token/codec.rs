use super::{unix_now, Identity, TokenClaims, TokenError, DEFAULT_TOKEN_TTL_SECONDS};
use base64ct::{Base64UrlUnpadded, Encoding};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Issues and verifies tokens under one shared secret.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_seconds: i64,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("secret", &"***")
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}

impl TokenCodec {
    #[must_use]
    pub fn new(secret: &SecretString) -> Self {
        Self::from_secret(secret.expose_secret().as_bytes())
    }

    #[must_use]
    pub fn from_secret(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_ttl_seconds(mut self, seconds: i64) -> Self {
        self.ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    /// Issue a token for `identity` valid from now for the configured TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity is incomplete or signing fails.
    pub fn issue(&self, identity: &Identity) -> Result<String, TokenError> {
        self.issue_at(identity, unix_now())
    }

    /// Issue a token with an explicit issue time (`exp = now + ttl`).
    ///
    /// # Errors
    ///
    /// Returns an error if the identity is incomplete or signing fails.
    pub fn issue_at(&self, identity: &Identity, now_unix_seconds: i64) -> Result<String, TokenError> {
        require_complete(identity)?;
        let claims = TokenClaims {
            user: identity.clone(),
            iat: now_unix_seconds,
            exp: now_unix_seconds.saturating_add(self.ttl_seconds),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(TokenError::Encode)
    }

    /// Verify signature and expiry against the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, carries a bad signature, or has expired.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        self.verify_at(token, unix_now())
    }

    /// Verify signature and expiry against `now_unix_seconds`.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, carries a bad signature, or
    /// `exp <= now_unix_seconds`.
    pub fn verify_at(&self, token: &str, now_unix_seconds: i64) -> Result<TokenClaims, TokenError> {
        // Expiry is checked below against the caller's clock, without leeway.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;

        let data = decode::<TokenClaims>(token, &self.decoding_key, &validation).map_err(|err| {
            match err.kind() {
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::Base64(_) => TokenError::Base64,
                _ => TokenError::TokenFormat,
            }
        })?;

        check_expiry(&data.claims, now_unix_seconds)?;
        Ok(data.claims)
    }
}

fn require_complete(identity: &Identity) -> Result<(), TokenError> {
    if identity.email.trim().is_empty() {
        return Err(TokenError::IncompleteIdentity("email"));
    }
    if identity.name.trim().is_empty() {
        return Err(TokenError::IncompleteIdentity("name"));
    }
    Ok(())
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| TokenError::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Read the payload without checking the signature.
///
/// Never an authentication decision: anyone can forge a payload.
///
/// # Errors
///
/// Returns an error if the token does not have three segments or the payload is not valid JSON.
pub fn decode_unsafe(token: &str) -> Result<TokenClaims, TokenError> {
    let mut parts = token.split('.');
    let _header_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
    let claims_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
    let _sig_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
    if parts.next().is_some() {
        return Err(TokenError::TokenFormat);
    }
    b64d_json(claims_b64)
}

/// Client-side pre-check: structural decode plus expiry, no signature.
///
/// # Errors
///
/// Returns an error if the token cannot be decoded or has expired.
pub fn decode_unexpired(token: &str, now_unix_seconds: i64) -> Result<TokenClaims, TokenError> {
    let claims = decode_unsafe(token)?;
    check_expiry(&claims, now_unix_seconds)?;
    Ok(claims)
}

/// A token is live iff `now < exp`.
///
/// # Errors
///
/// Returns [`TokenError::Expired`] once `now_unix_seconds >= exp`.
pub fn check_expiry(claims: &TokenClaims, now_unix_seconds: i64) -> Result<(), TokenError> {
    if claims.exp <= now_unix_seconds {
        return Err(TokenError::Expired);
    }
    Ok(())
}
