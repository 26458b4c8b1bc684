//! Issuance configuration and the shared signing state.

use crate::token::{TokenCodec, DEFAULT_TOKEN_TTL_SECONDS};
use secrecy::SecretString;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    token_ttl_seconds: i64,
    cookie_enabled: bool,
    cookie_secure: bool,
    cookie_domain: Option<String>,
    allowed_origins: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            cookie_enabled: true,
            cookie_secure: false,
            cookie_domain: None,
            allowed_origins: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.token_ttl_seconds = seconds;
        self
    }

    /// Set the `auth-token` cookie on login. Bearer-only deployments turn it off.
    #[must_use]
    pub fn with_cookie_enabled(mut self, enabled: bool) -> Self {
        self.cookie_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn with_cookie_domain(mut self, domain: Option<String>) -> Self {
        self.cookie_domain = domain.filter(|domain| !domain.trim().is_empty());
        self
    }

    /// Origins allowed to call with credentials, e.g. the team portals.
    #[must_use]
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    #[must_use]
    pub fn token_ttl_seconds(&self) -> i64 {
        self.token_ttl_seconds
    }

    #[must_use]
    pub fn cookie_enabled(&self) -> bool {
        self.cookie_enabled
    }

    #[must_use]
    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed_origins
    }

    pub(super) fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }

    pub(super) fn cookie_domain(&self) -> Option<&str> {
        self.cookie_domain.as_deref()
    }
}

/// Shared by every auth handler through an `Extension`.
#[derive(Debug)]
pub struct AuthState {
    config: AuthConfig,
    codec: TokenCodec,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig, secret: &SecretString) -> Self {
        let codec = TokenCodec::new(secret).with_ttl_seconds(config.token_ttl_seconds());
        Self { config, codec }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }
}
