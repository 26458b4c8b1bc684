use super::ClientError;
use std::time::Duration;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_TOKEN_KEY: &str = "@auth_token";
const DEFAULT_AUTH_PATH: &str = "/api/auth";
const DEFAULT_INSTANCES_PATH: &str = "/api/instances";
const ANDROID_EMULATOR_HOST: &str = "10.0.2.2";

/// How the credential travels with each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// HTTP-only cookie set by the server; the client never sees the token.
    Cookie,
    /// `Authorization: Bearer` read from token storage.
    Bearer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Web,
    Ios,
    /// Loopback on the host is reachable as `10.0.2.2` from the emulator.
    AndroidEmulator,
}

/// Client settings resolved once at startup.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    base_url: Url,
    auth_mode: AuthMode,
    timeout: Duration,
    token_key: String,
    auth_path: String,
    instances_path: String,
}

impl ClientConfig {
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if `base_url` is not an absolute URL.
    pub fn new(base_url: &str, auth_mode: AuthMode) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url)
            .map_err(|err| ClientError::Config(format!("invalid base URL {base_url}: {err}")))?;
        Ok(Self {
            base_url,
            auth_mode,
            timeout: DEFAULT_TIMEOUT,
            token_key: DEFAULT_TOKEN_KEY.to_string(),
            auth_path: DEFAULT_AUTH_PATH.to_string(),
            instances_path: DEFAULT_INSTANCES_PATH.to_string(),
        })
    }

    /// Like [`ClientConfig::new`], with per-platform base URL overrides applied.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if the URL is invalid or cannot be rewritten.
    pub fn for_platform(
        base_url: &str,
        auth_mode: AuthMode,
        platform: Platform,
    ) -> Result<Self, ClientError> {
        let mut config = Self::new(base_url, auth_mode)?;
        if platform == Platform::AndroidEmulator {
            let is_loopback = matches!(config.base_url.host_str(), Some("localhost" | "127.0.0.1"));
            if is_loopback {
                config
                    .base_url
                    .set_host(Some(ANDROID_EMULATOR_HOST))
                    .map_err(|err| ClientError::Config(err.to_string()))?;
            }
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_token_key(mut self, key: impl Into<String>) -> Self {
        self.token_key = key.into();
        self
    }

    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.auth_path = path.into();
        self
    }

    #[must_use]
    pub fn with_instances_path(mut self, path: impl Into<String>) -> Self {
        self.instances_path = path.into();
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub const fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn token_key(&self) -> &str {
        &self.token_key
    }

    #[must_use]
    pub fn auth_path(&self) -> &str {
        &self.auth_path
    }

    #[must_use]
    pub fn instances_path(&self) -> &str {
        &self.instances_path
    }

    /// Absolute URL for `path` below the base URL, keeping any base path prefix.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if the result is not a valid URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Url::parse(&format!("{base}/{path}"))
            .map_err(|err| ClientError::Config(format!("invalid endpoint {path}: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() -> Result<(), ClientError> {
        let config = ClientConfig::new("http://localhost:4100", AuthMode::Cookie)?;
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.token_key(), "@auth_token");
        assert_eq!(config.auth_mode(), AuthMode::Cookie);
        assert_eq!(
            config.endpoint("/api/auth/login")?.as_str(),
            "http://localhost:4100/api/auth/login"
        );
        Ok(())
    }

    #[test]
    fn endpoint_keeps_base_path() -> Result<(), ClientError> {
        let config = ClientConfig::new("https://events.example.com/legacy/", AuthMode::Bearer)?;
        assert_eq!(
            config.endpoint("api/instances")?.as_str(),
            "https://events.example.com/legacy/api/instances"
        );
        Ok(())
    }

    #[test]
    fn android_emulator_rewrites_loopback() -> Result<(), ClientError> {
        for base in ["http://localhost:4100", "http://127.0.0.1:4100"] {
            let config = ClientConfig::for_platform(base, AuthMode::Bearer, Platform::AndroidEmulator)?;
            assert_eq!(config.base_url().as_str(), "http://10.0.2.2:4100/");
        }

        let config = ClientConfig::for_platform(
            "https://api.large-event.com",
            AuthMode::Bearer,
            Platform::AndroidEmulator,
        )?;
        assert_eq!(config.base_url().host_str(), Some("api.large-event.com"));

        let config =
            ClientConfig::for_platform("http://localhost:4100", AuthMode::Bearer, Platform::Ios)?;
        assert_eq!(config.base_url().host_str(), Some("localhost"));
        Ok(())
    }

    #[test]
    fn invalid_base_url_is_a_config_error() {
        let result = ClientConfig::new("not a url", AuthMode::Cookie);
        assert!(matches!(result, Err(ClientError::Config(_))));
    }
}
