use super::{AuthMode, ClientConfig, ClientError};
use crate::{
    api::types::{ErrorResponse, LoginRequest, LoginResponse, LogoutResponse, MeResponse, TokenResponse},
    instances::{InstanceListResponse, InstanceSummary},
    storage::StorageAdapter,
    store::TokenStore,
    token::Identity,
    APP_USER_AGENT,
};
use async_trait::async_trait;
use reqwest::{cookie::Jar, header::AUTHORIZATION, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt, sync::Arc};
use tracing::{debug, instrument};

const MAX_ERROR_MESSAGE_LEN: usize = 200;

/// Token issuance collaborator.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, email: &str) -> Result<LoginResponse, ClientError>;

    async fn logout(&self) -> Result<(), ClientError>;

    /// The identity behind the current credential.
    async fn me(&self) -> Result<Identity, ClientError>;

    /// A freshly minted token for handing the session to another origin.
    async fn handoff_token(&self) -> Result<String, ClientError>;
}

#[async_trait]
pub trait InstanceApi: Send + Sync {
    async fn fetch_instances(&self) -> Result<Vec<InstanceSummary>, ClientError>;
}

#[derive(Clone)]
struct BearerSource {
    storage: Arc<dyn StorageAdapter>,
    key: String,
}

/// reqwest client bound to a [`ClientConfig`].
///
/// Cookie mode keeps a cookie jar shared across clones; bearer mode reads the
/// token from storage on every request.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: Arc<ClientConfig>,
    jar: Option<Arc<Jar>>,
    bearer: Option<BearerSource>,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.config.base_url().as_str())
            .field("auth_mode", &self.config.auth_mode())
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let jar = match config.auth_mode() {
            AuthMode::Cookie => Some(Arc::new(Jar::default())),
            AuthMode::Bearer => None,
        };
        Self::build(config, jar)
    }

    /// Cookie-mode transport over an existing jar, e.g. one shared with a
    /// [`crate::storage::CookieStorage`].
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn with_cookie_jar(config: ClientConfig, jar: Arc<Jar>) -> Result<Self, ClientError> {
        Self::build(config, Some(jar))
    }

    fn build(config: ClientConfig, jar: Option<Arc<Jar>>) -> Result<Self, ClientError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(config.timeout());
        if let Some(jar) = &jar {
            builder = builder.cookie_provider(Arc::clone(jar));
        }
        let client = builder
            .build()
            .map_err(|err| ClientError::Config(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            config: Arc::new(config),
            jar,
            bearer: None,
        })
    }

    /// Read bearer tokens from `storage` under the configured token key.
    #[must_use]
    pub fn with_token_storage(mut self, storage: Arc<dyn StorageAdapter>) -> Self {
        self.bearer = Some(BearerSource {
            storage,
            key: self.config.token_key().to_string(),
        });
        self
    }

    /// Read bearer tokens from the token half of `store`'s record.
    #[must_use]
    pub fn with_token_store(mut self, store: &TokenStore) -> Self {
        self.bearer = Some(BearerSource {
            storage: store.storage(),
            key: store.token_key(),
        });
        self
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn cookie_jar(&self) -> Option<Arc<Jar>> {
        self.jar.clone()
    }

    /// # Errors
    ///
    /// Returns an error on transport failure, non-2xx status, or an unexpected body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = self.config.endpoint(path)?;
        self.send(self.client.get(url)).await
    }

    /// # Errors
    ///
    /// Returns an error on transport failure, non-2xx status, or an unexpected body.
    pub async fn post_json<B, T>(&self, path: &str, body: Option<&B>) -> Result<T, ClientError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.config.endpoint(path)?;
        let mut request = self.client.post(url);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(request).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let mut request = request;
        if self.config.auth_mode() == AuthMode::Bearer {
            if let Some(source) = &self.bearer {
                if let Some(token) = source.storage.get(&source.key).await {
                    request = request.header(AUTHORIZATION, format!("Bearer {token}"));
                }
            }
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!("Request failed with {status}");
            return Err(ClientError::Http {
                status: status.as_u16(),
                message: error_message(&body, status.canonical_reason().unwrap_or("error")),
            });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn error_message(body: &str, fallback: &str) -> String {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|err| err.error)
        .unwrap_or_else(|_| {
            if body.trim().is_empty() {
                fallback.to_string()
            } else {
                body.trim().to_string()
            }
        });
    message.chars().take(MAX_ERROR_MESSAGE_LEN).collect()
}

#[derive(Clone, Debug)]
pub struct HttpAuthApi {
    transport: HttpTransport,
}

impl HttpAuthApi {
    #[must_use]
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }

    fn path(&self, endpoint: &str) -> String {
        format!(
            "{}/{endpoint}",
            self.transport.config().auth_path().trim_end_matches('/')
        )
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    #[instrument(skip(self, email))]
    async fn login(&self, email: &str) -> Result<LoginResponse, ClientError> {
        let body = LoginRequest {
            email: Some(email.to_string()),
        };
        self.transport.post_json(&self.path("login"), Some(&body)).await
    }

    #[instrument(skip(self))]
    async fn logout(&self) -> Result<(), ClientError> {
        let _: LogoutResponse = self
            .transport
            .post_json::<(), _>(&self.path("logout"), None)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn me(&self) -> Result<Identity, ClientError> {
        let response: MeResponse = self.transport.get_json(&self.path("me")).await?;
        Ok(response.user)
    }

    #[instrument(skip(self))]
    async fn handoff_token(&self) -> Result<String, ClientError> {
        let response: TokenResponse = self.transport.get_json(&self.path("token")).await?;
        Ok(response.token)
    }
}

#[derive(Clone, Debug)]
pub struct HttpInstanceApi {
    transport: HttpTransport,
}

impl HttpInstanceApi {
    #[must_use]
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl InstanceApi for HttpInstanceApi {
    #[instrument(skip(self))]
    async fn fetch_instances(&self) -> Result<Vec<InstanceSummary>, ClientError> {
        let path = self.transport.config().instances_path().to_string();
        let response: InstanceListResponse = self.transport.get_json(&path).await?;
        Ok(response.instances)
    }
}
