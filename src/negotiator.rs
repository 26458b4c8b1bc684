//! Startup session resolution for one application instance.
//!
//! Sources are consulted in a fixed order and the first success wins:
//!
//! 1. `?auth=<token>` on the current location (a handoff from another origin).
//!    The parameter is stripped from the location whenever it is present; a
//!    usable token is persisted with source [`AuthSource::Local`].
//! 2. The [`TokenStore`] record, if its token has not expired. Expired or
//!    undecodable records are cleared.
//! 3. A cookie-authenticated `me` call, unless the cookie fallback is disabled.
//!
//! Nothing found is a valid outcome (`None`), not an error. After a source
//! succeeds, the instance list is fetched; a failed fetch yields an empty list.

use crate::{
    client::{AuthApi, ClientError, InstanceApi},
    instances::InstanceSummary,
    store::{AuthSource, TokenStore},
    token::{decode_unexpired, unix_now, Identity, TokenClaims, TokenCodec, TokenError},
};
use std::{fmt, sync::Arc};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

/// Query parameter carrying a handoff token.
pub const AUTH_QUERY_PARAM: &str = "auth";

/// The navigation URL of an application instance.
pub trait Location: Send + Sync {
    fn current(&self) -> Option<Url>;

    /// Replace the visible URL without navigating.
    fn replace(&self, url: Url);
}

/// In-process [`Location`]; changes can be observed through [`MemoryLocation::watch`].
#[derive(Debug)]
pub struct MemoryLocation {
    url: watch::Sender<Option<Url>>,
}

impl MemoryLocation {
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url: watch::channel(Some(url)).0,
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            url: watch::channel(None).0,
        }
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Option<Url>> {
        self.url.subscribe()
    }
}

impl Location for MemoryLocation {
    fn current(&self) -> Option<Url> {
        self.url.borrow().clone()
    }

    fn replace(&self, url: Url) {
        self.url.send_replace(Some(url));
    }
}

/// Which source produced the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedVia {
    Url,
    Storage,
    Cookie,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Resolution {
    pub user: Identity,
    /// `None` for cookie sessions, where the cookie is the credential.
    pub token: Option<String>,
    pub via: ResolvedVia,
    pub instances: Vec<InstanceSummary>,
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolution")
            .field("user", &self.user)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("via", &self.via)
            .field("instances", &self.instances.len())
            .finish()
    }
}

/// Remove the `auth` parameter, keeping every other query pair.
#[must_use]
pub fn strip_auth_param(url: &Url) -> Url {
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != AUTH_QUERY_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut stripped = url.clone();
    if retained.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(retained);
    }
    stripped
}

fn auth_param(url: &Url) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == AUTH_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
}

#[derive(Clone)]
pub struct SessionNegotiator {
    auth_api: Arc<dyn AuthApi>,
    token_store: Option<TokenStore>,
    location: Option<Arc<dyn Location>>,
    instance_api: Option<Arc<dyn InstanceApi>>,
    verifier: Option<TokenCodec>,
    cookie_fallback: bool,
}

impl fmt::Debug for SessionNegotiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionNegotiator")
            .field("token_store", &self.token_store)
            .field("location", &self.location.is_some())
            .field("instance_api", &self.instance_api.is_some())
            .field("verifier", &self.verifier.is_some())
            .field("cookie_fallback", &self.cookie_fallback)
            .finish()
    }
}

impl SessionNegotiator {
    #[must_use]
    pub fn new(auth_api: Arc<dyn AuthApi>) -> Self {
        Self {
            auth_api,
            token_store: None,
            location: None,
            instance_api: None,
            verifier: None,
            cookie_fallback: true,
        }
    }

    #[must_use]
    pub fn with_token_store(mut self, store: TokenStore) -> Self {
        self.token_store = Some(store);
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: Arc<dyn Location>) -> Self {
        self.location = Some(location);
        self
    }

    #[must_use]
    pub fn with_instance_api(mut self, api: Arc<dyn InstanceApi>) -> Self {
        self.instance_api = Some(api);
        self
    }

    /// Check signatures too, for deployments that hold the shared secret.
    #[must_use]
    pub fn with_verifier(mut self, codec: TokenCodec) -> Self {
        self.verifier = Some(codec);
        self
    }

    /// Skip the `me` call (bearer-only deployments).
    #[must_use]
    pub fn without_cookie_fallback(mut self) -> Self {
        self.cookie_fallback = false;
        self
    }

    #[must_use]
    pub fn token_store(&self) -> Option<&TokenStore> {
        self.token_store.as_ref()
    }

    /// Token validity as far as this side can tell: full verification with a
    /// verifier, otherwise structure and expiry only.
    ///
    /// # Errors
    ///
    /// Returns the reason the token is unusable.
    pub fn check_token(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let now = unix_now();
        match &self.verifier {
            Some(codec) => codec.verify_at(token, now),
            None => decode_unexpired(token, now),
        }
    }

    /// Resolve the startup session.
    pub async fn resolve(&self) -> Option<Resolution> {
        let (user, token, via) = self.resolve_identity().await?;
        let instances = match self.fetch_instances().await {
            Ok(instances) => instances,
            Err(err) => {
                warn!("Failed to fetch instances: {err}");
                Vec::new()
            }
        };
        info!(user_id = user.id, ?via, "Session resolved");
        Some(Resolution {
            user,
            token,
            via,
            instances,
        })
    }

    /// Fetch the instance list; empty when no instance API is configured.
    ///
    /// # Errors
    ///
    /// Returns the transport error of the fetch.
    pub async fn fetch_instances(&self) -> Result<Vec<InstanceSummary>, ClientError> {
        match &self.instance_api {
            Some(api) => api.fetch_instances().await,
            None => Ok(Vec::new()),
        }
    }

    async fn resolve_identity(&self) -> Option<(Identity, Option<String>, ResolvedVia)> {
        if let Some((user, token)) = self.from_url().await {
            return Some((user, Some(token), ResolvedVia::Url));
        }
        if let Some((user, token)) = self.from_store().await {
            return Some((user, Some(token), ResolvedVia::Storage));
        }
        if self.cookie_fallback {
            match self.auth_api.me().await {
                Ok(user) => return Some((user, None, ResolvedVia::Cookie)),
                Err(err) => debug!("No cookie session: {err}"),
            }
        }
        None
    }

    async fn from_url(&self) -> Option<(Identity, String)> {
        let location = self.location.as_ref()?;
        let url = location.current()?;
        let token = auth_param(&url)?;

        // never leave the token in the visible URL, usable or not
        location.replace(strip_auth_param(&url));

        match self.check_token(&token) {
            Ok(claims) => {
                if let Some(store) = &self.token_store {
                    store
                        .save_auth(&claims.user, &token, Some(AuthSource::Local))
                        .await;
                }
                Some((claims.user, token))
            }
            Err(err) => {
                warn!("Ignoring handoff token from URL: {err}");
                None
            }
        }
    }

    async fn from_store(&self) -> Option<(Identity, String)> {
        let store = self.token_store.as_ref()?;
        let record = store.get_auth().await?;
        match self.check_token(&record.token) {
            Ok(_) => Some((record.user, record.token)),
            Err(err) => {
                debug!("Clearing unusable stored token: {err}");
                store.clear_auth().await;
                None
            }
        }
    }
}
