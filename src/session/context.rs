use super::{LogoutBehavior, Session, SessionError, SessionEvent, SessionStatus};
use crate::{
    client::{AuthApi, AuthMode, InstanceApi},
    crosstab::{AuthEvent, AuthEventKind, BroadcastHub, CrossTabConfig, CrossTabNotifier, LogoutHandler},
    negotiator::{strip_auth_param, Location, SessionNegotiator, AUTH_QUERY_PARAM},
    storage::LocalStorage,
    store::{AuthSource, TokenStore},
    token::TokenCodec,
};
use async_trait::async_trait;
use std::{
    fmt,
    sync::{Arc, Weak},
};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, instrument, warn};
use url::Url;

const EVENT_CAPACITY: usize = 16;

/// Everything a [`SessionContext`] is composed from.
pub struct SessionConfig {
    auth_api: Arc<dyn AuthApi>,
    auth_mode: AuthMode,
    token_store: Option<TokenStore>,
    instance_api: Option<Arc<dyn InstanceApi>>,
    location: Option<Arc<dyn Location>>,
    verifier: Option<TokenCodec>,
    cookie_fallback: bool,
    hub: Option<BroadcastHub>,
    logout_storage: Option<LocalStorage>,
    cross_tab: CrossTabConfig,
    logout_behavior: LogoutBehavior,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("auth_mode", &self.auth_mode)
            .field("token_store", &self.token_store)
            .field("cookie_fallback", &self.cookie_fallback)
            .field("cross_tab", &self.cross_tab)
            .field("logout_behavior", &self.logout_behavior)
            .finish_non_exhaustive()
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new(auth_api: Arc<dyn AuthApi>, auth_mode: AuthMode) -> Self {
        Self {
            auth_api,
            auth_mode,
            token_store: None,
            instance_api: None,
            location: None,
            verifier: None,
            cookie_fallback: true,
            hub: None,
            logout_storage: None,
            cross_tab: CrossTabConfig::default(),
            logout_behavior: LogoutBehavior::None,
        }
    }

    #[must_use]
    pub fn with_token_store(mut self, store: TokenStore) -> Self {
        self.token_store = Some(store);
        self
    }

    #[must_use]
    pub fn with_instance_api(mut self, api: Arc<dyn InstanceApi>) -> Self {
        self.instance_api = Some(api);
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: Arc<dyn Location>) -> Self {
        self.location = Some(location);
        self
    }

    #[must_use]
    pub fn with_verifier(mut self, codec: TokenCodec) -> Self {
        self.verifier = Some(codec);
        self
    }

    #[must_use]
    pub fn without_cookie_fallback(mut self) -> Self {
        self.cookie_fallback = false;
        self
    }

    /// Join the cross-tab channel of `hub`.
    #[must_use]
    pub fn with_broadcast_hub(mut self, hub: BroadcastHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Use `storage` for the logout fallback transport.
    #[must_use]
    pub fn with_logout_storage(mut self, storage: LocalStorage) -> Self {
        self.logout_storage = Some(storage);
        self
    }

    #[must_use]
    pub fn with_cross_tab_config(mut self, config: CrossTabConfig) -> Self {
        self.cross_tab = config;
        self
    }

    #[must_use]
    pub fn with_logout_behavior(mut self, behavior: LogoutBehavior) -> Self {
        self.logout_behavior = behavior;
        self
    }
}

struct Inner {
    auth_api: Arc<dyn AuthApi>,
    auth_mode: AuthMode,
    negotiator: SessionNegotiator,
    token_store: Option<TokenStore>,
    state: watch::Sender<Session>,
    events: broadcast::Sender<SessionEvent>,
    // one login/logout/initialize/refresh/revalidate at a time
    op_guard: Mutex<()>,
    notifier: Option<CrossTabNotifier>,
    logout_behavior: LogoutBehavior,
}

impl Inner {
    fn emit(&self, event: SessionEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    fn set(&self, session: Session) {
        self.state.send_replace(session);
    }

    fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    async fn clear_local(&self) {
        if let Some(store) = &self.token_store {
            store.clear_auth().await;
        }
        self.set(Session::unauthenticated());
    }

    fn after_logout(&self, event: SessionEvent) {
        self.emit(event);
        if self.logout_behavior == LogoutBehavior::Reload {
            self.emit(SessionEvent::ReloadRequested);
        }
    }

    // caller holds op_guard
    async fn resolve_startup(&self) -> SessionStatus {
        match self.negotiator.resolve().await {
            Some(resolution) => {
                let user = resolution.user.clone();
                self.set(Session::authenticated(
                    resolution.user,
                    resolution.token,
                    resolution.instances,
                ));
                self.emit(SessionEvent::Established(user));
                SessionStatus::Authenticated
            }
            None => {
                self.set(Session::unauthenticated());
                SessionStatus::Unauthenticated
            }
        }
    }

    async fn apply_remote_logout(&self) {
        let _guard = self.op_guard.lock().await;
        let was_authenticated = self.snapshot().is_authenticated();
        self.clear_local().await;
        info!(was_authenticated, "Logged out by another context");
        self.after_logout(SessionEvent::RemoteLogout);
    }
}

struct RemoteEvents {
    inner: Weak<Inner>,
}

#[async_trait]
impl LogoutHandler for RemoteEvents {
    async fn on_logout(&self, _event: &AuthEvent) {
        if let Some(inner) = self.inner.upgrade() {
            inner.apply_remote_logout().await;
        }
    }

    async fn on_login(&self, _event: &AuthEvent) {
        if let Some(inner) = self.inner.upgrade() {
            inner.emit(SessionEvent::RemoteLogin);
        }
    }
}

/// Composed auth state of one application instance. Clones share state.
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<Inner>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("auth_mode", &self.inner.auth_mode)
            .field("session", &self.inner.snapshot())
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    /// Build the context in the `Initializing` state and join the cross-tab
    /// channel. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingTokenStore`] in bearer mode without a token store.
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        if config.auth_mode == AuthMode::Bearer && config.token_store.is_none() {
            return Err(SessionError::MissingTokenStore);
        }

        let mut negotiator = SessionNegotiator::new(Arc::clone(&config.auth_api));
        if let Some(store) = &config.token_store {
            negotiator = negotiator.with_token_store(store.clone());
        }
        if let Some(location) = config.location {
            negotiator = negotiator.with_location(location);
        }
        if let Some(api) = config.instance_api {
            negotiator = negotiator.with_instance_api(api);
        }
        if let Some(codec) = config.verifier {
            negotiator = negotiator.with_verifier(codec);
        }
        if !config.cookie_fallback {
            negotiator = negotiator.without_cookie_fallback();
        }

        let cross_tab_enabled = config.hub.is_some() || config.logout_storage.is_some();
        let (state, _) = watch::channel(Session::initializing());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let notifier = cross_tab_enabled.then(|| {
                CrossTabNotifier::new(
                    config.hub.as_ref(),
                    config.logout_storage.clone(),
                    config.cross_tab.clone(),
                    Arc::new(RemoteEvents {
                        inner: weak.clone(),
                    }),
                )
            });
            Inner {
                auth_api: config.auth_api,
                auth_mode: config.auth_mode,
                negotiator,
                token_store: config.token_store,
                state,
                events,
                op_guard: Mutex::new(()),
                notifier,
                logout_behavior: config.logout_behavior,
            }
        });

        Ok(Self { inner })
    }

    /// [`SessionContext::new`] followed by [`SessionContext::initialize`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingTokenStore`] in bearer mode without a token store.
    pub async fn mount(config: SessionConfig) -> Result<Self, SessionError> {
        let context = Self::new(config)?;
        context.initialize().await;
        Ok(context)
    }

    /// Resolve the startup session. An already established session is kept
    /// as is; use [`SessionContext::revalidate`] to re-check it.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> SessionStatus {
        let _guard = self.inner.op_guard.lock().await;
        if self.inner.snapshot().is_authenticated() {
            debug!("Session already established, nothing to resolve");
            return SessionStatus::Authenticated;
        }
        self.inner.resolve_startup().await
    }

    /// Log in by email. Returns `false` on any failure and leaves the
    /// session unauthenticated.
    #[instrument(skip(self, email))]
    pub async fn login(&self, email: &str) -> bool {
        let _guard = self.inner.op_guard.lock().await;

        let response = match self.inner.auth_api.login(email.trim()).await {
            Ok(response) => response,
            Err(err) => {
                warn!("Login failed: {err}");
                return false;
            }
        };
        let Some(user) = response.user.filter(|_| response.success) else {
            warn!("Login failed: no user in response");
            return false;
        };
        if self.inner.auth_mode == AuthMode::Bearer && response.token.is_none() {
            warn!("Login failed: bearer mode requires a token");
            return false;
        }

        if let (Some(store), Some(token)) = (&self.inner.token_store, &response.token) {
            store.save_auth(&user, token, Some(AuthSource::Local)).await;
        }

        let instances = match self.inner.negotiator.fetch_instances().await {
            Ok(instances) => instances,
            Err(err) => {
                warn!("Failed to fetch instances after login: {err}");
                Vec::new()
            }
        };

        info!(user_id = user.id, "Logged in");
        self.inner
            .set(Session::authenticated(user.clone(), response.token, instances));
        self.inner.emit(SessionEvent::LoggedIn(user));
        if let Some(notifier) = &self.inner.notifier {
            notifier.broadcast(AuthEventKind::Login).await;
        }
        true
    }

    /// Log out everywhere. Local state is cleared even if the server call fails.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        let _guard = self.inner.op_guard.lock().await;

        if let Err(err) = self.inner.auth_api.logout().await {
            warn!("Server logout failed, clearing local session anyway: {err}");
        }
        self.inner.clear_local().await;
        if let Some(notifier) = &self.inner.notifier {
            notifier.broadcast(AuthEventKind::Logout).await;
        }

        info!("Logged out");
        self.inner.after_logout(SessionEvent::LoggedOut);
    }

    /// Re-fetch the instance list. On failure the previous list stays.
    #[instrument(skip(self))]
    pub async fn refresh_instances(&self) {
        let _guard = self.inner.op_guard.lock().await;
        if !self.inner.snapshot().is_authenticated() {
            debug!("Not authenticated, skipping instance refresh");
            return;
        }
        match self.inner.negotiator.fetch_instances().await {
            Ok(instances) => {
                self.inner.state.send_modify(|session| {
                    if session.is_authenticated() {
                        session.instances = instances;
                    }
                });
            }
            Err(err) => warn!("Failed to refresh instances, keeping previous list: {err}"),
        }
    }

    /// Re-check the session, e.g. when a mobile app returns to the foreground.
    ///
    /// A held token is checked for expiry locally; a cookie session asks the
    /// server again and only a `401` ends it. An unauthenticated context runs
    /// startup resolution again.
    #[instrument(skip(self))]
    pub async fn revalidate(&self) -> SessionStatus {
        let _guard = self.inner.op_guard.lock().await;
        let session = self.inner.snapshot();
        if !session.is_authenticated() {
            return self.inner.resolve_startup().await;
        }

        let still_valid = match &session.token {
            Some(token) => match self.inner.negotiator.check_token(token) {
                Ok(_) => true,
                Err(err) => {
                    info!("Held token no longer usable: {err}");
                    false
                }
            },
            None => match self.inner.auth_api.me().await {
                Ok(_) => true,
                Err(err) if err.is_unauthorized() => false,
                Err(err) => {
                    warn!("Could not revalidate cookie session: {err}");
                    true
                }
            },
        };

        if still_valid {
            return SessionStatus::Authenticated;
        }
        self.inner.clear_local().await;
        self.inner.after_logout(SessionEvent::LoggedOut);
        SessionStatus::Unauthenticated
    }

    /// `portal_url` with a handoff token attached as `?auth=`.
    ///
    /// Cookie sessions mint a fresh token through the issuance endpoint; bearer
    /// sessions hand over the held token.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no session, minting fails, or the URL is invalid.
    #[instrument(skip(self))]
    pub async fn portal_link(&self, portal_url: &str) -> Result<Url, SessionError> {
        let session = self.inner.snapshot();
        if !session.is_authenticated() {
            return Err(SessionError::NotAuthenticated);
        }
        let token = match (self.inner.auth_mode, session.token) {
            (AuthMode::Bearer, Some(token)) => token,
            (AuthMode::Bearer, None) => return Err(SessionError::NotAuthenticated),
            (AuthMode::Cookie, _) => self.inner.auth_api.handoff_token().await?,
        };
        Ok(handoff_url(portal_url, &token)?)
    }

    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.inner.snapshot()
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.inner.state.borrow().status
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Session> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    #[must_use]
    pub fn token_store(&self) -> Option<&TokenStore> {
        self.inner.token_store.as_ref()
    }

    /// Leave the cross-tab channel. Safe to call repeatedly.
    pub fn shutdown(&self) {
        if let Some(notifier) = &self.inner.notifier {
            notifier.cleanup();
        }
    }
}

/// Attach `token` to `portal_url` as the `auth` query parameter, replacing
/// any existing one.
///
/// # Errors
///
/// Returns an error if `portal_url` is not an absolute URL.
pub fn handoff_url(portal_url: &str, token: &str) -> Result<Url, url::ParseError> {
    let mut url = strip_auth_param(&Url::parse(portal_url)?);
    url.query_pairs_mut().append_pair(AUTH_QUERY_PARAM, token);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        negotiator::MemoryLocation,
        storage::{MemoryStorage, StorageAdapter},
        test_support::{codec, identity, instance, MockAuthApi, MockInstanceApi},
    };
    use std::{sync::atomic::Ordering, time::Duration};

    const EMAIL: &str = "user@large-event.com";

    fn bearer_config(auth_api: Arc<MockAuthApi>, storage: &MemoryStorage) -> SessionConfig {
        SessionConfig::new(auth_api, AuthMode::Bearer)
            .with_token_store(TokenStore::new(Arc::new(storage.clone()), "web-user"))
            .without_cookie_fallback()
    }

    async fn next_event(events: &mut broadcast::Receiver<SessionEvent>) -> Option<SessionEvent> {
        tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .ok()?
            .ok()
    }

    #[tokio::test]
    async fn bearer_mode_requires_store() {
        let config = SessionConfig::new(MockAuthApi::new(vec![]), AuthMode::Bearer);
        assert!(matches!(
            SessionContext::new(config),
            Err(SessionError::MissingTokenStore)
        ));
    }

    #[tokio::test]
    async fn starts_initializing_then_resolves() -> anyhow::Result<()> {
        let storage = MemoryStorage::new();
        let context = SessionContext::new(bearer_config(MockAuthApi::new(vec![]), &storage))?;
        assert!(context.snapshot().is_loading());

        assert_eq!(context.initialize().await, SessionStatus::Unauthenticated);
        assert!(!context.snapshot().is_loading());
        Ok(())
    }

    #[tokio::test]
    async fn login_logout_round_trip() -> anyhow::Result<()> {
        let user = identity(3, EMAIL);
        let auth_api = MockAuthApi::new(vec![user.clone()]);
        let instance_api = MockInstanceApi::new(vec![instance(10, "Spring Gala")]);
        let storage = MemoryStorage::new();

        let context = SessionContext::mount(
            bearer_config(auth_api.clone(), &storage).with_instance_api(instance_api),
        )
        .await?;
        let mut events = context.subscribe();
        assert_eq!(context.status(), SessionStatus::Unauthenticated);

        assert!(context.login(EMAIL).await);
        let session = context.snapshot();
        assert!(session.is_authenticated());
        assert_eq!(session.user.as_ref(), Some(&user));
        assert!(session.token.is_some());
        assert_eq!(session.instances.len(), 1);

        let store = context
            .token_store()
            .ok_or_else(|| anyhow::anyhow!("no store"))?;
        let record = store.get_auth().await.ok_or_else(|| anyhow::anyhow!("empty"))?;
        assert_eq!(Some(record.token), session.token);
        assert_eq!(store.get_source().await, Some(AuthSource::Local));
        assert_eq!(next_event(&mut events).await, Some(SessionEvent::LoggedIn(user)));

        context.logout().await;
        let session = context.snapshot();
        assert_eq!(session.status, SessionStatus::Unauthenticated);
        assert_eq!(session.user, None);
        assert_eq!(session.token, None);
        assert!(session.instances.is_empty());
        assert!(storage.is_empty().await);
        assert_eq!(next_event(&mut events).await, Some(SessionEvent::LoggedOut));
        assert_eq!(auth_api.logout_calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn failed_login_returns_false() -> anyhow::Result<()> {
        let auth_api = MockAuthApi::new(vec![identity(3, EMAIL)]);
        let storage = MemoryStorage::new();
        let context = SessionContext::mount(bearer_config(auth_api.clone(), &storage)).await?;

        assert!(!context.login("nobody@example.com").await);
        assert_eq!(context.status(), SessionStatus::Unauthenticated);

        auth_api.fail_network(true);
        assert!(!context.login(EMAIL).await);
        assert_eq!(context.status(), SessionStatus::Unauthenticated);
        assert!(storage.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn logout_clears_even_when_server_fails() -> anyhow::Result<()> {
        let auth_api = MockAuthApi::new(vec![identity(3, EMAIL)]);
        let storage = MemoryStorage::new();
        let context = SessionContext::mount(bearer_config(auth_api.clone(), &storage)).await?;
        assert!(context.login(EMAIL).await);

        auth_api.fail_network(true);
        context.logout().await;
        assert_eq!(context.status(), SessionStatus::Unauthenticated);
        assert!(storage.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn mount_restores_stored_session() -> anyhow::Result<()> {
        let user = identity(3, EMAIL);
        let storage = MemoryStorage::new();
        TokenStore::new(Arc::new(storage.clone()), "web-user")
            .save_auth(&user, &codec().issue(&user)?, None)
            .await;

        let auth_api = MockAuthApi::new(vec![]);
        let context = SessionContext::mount(bearer_config(auth_api.clone(), &storage)).await?;
        assert_eq!(context.snapshot().user, Some(user));
        assert_eq!(auth_api.me_calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn remote_logout_clears_other_context() -> anyhow::Result<()> {
        let user = identity(3, EMAIL);
        let hub = BroadcastHub::new();
        let origin = LocalStorage::new();

        let tab_a_storage = MemoryStorage::new();
        let tab_b_storage = MemoryStorage::new();
        let tab_a = SessionContext::mount(
            bearer_config(MockAuthApi::new(vec![user.clone()]), &tab_a_storage)
                .with_broadcast_hub(hub.clone())
                .with_logout_storage(origin.clone()),
        )
        .await?;
        let tab_b = SessionContext::mount(
            bearer_config(MockAuthApi::new(vec![user.clone()]), &tab_b_storage)
                .with_broadcast_hub(hub.clone())
                .with_logout_storage(origin.attach())
                .with_logout_behavior(LogoutBehavior::Reload),
        )
        .await?;
        assert!(tab_a.login(EMAIL).await);
        assert!(tab_b.login(EMAIL).await);

        let mut b_events = tab_b.subscribe();
        tab_a.logout().await;
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(tab_b.status(), SessionStatus::Unauthenticated);
        assert!(tab_b_storage.is_empty().await);

        let mut received = Vec::new();
        while let Ok(event) = b_events.try_recv() {
            if event != SessionEvent::RemoteLogin {
                received.push(event);
            }
        }
        assert_eq!(
            received,
            vec![SessionEvent::RemoteLogout, SessionEvent::ReloadRequested]
        );
        Ok(())
    }

    #[tokio::test]
    async fn refresh_keeps_previous_list_on_failure() -> anyhow::Result<()> {
        let auth_api = MockAuthApi::new(vec![identity(3, EMAIL)]);
        let instance_api = MockInstanceApi::new(vec![instance(10, "Spring Gala")]);
        let storage = MemoryStorage::new();
        let context = SessionContext::mount(
            bearer_config(auth_api, &storage).with_instance_api(instance_api.clone()),
        )
        .await?;

        // not authenticated: nothing to refresh
        context.refresh_instances().await;
        assert_eq!(instance_api.calls.load(Ordering::SeqCst), 0);

        assert!(context.login(EMAIL).await);
        instance_api.set_instances(vec![instance(10, "Spring Gala"), instance(11, "Summer Fair")]);
        context.refresh_instances().await;
        assert_eq!(context.snapshot().instances.len(), 2);

        instance_api.fail(true);
        context.refresh_instances().await;
        assert_eq!(context.snapshot().instances.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn portal_link_carries_token() -> anyhow::Result<()> {
        let auth_api = MockAuthApi::new(vec![identity(3, EMAIL)]);
        let storage = MemoryStorage::new();
        let context = SessionContext::mount(bearer_config(auth_api.clone(), &storage)).await?;

        assert!(matches!(
            context.portal_link("http://localhost:3004/").await,
            Err(SessionError::NotAuthenticated)
        ));

        assert!(context.login(EMAIL).await);
        let link = context.portal_link("http://localhost:3004/teamd?view=1").await?;
        let token = context.snapshot().token.ok_or_else(|| anyhow::anyhow!("no token"))?;
        let carried = link
            .query_pairs()
            .find(|(key, _)| key == AUTH_QUERY_PARAM)
            .map(|(_, value)| value.into_owned());
        assert_eq!(carried, Some(token));
        assert!(link.query_pairs().any(|(key, value)| key == "view" && value == "1"));
        assert_eq!(auth_api.token_calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn cookie_portal_link_mints_fresh_token() -> anyhow::Result<()> {
        let user = identity(1, "admin@example.com");
        let auth_api = MockAuthApi::new(vec![user.clone()]);
        auth_api.set_cookie_user(Some(user.clone()));

        let context =
            SessionContext::mount(SessionConfig::new(auth_api.clone(), AuthMode::Cookie)).await?;
        assert_eq!(context.snapshot().user, Some(user.clone()));
        assert_eq!(context.snapshot().token, None);

        let link = context.portal_link("http://localhost:3004/").await?;
        let token = link
            .query_pairs()
            .find(|(key, _)| key == AUTH_QUERY_PARAM)
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| anyhow::anyhow!("no auth param"))?;
        assert_eq!(codec().verify(&token)?.user, user);
        assert_eq!(auth_api.token_calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn portal_receives_handoff() -> anyhow::Result<()> {
        let user = identity(3, EMAIL);
        let token = codec().issue(&user)?;
        let link = handoff_url("http://localhost:3004/?auth=stale", &token)?;
        assert_eq!(link.query_pairs().count(), 1);

        let location = Arc::new(MemoryLocation::new(link));
        let storage = MemoryStorage::new();
        let portal = SessionContext::mount(
            SessionConfig::new(MockAuthApi::new(vec![]), AuthMode::Bearer)
                .with_token_store(TokenStore::new(Arc::new(storage.clone()), "teamd"))
                .with_location(location.clone())
                .without_cookie_fallback(),
        )
        .await?;

        assert_eq!(portal.snapshot().user, Some(user));
        assert_eq!(location.current().and_then(|url| url.query().map(str::to_string)), None);
        assert_eq!(storage.get("teamd-auth-token").await, Some(token));
        Ok(())
    }

    #[tokio::test]
    async fn revalidate_drops_expired_token() -> anyhow::Result<()> {
        let storage = MemoryStorage::new();
        let user = identity(3, EMAIL);
        let store = TokenStore::new(Arc::new(storage.clone()), "mobile");
        let context = SessionContext::mount(
            SessionConfig::new(MockAuthApi::new(vec![user.clone()]), AuthMode::Bearer)
                .with_token_store(store.clone())
                .without_cookie_fallback(),
        )
        .await?;
        assert!(context.login(EMAIL).await);
        assert_eq!(context.revalidate().await, SessionStatus::Authenticated);

        // swap in a token that is already past its lifetime
        let expired = codec().with_ttl_seconds(0).issue(&user)?;
        context.inner.state.send_modify(|session| session.token = Some(expired.clone()));
        store.save_token(&expired).await;

        assert_eq!(context.revalidate().await, SessionStatus::Unauthenticated);
        assert!(storage.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn revalidate_cookie_session_on_401() -> anyhow::Result<()> {
        let user = identity(1, "admin@example.com");
        let auth_api = MockAuthApi::new(vec![user.clone()]);
        auth_api.set_cookie_user(Some(user));
        let context =
            SessionContext::mount(SessionConfig::new(auth_api.clone(), AuthMode::Cookie)).await?;

        auth_api.fail_network(true);
        assert_eq!(context.revalidate().await, SessionStatus::Authenticated);

        auth_api.fail_network(false);
        auth_api.set_cookie_user(None);
        assert_eq!(context.revalidate().await, SessionStatus::Unauthenticated);
        Ok(())
    }

    #[tokio::test]
    async fn revalidate_queued_after_login_sees_new_token() -> anyhow::Result<()> {
        let storage = MemoryStorage::new();
        let user = identity(3, EMAIL);
        let context =
            SessionContext::mount(bearer_config(MockAuthApi::new(vec![user.clone()]), &storage))
                .await?;
        assert!(context.login(EMAIL).await);

        let expired = codec().with_ttl_seconds(0).issue(&user)?;
        context.inner.state.send_modify(|session| session.token = Some(expired.clone()));

        // queue login, then revalidate, behind a held guard
        let guard = context.inner.op_guard.lock().await;
        let (a, b) = (context.clone(), context.clone());
        let login = tokio::spawn(async move { a.login(EMAIL).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let revalidate = tokio::spawn(async move { b.revalidate().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(guard);

        assert!(login.await?);
        assert_eq!(revalidate.await?, SessionStatus::Authenticated);
        let session = context.snapshot();
        assert_eq!(session.status, SessionStatus::Authenticated);
        assert_ne!(session.token, Some(expired));
        assert!(!storage.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn initialize_keeps_established_session() -> anyhow::Result<()> {
        let user = identity(1, "admin@example.com");
        let auth_api = MockAuthApi::new(vec![user.clone()]);
        auth_api.set_cookie_user(Some(user.clone()));
        let context =
            SessionContext::mount(SessionConfig::new(auth_api.clone(), AuthMode::Cookie)).await?;
        let mut events = context.subscribe();

        auth_api.set_cookie_user(None);
        assert_eq!(context.initialize().await, SessionStatus::Authenticated);
        assert_eq!(context.snapshot().user, Some(user));
        assert!(events.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_login_and_logout_leave_consistent_state() -> anyhow::Result<()> {
        let storage = MemoryStorage::new();
        let context = SessionContext::mount(bearer_config(
            MockAuthApi::new(vec![identity(3, EMAIL)]),
            &storage,
        ))
        .await?;

        let (a, b) = (context.clone(), context.clone());
        let login = tokio::spawn(async move { a.login(EMAIL).await });
        let logout = tokio::spawn(async move { b.logout().await });
        let _ = login.await?;
        logout.await?;

        let session = context.snapshot();
        let stored = context
            .token_store()
            .ok_or_else(|| anyhow::anyhow!("no store"))?
            .get_auth()
            .await;
        match session.status {
            SessionStatus::Authenticated => {
                assert_eq!(stored.map(|record| Some(record.token)), Some(session.token));
            }
            _ => assert!(stored.is_none() && session.user.is_none()),
        }
        Ok(())
    }
}
