//! Logout propagation across contexts of one origin.
//!
//! Two transports run side by side:
//!
//! - a named broadcast channel from a [`BroadcastHub`], delivered to every
//!   other notifier on the same channel name;
//! - for logout only, a JSON [`AuthEvent`] written to a shared
//!   [`LocalStorage`] key and removed again shortly after. Other contexts react
//!   to the change notification, never to the stored value.
//!
//! Either transport may deliver the same event, in any order. Events are
//! de-duplicated by `(source, timestamp, type)` before reaching the handler.

use crate::{
    storage::{LocalStorage, StorageAdapter, StorageSubscription},
    token::unix_now_millis,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, warn};
use ulid::Ulid;

pub const DEFAULT_CHANNEL_NAME: &str = "large-event-auth";
pub const DEFAULT_STORAGE_KEY: &str = "large-event-logout-event";
const DEFAULT_CLEAR_DELAY: Duration = Duration::from_millis(100);
const CHANNEL_CAPACITY: usize = 32;
const DEDUP_WINDOW: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthEventKind {
    Logout,
    Login,
}

/// Wire payload of both transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEvent {
    #[serde(rename = "type")]
    pub kind: AuthEventKind,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone)]
struct Envelope {
    sender: Ulid,
    event: AuthEvent,
}

/// Named broadcast channels shared by the contexts of one origin.
#[derive(Clone, Default)]
pub struct BroadcastHub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<Envelope>>>>,
}

impl fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastHub").finish_non_exhaustive()
    }
}

impl BroadcastHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, name: &str) -> broadcast::Sender<Envelope> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

/// Receives events from other contexts. Must tolerate duplicate calls.
#[async_trait]
pub trait LogoutHandler: Send + Sync {
    async fn on_logout(&self, event: &AuthEvent);

    async fn on_login(&self, _event: &AuthEvent) {}
}

#[derive(Debug, Clone)]
pub struct CrossTabConfig {
    pub channel_name: String,
    pub storage_key: String,
    /// How long the fallback entry stays in storage.
    pub clear_delay: Duration,
}

impl Default for CrossTabConfig {
    fn default() -> Self {
        Self {
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            clear_delay: DEFAULT_CLEAR_DELAY,
        }
    }
}

pub struct CrossTabNotifier {
    id: Ulid,
    config: CrossTabConfig,
    channel: Mutex<Option<broadcast::Sender<Envelope>>>,
    storage: Option<LocalStorage>,
    listener: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl fmt::Debug for CrossTabNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrossTabNotifier")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CrossTabNotifier {
    /// Subscribe to both transports and start delivering to `handler`.
    ///
    /// Must be called from within a tokio runtime. Either transport may be
    /// absent; the other still works.
    #[must_use]
    pub fn new(
        hub: Option<&BroadcastHub>,
        storage: Option<LocalStorage>,
        config: CrossTabConfig,
        handler: Arc<dyn LogoutHandler>,
    ) -> Self {
        let id = Ulid::new();
        let channel = hub.map(|hub| hub.channel(&config.channel_name));
        let channel_rx = channel.as_ref().map(broadcast::Sender::subscribe);
        let storage_rx = storage.as_ref().map(LocalStorage::subscribe);

        let listener = tokio::spawn(listen(
            id,
            channel_rx,
            storage_rx,
            config.storage_key.clone(),
            handler,
        ));

        Self {
            id,
            config,
            channel: Mutex::new(channel),
            storage,
            listener: Mutex::new(Some(listener)),
            closed: AtomicBool::new(false),
        }
    }

    /// Identifier carried as `source` in events from this notifier.
    #[must_use]
    pub fn id(&self) -> Ulid {
        self.id
    }

    /// Announce `kind` to every other context. A no-op after [`Self::cleanup`].
    pub async fn broadcast(&self, kind: AuthEventKind) {
        if self.closed.load(Ordering::SeqCst) {
            debug!("Cross-tab notifier closed, dropping {kind:?} event");
            return;
        }

        let event = AuthEvent {
            kind,
            timestamp: unix_now_millis(),
            source: Some(self.id.to_string()),
        };

        let channel = self
            .channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(channel) = channel {
            // no other listeners is not an error
            let _ = channel.send(Envelope {
                sender: self.id,
                event: event.clone(),
            });
        }

        if kind == AuthEventKind::Logout {
            self.write_fallback(&event).await;
        }
    }

    async fn write_fallback(&self, event: &AuthEvent) {
        let Some(storage) = &self.storage else {
            return;
        };
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("Failed to encode cross-tab event: {err}");
                return;
            }
        };

        let key = self.config.storage_key.clone();
        storage.set(&key, &payload).await;

        let storage = storage.clone();
        let delay = self.config.clear_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            storage.remove(&key).await;
        });
    }

    /// Stop listening and close the channel. Safe to call repeatedly.
    pub fn cleanup(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(listener) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }
        self.channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl Drop for CrossTabNotifier {
    fn drop(&mut self) {
        self.cleanup();
    }
}

enum Incoming {
    Channel(Option<AuthEvent>),
    Storage(Option<AuthEvent>),
}

async fn listen(
    id: Ulid,
    mut channel_rx: Option<broadcast::Receiver<Envelope>>,
    mut storage_rx: Option<StorageSubscription>,
    storage_key: String,
    handler: Arc<dyn LogoutHandler>,
) {
    let mut seen: VecDeque<(Option<String>, i64, AuthEventKind)> =
        VecDeque::with_capacity(DEDUP_WINDOW);

    loop {
        let incoming = tokio::select! {
            event = next_envelope(&mut channel_rx, id), if channel_rx.is_some() => Incoming::Channel(event),
            event = next_change(&mut storage_rx, &storage_key), if storage_rx.is_some() => Incoming::Storage(event),
            else => break,
        };

        let event = match incoming {
            Incoming::Channel(Some(event)) | Incoming::Storage(Some(event)) => event,
            Incoming::Channel(None) => {
                channel_rx = None;
                continue;
            }
            Incoming::Storage(None) => {
                storage_rx = None;
                continue;
            }
        };

        let fingerprint = (event.source.clone(), event.timestamp, event.kind);
        if seen.contains(&fingerprint) {
            continue;
        }
        if seen.len() == DEDUP_WINDOW {
            seen.pop_front();
        }
        seen.push_back(fingerprint);

        debug!(kind = ?event.kind, "Received cross-tab event");
        match event.kind {
            AuthEventKind::Logout => handler.on_logout(&event).await,
            AuthEventKind::Login => handler.on_login(&event).await,
        }
    }
}

async fn next_envelope(
    rx: &mut Option<broadcast::Receiver<Envelope>>,
    own: Ulid,
) -> Option<AuthEvent> {
    let rx = rx.as_mut()?;
    loop {
        match rx.recv().await {
            Ok(envelope) if envelope.sender != own => return Some(envelope.event),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Cross-tab channel lagged, skipped {skipped} events");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

async fn next_change(rx: &mut Option<StorageSubscription>, key: &str) -> Option<AuthEvent> {
    let rx = rx.as_mut()?;
    loop {
        let change = rx.recv().await?;
        if change.key != key {
            continue;
        }
        // removal of the entry is the self-cleaning step, not an event
        let Some(payload) = change.new_value else {
            continue;
        };
        match serde_json::from_str(&payload) {
            Ok(event) => return Some(event),
            Err(err) => warn!("Ignoring malformed cross-tab payload: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    #[derive(Default)]
    struct Counter {
        logouts: AtomicUsize,
        logins: AtomicUsize,
    }

    #[async_trait]
    impl LogoutHandler for Counter {
        async fn on_logout(&self, _event: &AuthEvent) {
            self.logouts.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_login(&self, _event: &AuthEvent) {
            self.logins.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn settle() -> impl std::future::Future<Output = ()> {
        sleep(Duration::from_millis(250))
    }

    #[test]
    fn event_wire_format() -> anyhow::Result<()> {
        let event = AuthEvent {
            kind: AuthEventKind::Logout,
            timestamp: 1_700_000_000_000,
            source: None,
        };
        assert_eq!(
            serde_json::to_string(&event)?,
            r#"{"type":"logout","timestamp":1700000000000}"#
        );
        let parsed: AuthEvent =
            serde_json::from_str(r#"{"type":"login","timestamp":5,"source":"tab"}"#)?;
        assert_eq!(parsed.kind, AuthEventKind::Login);
        assert_eq!(parsed.source.as_deref(), Some("tab"));
        Ok(())
    }

    #[tokio::test]
    async fn logout_reaches_other_context_exactly_once() {
        let hub = BroadcastHub::new();
        let origin = LocalStorage::new();
        let a_counter = Arc::new(Counter::default());
        let b_counter = Arc::new(Counter::default());

        let a = CrossTabNotifier::new(
            Some(&hub),
            Some(origin.clone()),
            CrossTabConfig::default(),
            a_counter.clone(),
        );
        let _b = CrossTabNotifier::new(
            Some(&hub),
            Some(origin.attach()),
            CrossTabConfig::default(),
            b_counter.clone(),
        );

        a.broadcast(AuthEventKind::Logout).await;
        settle().await;

        assert_eq!(b_counter.logouts.load(Ordering::SeqCst), 1);
        assert_eq!(a_counter.logouts.load(Ordering::SeqCst), 0);
        // fallback entry cleaned up
        assert_eq!(origin.get(DEFAULT_STORAGE_KEY).await, None);
    }

    #[tokio::test]
    async fn storage_fallback_alone_delivers_logout() {
        let origin = LocalStorage::new();
        let counter = Arc::new(Counter::default());

        let a = CrossTabNotifier::new(
            None,
            Some(origin.clone()),
            CrossTabConfig::default(),
            Arc::new(Counter::default()),
        );
        let _b = CrossTabNotifier::new(
            None,
            Some(origin.attach()),
            CrossTabConfig::default(),
            counter.clone(),
        );

        a.broadcast(AuthEventKind::Logout).await;
        settle().await;
        assert_eq!(counter.logouts.load(Ordering::SeqCst), 1);

        // a second logout is a distinct event
        a.broadcast(AuthEventKind::Logout).await;
        settle().await;
        assert_eq!(counter.logouts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn login_uses_channel_only() {
        let hub = BroadcastHub::new();
        let origin = LocalStorage::new();
        let counter = Arc::new(Counter::default());

        let a = CrossTabNotifier::new(
            Some(&hub),
            Some(origin.clone()),
            CrossTabConfig::default(),
            Arc::new(Counter::default()),
        );
        let _b = CrossTabNotifier::new(
            Some(&hub),
            Some(origin.attach()),
            CrossTabConfig::default(),
            counter.clone(),
        );

        let mut changes = origin.attach().subscribe();
        a.broadcast(AuthEventKind::Login).await;
        settle().await;

        assert_eq!(counter.logins.load(Ordering::SeqCst), 1);
        assert_eq!(counter.logouts.load(Ordering::SeqCst), 0);
        assert!(
            tokio::time::timeout(Duration::from_millis(20), changes.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn channels_are_scoped_by_name() {
        let hub = BroadcastHub::new();
        let counter = Arc::new(Counter::default());
        let a = CrossTabNotifier::new(
            Some(&hub),
            None,
            CrossTabConfig::default(),
            Arc::new(Counter::default()),
        );
        let _other = CrossTabNotifier::new(
            Some(&hub),
            None,
            CrossTabConfig {
                channel_name: "another-app".to_string(),
                ..CrossTabConfig::default()
            },
            counter.clone(),
        );

        a.broadcast(AuthEventKind::Logout).await;
        settle().await;
        assert_eq!(counter.logouts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cleanup_is_idempotent_and_stops_delivery() {
        let hub = BroadcastHub::new();
        let origin = LocalStorage::new();
        let counter = Arc::new(Counter::default());

        let a = CrossTabNotifier::new(
            Some(&hub),
            Some(origin.clone()),
            CrossTabConfig::default(),
            Arc::new(Counter::default()),
        );
        let b = CrossTabNotifier::new(
            Some(&hub),
            Some(origin.attach()),
            CrossTabConfig::default(),
            counter.clone(),
        );

        b.cleanup();
        b.cleanup();

        a.broadcast(AuthEventKind::Logout).await;
        settle().await;
        assert_eq!(counter.logouts.load(Ordering::SeqCst), 0);

        // closed notifiers drop outgoing events
        b.broadcast(AuthEventKind::Logout).await;
    }
}
