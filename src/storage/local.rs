//! Origin-scoped persistent storage shared by every context of one origin.
//!
//! Each [`LocalStorage`] handle is one context (a tab). Writes that change a
//! value emit a [`StorageEvent`] to every *other* context, which is what the
//! cross-tab logout fallback listens for.

use super::StorageAdapter;
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{broadcast, RwLock};
use tracing::warn;
use ulid::Ulid;

const EVENT_CAPACITY: usize = 64;

/// A change made by another context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    context: Ulid,
}

#[derive(Debug)]
struct OriginArea {
    entries: RwLock<HashMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
}

#[derive(Clone, Debug)]
pub struct LocalStorage {
    area: Arc<OriginArea>,
    context: Ulid,
}

impl Default for LocalStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStorage {
    /// Create a fresh origin with one attached context.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            area: Arc::new(OriginArea {
                entries: RwLock::new(HashMap::new()),
                events,
            }),
            context: Ulid::new(),
        }
    }

    /// Attach another context to the same origin.
    #[must_use]
    pub fn attach(&self) -> Self {
        Self {
            area: Arc::clone(&self.area),
            context: Ulid::new(),
        }
    }

    /// Changes made by other contexts, from now on.
    #[must_use]
    pub fn subscribe(&self) -> StorageSubscription {
        StorageSubscription {
            rx: self.area.events.subscribe(),
            context: self.context,
        }
    }

    fn notify(&self, key: &str, old_value: Option<String>, new_value: Option<String>) {
        if old_value == new_value {
            return;
        }
        // no receivers is fine
        let _ = self.area.events.send(StorageEvent {
            key: key.to_string(),
            old_value,
            new_value,
            context: self.context,
        });
    }
}

#[async_trait]
impl StorageAdapter for LocalStorage {
    async fn get(&self, key: &str) -> Option<String> {
        self.area.entries.read().await.get(key).cloned()
    }

    async fn set(&self, key: &str, value: &str) {
        let old_value = self
            .area
            .entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        self.notify(key, old_value, Some(value.to_string()));
    }

    async fn remove(&self, key: &str) {
        let old_value = self.area.entries.write().await.remove(key);
        self.notify(key, old_value, None);
    }
}

/// Receiver of [`StorageEvent`]s from other contexts.
#[derive(Debug)]
pub struct StorageSubscription {
    rx: broadcast::Receiver<StorageEvent>,
    context: Ulid,
}

impl StorageSubscription {
    /// Next foreign change, or `None` once the origin is gone.
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.context != self.context => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Storage subscription lagged, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
