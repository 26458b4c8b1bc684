//! Durable `(user, token)` record for one application deployment.
//!
//! Records live under `{prefix}-auth-user`, `{prefix}-auth-token` and
//! `{prefix}-auth-source`. A store only ever touches its own three keys, so
//! a shell and a portal can share one storage medium under different prefixes.
//!
//! Pair updates hold a per-store lock, and readers only report a record when
//! both halves are present, so callers never observe a user without a token.
//! No expiry checks happen here.

use crate::{storage::StorageAdapter, token::Identity};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const USER_SUFFIX: &str = "auth-user";
const TOKEN_SUFFIX: &str = "auth-token";
const SOURCE_SUFFIX: &str = "auth-source";

/// Where a stored token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthSource {
    /// Received through a handoff or direct login in this deployment.
    Local,
    /// Inherited from the main shell.
    Main,
}

impl AuthSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Main => "main",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "local" => Some(Self::Local),
            "main" => Some(Self::Main),
            _ => None,
        }
    }
}

impl fmt::Display for AuthSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct StoredAuth {
    pub user: Identity,
    pub token: String,
}

impl fmt::Debug for StoredAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredAuth")
            .field("user", &self.user)
            .field("token", &"***")
            .finish()
    }
}

#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn StorageAdapter>,
    prefix: String,
    lock: Arc<Mutex<()>>,
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl TokenStore {
    #[must_use]
    pub fn new(storage: Arc<dyn StorageAdapter>, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn storage(&self) -> Arc<dyn StorageAdapter> {
        Arc::clone(&self.storage)
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}-{suffix}", self.prefix)
    }

    /// Storage key holding the raw token.
    #[must_use]
    pub fn token_key(&self) -> String {
        self.key(TOKEN_SUFFIX)
    }

    /// Write user and token (and the source tag, when given) as one record.
    pub async fn save_auth(&self, user: &Identity, token: &str, source: Option<AuthSource>) {
        let user_json = match serde_json::to_string(user) {
            Ok(json) => json,
            Err(err) => {
                warn!("Failed to serialize user for {}: {err}", self.prefix);
                return;
            }
        };

        let _guard = self.lock.lock().await;
        self.storage.set(&self.key(USER_SUFFIX), &user_json).await;
        self.storage.set(&self.key(TOKEN_SUFFIX), token).await;
        match source {
            Some(source) => {
                self.storage
                    .set(&self.key(SOURCE_SUFFIX), source.as_str())
                    .await;
            }
            None => self.storage.remove(&self.key(SOURCE_SUFFIX)).await,
        }
        debug!(prefix = %self.prefix, ?source, "Stored auth record");
    }

    /// Both halves of the record, or `None` if either is missing or unreadable.
    pub async fn get_auth(&self) -> Option<StoredAuth> {
        let _guard = self.lock.lock().await;
        let token = self.storage.get(&self.key(TOKEN_SUFFIX)).await?;
        let user = self.read_user().await?;
        Some(StoredAuth { user, token })
    }

    pub async fn save_token(&self, token: &str) {
        let _guard = self.lock.lock().await;
        self.storage.set(&self.key(TOKEN_SUFFIX), token).await;
    }

    pub async fn get_token(&self) -> Option<String> {
        self.storage.get(&self.key(TOKEN_SUFFIX)).await
    }

    pub async fn save_user(&self, user: &Identity) {
        match serde_json::to_string(user) {
            Ok(json) => {
                let _guard = self.lock.lock().await;
                self.storage.set(&self.key(USER_SUFFIX), &json).await;
            }
            Err(err) => warn!("Failed to serialize user for {}: {err}", self.prefix),
        }
    }

    pub async fn get_user(&self) -> Option<Identity> {
        let _guard = self.lock.lock().await;
        self.read_user().await
    }

    pub async fn get_source(&self) -> Option<AuthSource> {
        let raw = self.storage.get(&self.key(SOURCE_SUFFIX)).await?;
        AuthSource::parse(&raw)
    }

    /// Remove all three keys. Clearing an empty store is a no-op.
    pub async fn clear_auth(&self) {
        let _guard = self.lock.lock().await;
        self.clear_locked().await;
    }

    async fn clear_locked(&self) {
        self.storage.remove(&self.key(USER_SUFFIX)).await;
        self.storage.remove(&self.key(TOKEN_SUFFIX)).await;
        self.storage.remove(&self.key(SOURCE_SUFFIX)).await;
    }

    // Caller holds the lock. A corrupt user entry drops the whole record.
    async fn read_user(&self) -> Option<Identity> {
        let raw = self.storage.get(&self.key(USER_SUFFIX)).await?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(err) => {
                warn!("Clearing corrupt auth record for {}: {err}", self.prefix);
                self.clear_locked().await;
                None
            }
        }
    }
}
