//! Key/value persistence over heterogeneous backing stores.
//!
//! Every backend implements [`StorageAdapter`]: `get`, `set` and `remove` on a
//! single key, nothing else. Backend failures are logged and absorbed here, so
//! callers only ever observe "value present" or "value absent".
//!
//! | Backend | Models |
//! |---|---|
//! | [`MemoryStorage`] | per-context session storage |
//! | [`LocalStorage`] | origin-scoped persistent storage with change notifications |
//! | [`FileStorage`] | device secure storage (owner-only file) |
//! | [`CookieStorage`] | client-visible cookies in a shared jar |

use async_trait::async_trait;
use thiserror::Error;

mod cookie;
mod file;
mod local;
mod memory;

pub use cookie::CookieStorage;
pub use file::FileStorage;
pub use local::{LocalStorage, StorageEvent, StorageSubscription};
pub use memory::MemoryStorage;

/// Uniform get/set/remove over one backing medium.
///
/// Implementations touch only the named key.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: &str);

    async fn remove(&self, key: &str);
}

/// Failures inside a backend. Never crosses the [`StorageAdapter`] boundary.
#[derive(Debug, Error)]
pub(crate) enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
