//! Device secure storage: a JSON map in an owner-only file.
//!
//! Every write rewrites the map into `<path>.tmp` and renames it into place. An
//! unreadable or corrupt file reads as empty and is replaced on the next write.

use super::{StorageAdapter, StorageError};
use async_trait::async_trait;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::Mutex;
use tracing::warn;

type Entries = BTreeMap<String, String>;

#[derive(Clone, Debug)]
pub struct FileStorage {
    path: PathBuf,
    // serializes read-modify-write cycles from this process
    lock: Arc<Mutex<()>>,
}

impl FileStorage {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Entries, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Entries::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn load_or_empty(&self) -> Entries {
        self.load().await.unwrap_or_else(|err| {
            warn!("Discarding unreadable storage file {}: {err}", self.path.display());
            Entries::new()
        })
    }

    async fn persist(&self, entries: &Entries) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, serde_json::to_vec(entries)?).await?;
        restrict_permissions(&tmp).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn update(&self, apply: impl FnOnce(&mut Entries) + Send) {
        let _guard = self.lock.lock().await;
        let mut entries = self.load_or_empty().await;
        apply(&mut entries);
        if let Err(err) = self.persist(&entries).await {
            warn!("Failed to write storage file {}: {err}", self.path.display());
        }
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}

#[async_trait]
impl StorageAdapter for FileStorage {
    async fn get(&self, key: &str) -> Option<String> {
        let _guard = self.lock.lock().await;
        self.load_or_empty().await.remove(key)
    }

    async fn set(&self, key: &str, value: &str) {
        let (key, value) = (key.to_string(), value.to_string());
        self.update(move |entries| {
            entries.insert(key, value);
        })
        .await;
    }

    async fn remove(&self, key: &str) {
        self.update(|entries| {
            entries.remove(key);
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn values_survive_a_new_handle() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("secure").join("auth.json");

        let storage = FileStorage::new(&path);
        storage.set("mobile-auth-token", "abc").await;
        storage.set("mobile-auth-source", "main").await;

        let reopened = FileStorage::new(&path);
        assert_eq!(reopened.get("mobile-auth-token").await.as_deref(), Some("abc"));

        reopened.remove("mobile-auth-token").await;
        assert_eq!(storage.get("mobile-auth-token").await, None);
        assert_eq!(storage.get("mobile-auth-source").await.as_deref(), Some("main"));
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_empty_and_heals() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("auth.json");
        std::fs::write(&path, b"{not json")?;

        let storage = FileStorage::new(&path);
        assert_eq!(storage.get("k").await, None);

        storage.set("k", "v").await;
        assert_eq!(storage.get("k").await.as_deref(), Some("v"));
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_is_owner_only() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("auth.json");
        FileStorage::new(&path).set("k", "v").await;

        let mode = std::fs::metadata(&path)?.permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        Ok(())
    }
}
