//! Durable key-value snapshots.
//!
//! Each stateful component keeps its whole state under one key and rewrites
//! it after every mutation. Backends only move opaque JSON text; typed
//! encoding lives in [`load_snapshot`] and [`save_snapshot`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

pub const OUTBOX_KEY: &str = "outbox";
pub const DEAD_LETTER_KEY: &str = "outbox_dead_letters";
pub const DEDUP_KEY: &str = "dedup";
pub const ROUND_ROBIN_KEY: &str = "round_robin";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot io failed for `{key}`: {source}")]
    Io { key: String, source: std::io::Error },
    #[error("snapshot encoding failed for `{key}`: {source}")]
    Encode { key: String, source: serde_json::Error },
    #[error("invalid snapshot key `{0}`")]
    InvalidKey(String),
    #[error("snapshot backend failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Returns `None` when nothing was ever saved under `key`.
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Replaces whatever was stored under `key`.
    async fn write(&self, key: &str, contents: String) -> Result<(), StoreError>;
}

/// Loads the snapshot under `key`, falling back when it is missing or unreadable.
pub async fn load_snapshot<T>(store: &dyn SnapshotStore, key: &str, fallback: T) -> T
where
    T: DeserializeOwned,
{
    let raw = match store.read(key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return fallback,
        Err(error) => {
            warn!(
                event_name = "store.snapshot.read_failed",
                key,
                error = %error,
                "snapshot could not be read; starting from empty state"
            );
            return fallback;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(error) => {
            warn!(
                event_name = "store.snapshot.parse_failed",
                key,
                error = %error,
                "snapshot could not be parsed; starting from empty state"
            );
            fallback
        }
    }
}

pub async fn save_snapshot<T>(store: &dyn SnapshotStore, key: &str, value: &T) -> Result<(), StoreError>
where
    T: Serialize + ?Sized,
{
    let contents = serde_json::to_string_pretty(value)
        .map_err(|source| StoreError::Encode { key: key.to_string(), source })?;
    store.write(key, contents).await
}

/// One `<key>.json` file per snapshot inside a data directory.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates the data directory when it does not exist yet.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self::new(dir);
        tokio::fs::create_dir_all(&store.dir).await.map_err(|source| StoreError::Io {
            key: store.dir.display().to_string(),
            source,
        })?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { key: key.to_string(), source }),
        }
    }

    async fn write(&self, key: &str, contents: String) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let staging = path.with_extension("json.tmp");
        let io_error = |source| StoreError::Io { key: key.to_string(), source };

        tokio::fs::write(&staging, contents.as_bytes()).await.map_err(io_error)?;
        tokio::fs::rename(&staging, &path).await.map_err(io_error)
    }
}

#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<String, String>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(key).cloned())
    }

    async fn write(&self, key: &str, contents: String) -> Result<(), StoreError> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(key.to_string(), contents);
        Ok(())
    }
}
