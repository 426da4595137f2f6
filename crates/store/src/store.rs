//! Key-value blob persistence.
//!
//! The session catalog and workspace snapshot persist through [`BlobStore`],
//! an async get/set interface over JSON values. Two backends ship here:
//! [`JsonFileStore`] keeps every key in a single JSON object on disk, and
//! [`MemoryStore`] keeps them in memory.

use async_trait::async_trait;
use collections::FxHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Opaque persisted value.
pub type Blob = Value;

/// Errors surfaced by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode value for key '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode value for key '{key}': {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("store backend unavailable: {0}")]
    Unavailable(String),
}

/// Async key-value blob store.
#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read the value stored under `key`, or `None` if nothing was stored yet.
    async fn get(&self, key: &str) -> Result<Option<Blob>, StoreError>;

    /// Replace the value stored under `key`.
    async fn set(&self, key: &str, value: Blob) -> Result<(), StoreError>;
}

/// Read and decode a typed value.
pub async fn load<T: DeserializeOwned>(
    store: &dyn BlobStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    let Some(blob) = store.get(key).await? else {
        return Ok(None);
    };
    serde_json::from_value(blob)
        .map(Some)
        .map_err(|source| StoreError::Decode {
            key: key.to_string(),
            source,
        })
}

/// Encode and write a typed value.
pub async fn save<T: Serialize + ?Sized>(
    store: &dyn BlobStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let blob = serde_json::to_value(value).map_err(|source| StoreError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.set(key, blob).await
}

/// Blob store backed by one JSON object file.
///
/// The file is read lazily on first access and rewritten in full on every
/// `set` (temp file + rename, so readers never observe a torn file). A file
/// that fails to parse is moved aside to `<name>.corrupt` and replaced with
/// an empty store.
pub struct JsonFileStore {
    path: PathBuf,
    entries: tokio::sync::Mutex<Option<Map<String, Value>>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: tokio::sync::Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    async fn read_entries(&self) -> Result<Map<String, Value>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        if content.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Map<String, Value>>(&content) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                let backup = self.path.with_extension("json.corrupt");
                tracing::warn!(
                    "Store file {:?} is malformed ({}), moving it to {:?}",
                    self.path,
                    e,
                    backup
                );
                tokio::fs::rename(&self.path, &backup)
                    .await
                    .map_err(|e| self.io_error(e))?;
                Ok(Map::new())
            }
        }
    }

    async fn write_entries(&self, entries: &Map<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let content = serde_json::to_vec_pretty(entries).map_err(|source| StoreError::Encode {
            key: "<store>".to_string(),
            source,
        })?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Blob>, StoreError> {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(self.read_entries().await?);
        }
        Ok(guard.as_ref().and_then(|entries| entries.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: Blob) -> Result<(), StoreError> {
        let mut guard = self.entries.lock().await;
        let mut entries = match guard.take() {
            Some(entries) => entries,
            None => self.read_entries().await?,
        };
        entries.insert(key.to_string(), value);
        let result = self.write_entries(&entries).await;
        // Keep the in-memory copy even when the write fails so reads in this
        // run still see the latest value.
        *guard = Some(entries);
        result
    }
}

/// In-memory blob store.
#[derive(Default)]
pub struct MemoryStore {
    entries: parking_lot::Mutex<FxHashMap<String, Blob>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with initial values.
    pub fn with_entries(entries: impl IntoIterator<Item = (String, Blob)>) -> Self {
        Self {
            entries: parking_lot::Mutex::new(entries.into_iter().collect()),
        }
    }

    /// Synchronous peek, for tests and diagnostics.
    pub fn snapshot(&self, key: &str) -> Option<Blob> {
        self.entries.lock().get(key).cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Blob>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Blob) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }
}
