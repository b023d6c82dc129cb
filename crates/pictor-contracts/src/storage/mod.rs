use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("storage quota exceeded writing '{key}' ({needed} bytes needed, {limit} allowed)")]
    QuotaExceeded {
        key: String,
        needed: usize,
        limit: usize,
    },
    #[error("storage i/o failed: {0}")]
    Io(String),
    #[error("failed to encode '{key}': {reason}")]
    Encode { key: String, reason: String },
}

/// String-keyed persistent storage with a bounded capacity.
///
/// Writes that would push the total stored size past the capacity are
/// rejected with [`StorageError::QuotaExceeded`] and leave the store unchanged.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Shared handle to one [`KeyValueStore`], with typed JSON helpers.
///
/// Every store in this crate reads through [`LocalStore::load_json`], so a
/// malformed or wrongly-shaped value always degrades to `None` instead of an
/// error.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<dyn KeyValueStore>,
}

impl LocalStore {
    pub fn new<S: KeyValueStore + 'static>(store: S) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    pub fn get_raw(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }

    pub fn set_raw(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.inner.set(key, value)
    }

    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.remove(key)
    }

    pub fn load_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.inner.get(key)?;
        match serde_json::from_str::<T>(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, error = %err, "discarding malformed stored value");
                None
            }
        }
    }

    pub fn save_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value).map_err(|err| StorageError::Encode {
            key: key.to_string(),
            reason: err.to_string(),
        })?;
        self.inner.set(key, &raw)
    }
}

impl fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStore").finish_non_exhaustive()
    }
}

/// Size accounting shared by the store implementations: keys plus values,
/// counted in characters the way browser storage quotas are.
pub(crate) fn stored_size<'a>(entries: impl Iterator<Item = (&'a str, &'a str)>) -> usize {
    entries
        .map(|(key, value)| key.chars().count() + value.chars().count())
        .sum()
}
