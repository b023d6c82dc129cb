use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Map, Value};
use tracing::debug;

use super::{stored_size, KeyValueStore, StorageError};

/// Key-value store persisted as one JSON object file.
///
/// Every read goes back to disk, so two handles on the same path observe each
/// other's writes. Values are kept as JSON strings inside the object.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    quota: Option<usize>,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            quota: None,
            lock: Mutex::new(()),
        }
    }

    pub fn with_quota(path: impl Into<PathBuf>, quota: usize) -> Self {
        Self {
            quota: Some(quota),
            ..Self::new(path)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_locked(
        &self,
        key: &str,
        update: impl FnOnce(&mut Map<String, Value>),
    ) -> Result<(), StorageError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StorageError::Io("file store lock poisoned".to_string()))?;
        let mut on_disk = read_json_object(&self.path).unwrap_or_default();
        update(&mut on_disk);

        if let Some(limit) = self.quota {
            let needed = stored_size(
                on_disk
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str().unwrap_or_default())),
            );
            if needed > limit {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    limit,
                });
            }
        }

        write_json_object(&self.path, &on_disk)
            .map_err(|err| StorageError::Io(format!("{}: {err:#}", self.path.display())))?;
        debug!(path = %self.path.display(), key, "file store flushed");
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        read_json_object(&self.path)?
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.write_locked(key, |payload| {
            payload.insert(key.to_string(), Value::String(value.to_string()));
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.write_locked(key, |payload| {
            payload.remove(key);
        })
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{FileStore, KeyValueStore};
    use crate::storage::StorageError;

    #[test]
    fn file_store_round_trips_values() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = FileStore::new(temp.path().join("storage.json"));
        store.set("key", "value")?;
        assert_eq!(store.get("key").as_deref(), Some("value"));
        store.remove("key")?;
        assert_eq!(store.get("key"), None);
        Ok(())
    }

    #[test]
    fn file_store_handles_share_writes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("storage.json");
        let store_a = FileStore::new(&path);
        let store_b = FileStore::new(&path);

        store_a.set("a", "1")?;
        store_b.set("b", "2")?;

        let reloaded = FileStore::new(path);
        assert_eq!(reloaded.get("a").as_deref(), Some("1"));
        assert_eq!(reloaded.get("b").as_deref(), Some("2"));
        Ok(())
    }

    #[test]
    fn file_store_ignores_corrupt_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("storage.json");
        std::fs::write(&path, "[1, 2, 3]")?;
        let store = FileStore::new(&path);
        assert_eq!(store.get("anything"), None);
        store.set("fresh", "yes")?;
        assert_eq!(store.get("fresh").as_deref(), Some("yes"));
        Ok(())
    }

    #[test]
    fn file_store_rejects_writes_past_quota() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("storage.json");
        let store = FileStore::with_quota(&path, 16);
        store.set("k", "small")?;

        let err = store.set("big", "this value is far too long").err();
        assert!(matches!(err, Some(StorageError::QuotaExceeded { .. })));
        assert_eq!(store.get("big"), None);
        assert_eq!(store.get("k").as_deref(), Some("small"));
        Ok(())
    }
}
