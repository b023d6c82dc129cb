use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::storage::{LocalStore, StorageError};

pub const HISTORY_KEY: &str = "generatedImageHistory";
pub const MAX_HISTORY_RECORDS: usize = 100;
/// Records kept when a write is rejected for capacity.
pub const OVERFLOW_RETAIN: usize = 10;

const ALLOWED_SCHEMES: &[&str] = &["https", "http", "data", "blob"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageSource {
    Url { url: String },
    Inline { b64_json: String },
}

impl ImageSource {
    /// Something an `<img>`-like consumer can load directly.
    pub fn display_url(&self) -> String {
        match self {
            ImageSource::Url { url } => url.clone(),
            ImageSource::Inline { b64_json } => format!("data:image/png;base64,{b64_json}"),
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, ImageSource::Inline { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub source: ImageSource,
    pub prompt: String,
    pub created_at_ms: i64,
}

/// One gallery entry, newest first, with the actions it supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryCard {
    pub index: usize,
    pub prompt: String,
    /// Sanitized display source; empty when the stored source was rejected.
    pub source_url: String,
    pub download_name: String,
    pub can_reedit: bool,
    pub created_at_ms: i64,
}

/// Returns the URL unchanged when its scheme is one the gallery will load.
pub fn sanitize_url(raw: &str) -> Option<String> {
    match Url::parse(raw) {
        Ok(parsed) if ALLOWED_SCHEMES.contains(&parsed.scheme()) => Some(raw.to_string()),
        Ok(_) => None,
        Err(_) if raw.starts_with("data:image/") => Some(raw.to_string()),
        Err(_) => None,
    }
}

#[derive(Debug, Clone)]
pub struct ImageHistory {
    store: LocalStore,
    records: Vec<ImageRecord>,
}

impl ImageHistory {
    pub fn load(store: LocalStore) -> Self {
        let records = store
            .load_json::<Vec<Value>>(HISTORY_KEY)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|item| serde_json::from_value::<ImageRecord>(item).ok())
            .collect::<Vec<ImageRecord>>();
        debug!(len = records.len(), "image history loaded");
        Self { store, records }
    }

    /// Oldest first, as stored.
    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Appends a batch and persists. On a capacity rejection the list is cut
    /// down to the newest [`OVERFLOW_RETAIN`] records and written once more.
    pub fn append(&mut self, batch: Vec<ImageRecord>) -> Result<(), StorageError> {
        self.records.extend(batch);
        if self.records.len() > MAX_HISTORY_RECORDS {
            let excess = self.records.len() - MAX_HISTORY_RECORDS;
            self.records.drain(..excess);
        }

        match self.store.save_json(HISTORY_KEY, &self.records) {
            Err(StorageError::QuotaExceeded { needed, limit, .. }) => {
                warn!(
                    needed,
                    limit,
                    kept = OVERFLOW_RETAIN,
                    "history exceeds storage quota; dropping oldest records"
                );
                self.truncate_to_newest(OVERFLOW_RETAIN);
                self.store.save_json(HISTORY_KEY, &self.records)
            }
            other => other,
        }
    }

    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.records.clear();
        self.store.remove(HISTORY_KEY)
    }

    /// Newest record first; `index` matches [`GalleryCard::index`].
    pub fn newest_first(&self, index: usize) -> Option<&ImageRecord> {
        self.records.iter().rev().nth(index)
    }

    pub fn gallery(&self) -> Vec<GalleryCard> {
        self.records
            .iter()
            .rev()
            .enumerate()
            .map(|(index, record)| {
                let source_url = sanitize_url(&record.source.display_url()).unwrap_or_default();
                GalleryCard {
                    index,
                    prompt: record.prompt.clone(),
                    can_reedit: !source_url.is_empty(),
                    source_url,
                    download_name: format!("generated-image-{}-{index}.png", record.created_at_ms),
                    created_at_ms: record.created_at_ms,
                }
            })
            .collect()
    }

    fn truncate_to_newest(&mut self, keep: usize) {
        if self.records.len() > keep {
            let excess = self.records.len() - keep;
            self.records.drain(..excess);
        }
    }
}
