use serde_json::Value;
use tracing::{debug, warn};

use crate::storage::LocalStore;

pub const QUEUE_KEY: &str = "imagePromptQueue";
pub const MAX_QUEUE_LEN: usize = 50;

/// Bounded FIFO of pending prompts, persisted after every change.
///
/// Persistence failures are logged and otherwise ignored: the in-memory
/// queue stays authoritative for the running process.
#[derive(Debug, Clone)]
pub struct PromptQueue {
    store: LocalStore,
    entries: Vec<String>,
    capacity: usize,
}

impl PromptQueue {
    pub fn load(store: LocalStore) -> Self {
        Self::load_with_capacity(store, MAX_QUEUE_LEN)
    }

    pub fn load_with_capacity(store: LocalStore, capacity: usize) -> Self {
        let entries = store
            .load_json::<Vec<Value>>(QUEUE_KEY)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|value| value.as_str().map(str::trim).map(str::to_string))
            .filter(|prompt| !prompt.is_empty())
            .take(capacity)
            .collect::<Vec<String>>();
        debug!(len = entries.len(), "prompt queue loaded");
        Self {
            store,
            entries,
            capacity,
        }
    }

    /// Adds a trimmed prompt. Returns `false` for blank prompts and when the
    /// queue is full, leaving the queue unchanged.
    pub fn enqueue(&mut self, prompt: &str) -> bool {
        let trimmed = prompt.trim();
        if trimmed.is_empty() || self.entries.len() >= self.capacity {
            return false;
        }
        self.entries.push(trimmed.to_string());
        self.persist();
        true
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.entries.clone()
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn remove_at(&mut self, index: usize) -> Option<String> {
        if index >= self.entries.len() {
            return None;
        }
        let removed = self.entries.remove(index);
        self.persist();
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.persist();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    fn persist(&self) {
        if let Err(err) = self.store.save_json(QUEUE_KEY, &self.entries) {
            warn!(error = %err, "failed to persist prompt queue");
        }
    }
}
