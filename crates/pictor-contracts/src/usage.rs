use tracing::debug;

use crate::storage::{LocalStore, StorageError};

pub const USAGE_KEY: &str = "imageGenerationUsage";

/// Persisted running total of images produced. Never decreases.
#[derive(Debug, Clone)]
pub struct UsageCounter {
    store: LocalStore,
    total: u64,
}

impl UsageCounter {
    /// Reads the leading integer of the stored text, so `"2.5"` reads as 2.
    /// Negative, non-numeric or absent stored values all read as zero.
    pub fn load(store: LocalStore) -> Self {
        let total = store
            .get_raw(USAGE_KEY)
            .and_then(|raw| leading_integer(&raw))
            .and_then(|value| u64::try_from(value).ok())
            .unwrap_or(0);
        debug!(total, "usage counter loaded");
        Self { store, total }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Raises the total and persists it. The in-memory total is kept even
    /// when the write is rejected.
    pub fn add(&mut self, count: u64) -> Result<u64, StorageError> {
        self.total = self.total.saturating_add(count);
        self.store.save_json(USAGE_KEY, &self.total)?;
        debug!(added = count, total = self.total, "usage counter saved");
        Ok(self.total)
    }
}

fn leading_integer(raw: &str) -> Option<i64> {
    let trimmed = raw.trim_start();
    let (negative, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let value = rest[..end].parse::<i64>().ok()?;
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::{UsageCounter, USAGE_KEY};
    use crate::storage::{LocalStore, MemoryStore};

    #[test]
    fn add_accumulates_and_persists() -> anyhow::Result<()> {
        let store = LocalStore::new(MemoryStore::new());
        let mut usage = UsageCounter::load(store.clone());
        assert_eq!(usage.total(), 0);
        usage.add(2)?;
        usage.add(0)?;
        assert_eq!(usage.add(3)?, 5);

        assert_eq!(UsageCounter::load(store.clone()).total(), 5);
        assert_eq!(store.get_raw(USAGE_KEY).as_deref(), Some("5"));
        Ok(())
    }

    #[test]
    fn invalid_stored_values_read_as_zero() -> anyhow::Result<()> {
        let store = LocalStore::new(MemoryStore::new());
        for raw in ["-4", "lots", "", "[1]", "-"] {
            store.set_raw(USAGE_KEY, raw)?;
            assert_eq!(UsageCounter::load(store.clone()).total(), 0, "{raw:?}");
        }
        store.set_raw(USAGE_KEY, "17")?;
        assert_eq!(UsageCounter::load(store).total(), 17);
        Ok(())
    }

    #[test]
    fn leading_digits_are_kept() -> anyhow::Result<()> {
        let store = LocalStore::new(MemoryStore::new());
        for (raw, expected) in [("2.5", 2), ("17abc", 17), (" 8", 8), ("+3", 3)] {
            store.set_raw(USAGE_KEY, raw)?;
            assert_eq!(UsageCounter::load(store.clone()).total(), expected, "{raw:?}");
        }
        Ok(())
    }

    #[test]
    fn rejected_write_keeps_in_memory_total() {
        let store = LocalStore::new(MemoryStore::with_quota(4));
        let mut usage = UsageCounter::load(store);
        assert!(usage.add(3).is_err());
        assert_eq!(usage.total(), 3);
    }
}
