use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    #[error("{0} is required")]
    MissingField(&'static str),
}

/// Process-lifetime key/value scratchpad. Cloning shares the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, MemoryEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite `key`, stored exactly as given. A later save
    /// never gets an earlier timestamp than the entry it replaces.
    pub fn save(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<MemoryEntry, MemoryError> {
        let key = key.into();
        let value = value.into();
        if key.is_empty() {
            return Err(MemoryError::MissingField("memory_key"));
        }
        if value.is_empty() {
            return Err(MemoryError::MissingField("memory_value"));
        }

        let mut entries = self.entries.write();
        let mut updated_at = Utc::now();
        if let Some(previous) = entries.get(&key) {
            updated_at = updated_at.max(previous.updated_at);
        }

        let entry = MemoryEntry {
            key: key.clone(),
            value,
            updated_at,
        };
        entries.insert(key, entry.clone());
        tracing::debug!(key = %entry.key, "memory saved");
        Ok(entry)
    }

    pub fn get(&self, key: &str) -> Option<MemoryEntry> {
        self.entries.read().get(key).cloned()
    }

    /// All entries, sorted by key.
    pub fn list(&self) -> Vec<MemoryEntry> {
        let mut entries: Vec<MemoryEntry> = self.entries.read().values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_get_returns_value() {
        let store = MemoryStore::new();
        store.save("lastRepo", "octocat/hello-world").unwrap();
        let entry = store.get("lastRepo").unwrap();
        assert_eq!(entry.value, "octocat/hello-world");
    }

    #[test]
    fn overwrite_keeps_timestamps_monotonic() {
        let store = MemoryStore::new();
        let first = store.save("k", "one").unwrap();
        let second = store.save("k", "two").unwrap();
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(store.get("k").unwrap().value, "two");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unknown_key_is_none() {
        let store = MemoryStore::new();
        assert!(store.get("nope").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn blank_fields_are_rejected() {
        let store = MemoryStore::new();
        assert_eq!(
            store.save("", "v"),
            Err(MemoryError::MissingField("memory_key"))
        );
        assert_eq!(
            store.save("k", ""),
            Err(MemoryError::MissingField("memory_value"))
        );
        assert!(store.is_empty());
    }

    #[test]
    fn keys_and_values_are_stored_verbatim() {
        let store = MemoryStore::new();
        store.save(" lastRepo ", " ").unwrap();
        assert_eq!(store.get(" lastRepo ").unwrap().value, " ");
        assert!(store.get("lastRepo").is_none());
    }

    #[test]
    fn list_counts_distinct_keys_in_order() {
        let store = MemoryStore::new();
        store.save("b", "2").unwrap();
        store.save("a", "1").unwrap();
        store.save("b", "3").unwrap();
        let keys: Vec<String> = store.list().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn clones_share_entries() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.save("k", "v").unwrap();
        assert_eq!(other.get("k").unwrap().value, "v");
    }
}
