//! In-memory key-value store
//!
//! Suitable for tests, single-process deployments, and for simulating
//! several nodes that share one store.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use seqcache_core::{CasOutcome, KvStore, StorageError, Versioned};
use tracing::trace;

/// In-memory implementation of [`KvStore`]
///
/// Uses `DashMap` so that CAS on one key only locks that key's shard.
#[derive(Debug)]
pub struct InMemoryKvStore {
    /// Map from key to (value, version)
    records: DashMap<String, (Bytes, u64)>,
    /// Source of fresh versions; shared by all keys so versions never repeat
    next_cas: AtomicU64,
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryKvStore {
    /// Create a new, empty store
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_cas: AtomicU64::new(1),
        }
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Keys starting with `prefix`, sorted
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .records
            .iter()
            .filter(|r| r.key().starts_with(prefix))
            .map(|r| r.key().clone())
            .collect();
        keys.sort();
        keys
    }

    fn fresh_cas(&self) -> u64 {
        self.next_cas.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StorageError> {
        Ok(self.records.get(key).map(|r| {
            let (value, cas) = r.value();
            Versioned {
                value: value.clone(),
                cas: *cas,
            }
        }))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        value: Bytes,
        expected: Option<u64>,
    ) -> Result<CasOutcome, StorageError> {
        let outcome = match (self.records.entry(key.to_string()), expected) {
            (Entry::Vacant(slot), None) => {
                let cas = self.fresh_cas();
                slot.insert((value, cas));
                CasOutcome::Stored(cas)
            }
            (Entry::Occupied(mut slot), Some(expected)) if slot.get().1 == expected => {
                let cas = self.fresh_cas();
                slot.insert((value, cas));
                CasOutcome::Stored(cas)
            }
            _ => CasOutcome::Conflict,
        };

        trace!(key, ?expected, ?outcome, "compare_and_swap");
        Ok(outcome)
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.records.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_only_write() {
        let store = InMemoryKvStore::new();

        let first = store
            .compare_and_swap("k", Bytes::from_static(b"a"), None)
            .await
            .unwrap();
        assert!(first.is_stored());

        // A second create-only write must not clobber the first
        let second = store
            .compare_and_swap("k", Bytes::from_static(b"b"), None)
            .await
            .unwrap();
        assert_eq!(second, CasOutcome::Conflict);
        assert_eq!(store.get("k").await.unwrap().unwrap().value, "a");
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = InMemoryKvStore::new();
        let CasOutcome::Stored(v1) = store
            .compare_and_swap("k", Bytes::from_static(b"a"), None)
            .await
            .unwrap()
        else {
            panic!("create should land");
        };

        let CasOutcome::Stored(v2) = store
            .compare_and_swap("k", Bytes::from_static(b"b"), Some(v1))
            .await
            .unwrap()
        else {
            panic!("update at current version should land");
        };
        assert_ne!(v1, v2);

        let stale = store
            .compare_and_swap("k", Bytes::from_static(b"c"), Some(v1))
            .await
            .unwrap();
        assert_eq!(stale, CasOutcome::Conflict);

        let current = store.get("k").await.unwrap().unwrap();
        assert_eq!(current.value, "b");
        assert_eq!(current.cas, v2);
    }

    #[tokio::test]
    async fn test_update_of_missing_key_conflicts() {
        let store = InMemoryKvStore::new();
        let outcome = store
            .compare_and_swap("missing", Bytes::from_static(b"x"), Some(1))
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Conflict);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_remove_and_prefix_scan() {
        let store = InMemoryKvStore::new();
        for key in ["cache:seq:2", "cache:seq:1", "cache:block:ABC:0"] {
            store
                .compare_and_swap(key, Bytes::from_static(b"v"), None)
                .await
                .unwrap();
        }

        assert_eq!(
            store.keys_with_prefix("cache:seq:"),
            vec!["cache:seq:1".to_string(), "cache:seq:2".to_string()]
        );
        assert!(store.remove("cache:seq:1").await.unwrap());
        assert!(!store.remove("cache:seq:1").await.unwrap());
        assert!(!store.contains("cache:seq:1").await.unwrap());
        assert_eq!(store.len(), 2);
    }
}
