//! Raw entry store
//!
//! One durable record per sequence at `cache:seq:<seq>`. This is the
//! canonical source for entry payloads; channel blocks only record
//! presence.

use std::sync::Arc;

use futures::future::try_join_all;
use seqcache_core::keys::entry_key;
use seqcache_core::{CasOutcome, KvStore, LogEntry, StorageError};
use tracing::{debug, instrument};

use crate::codec::{decode, encode};

/// Sequence-keyed store of full log entries
#[derive(Clone)]
pub struct EntryCache {
    store: Arc<dyn KvStore>,
}

impl EntryCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Write an entry keyed by its sequence
    ///
    /// Writing the same entry twice succeeds. Writing different content at
    /// an existing sequence fails with [`StorageError::Conflict`], since
    /// sequences are immutable once assigned.
    #[instrument(skip(self, entry), fields(seq = entry.sequence))]
    pub async fn put(&self, entry: &LogEntry) -> Result<(), StorageError> {
        let key = entry_key(entry.sequence);
        let value = encode(entry)?;

        match self.store.compare_and_swap(&key, value, None).await? {
            CasOutcome::Stored(_) => {
                debug!("Stored entry");
                Ok(())
            }
            CasOutcome::Conflict => match self.get(entry.sequence).await? {
                Some(existing) if existing == *entry => Ok(()),
                _ => Err(StorageError::Conflict(key)),
            },
        }
    }

    /// Read the entry at `seq`, or `None` if it was never written
    pub async fn get(&self, seq: u64) -> Result<Option<LogEntry>, StorageError> {
        match self.store.get(&entry_key(seq)).await? {
            Some(record) => decode(&record.value).map(Some),
            None => Ok(None),
        }
    }

    /// Read several entries, skipping sequences that are absent
    pub async fn get_many(&self, seqs: &[u64]) -> Result<Vec<LogEntry>, StorageError> {
        let entries = try_join_all(seqs.iter().map(|&seq| self.get(seq))).await?;
        Ok(entries.into_iter().flatten().collect())
    }

    /// Every present entry with a sequence in `[start, end)`, ascending
    pub async fn get_range(&self, start: u64, end: u64) -> Result<Vec<LogEntry>, StorageError> {
        let mut entries = Vec::new();
        for seq in start..end {
            if let Some(entry) = self.get(seq).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryKvStore;

    fn entry_cache() -> (EntryCache, Arc<InMemoryKvStore>) {
        let store = Arc::new(InMemoryKvStore::new());
        (EntryCache::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (cache, store) = entry_cache();
        let entry = LogEntry::new(1, "foo1", "1-a", ["ABC", "CBS"]);
        cache.put(&entry).await.unwrap();

        // Stored under the sequence key
        assert!(store.get("cache:seq:1").await.unwrap().is_some());

        let read = cache.get(1).await.unwrap().unwrap();
        assert_eq!(read.sequence, 1);
        assert_eq!(read.doc_id, "foo1");
        assert_eq!(read.rev_id, "1-a");
        assert!(cache.get(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let (cache, _store) = entry_cache();
        let entry = LogEntry::new(7, "doc", "1-a", ["ABC"]);
        cache.put(&entry).await.unwrap();
        cache.put(&entry).await.unwrap();
    }

    #[tokio::test]
    async fn test_put_rejects_different_content() {
        let (cache, _store) = entry_cache();
        cache.put(&LogEntry::new(7, "doc", "1-a", ["ABC"])).await.unwrap();

        let err = cache
            .put(&LogEntry::new(7, "other", "1-b", ["ABC"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
        assert_eq!(cache.get(7).await.unwrap().unwrap().doc_id, "doc");
    }

    #[tokio::test]
    async fn test_get_range_and_many() {
        let (cache, _store) = entry_cache();
        for seq in [3, 5, 9] {
            cache
                .put(&LogEntry::new(seq, format!("doc-{seq}"), "1-a", ["ABC"]))
                .await
                .unwrap();
        }

        let range = cache.get_range(0, 9).await.unwrap();
        assert_eq!(range.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![3, 5]);

        let many = cache.get_many(&[9, 4, 3]).await.unwrap();
        assert_eq!(many.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![9, 3]);
    }
}
