//! Stress tests for seqcache-storage
//!
//! These tests verify block storage under high write volume, many channels,
//! contended blocks, and the durable backend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use seqcache_core::{CacheConfig, KvStore, LogEntry};
use seqcache_storage::{
    ChannelBlockStore, EntryCache, InMemoryKvStore, RedbKvStore, RedbKvStoreConfig,
};
use tempfile::TempDir;

// ============================================================================
// Throughput Tests
// ============================================================================

/// Record 20,000 sequences spanning several blocks and read them back
#[tokio::test]
async fn test_record_throughput_across_blocks() {
    let store = Arc::new(InMemoryKvStore::new());
    let entries = EntryCache::new(store.clone());
    let config = CacheConfig::default().with_block_size(1_000);
    let channel = ChannelBlockStore::new("ABC", store.clone(), &config);
    let count: u64 = 20_000;

    let start = Instant::now();
    for seq in 1..=count {
        entries
            .put(&LogEntry::new(seq, format!("doc-{seq}"), "1-a", ["ABC"]))
            .await
            .expect("Failed to put entry");
        channel
            .record_sequence(seq)
            .await
            .expect("Failed to record sequence");
    }
    let duration = start.elapsed();
    println!(
        "Recorded {} sequences in {:?} ({:.2} seq/sec)",
        count,
        duration,
        count as f64 / duration.as_secs_f64()
    );

    let changes = channel.changes_since(0, None, &entries).await.unwrap();
    assert_eq!(changes.len() as u64, count);
    for (i, entry) in changes.iter().enumerate() {
        assert_eq!(entry.sequence, i as u64 + 1);
    }

    // 21 block documents (0..=20) for 1..=20,000 with size 1,000
    assert_eq!(store.keys_with_prefix("cache:block:ABC:").len(), 21);
}

/// Interleave writes across many channels
#[tokio::test]
async fn test_many_channels() {
    let store = Arc::new(InMemoryKvStore::new());
    let entries = EntryCache::new(store.clone());
    let config = CacheConfig::default();
    let channels: Vec<_> = (0..50)
        .map(|i| ChannelBlockStore::new(format!("ch-{i}"), store.clone(), &config))
        .collect();

    for seq in 1..=1_000u64 {
        let channel = &channels[(seq % 50) as usize];
        entries
            .put(&LogEntry::new(seq, format!("doc-{seq}"), "1-a", [channel.channel()]))
            .await
            .unwrap();
        channel.record_sequence(seq).await.unwrap();
    }

    for (i, channel) in channels.iter().enumerate() {
        let changes = channel.changes_since(0, None, &entries).await.unwrap();
        assert_eq!(changes.len(), 20);
        assert!(changes.iter().all(|e| e.sequence % 50 == i as u64));
        assert!(changes.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }
}

// ============================================================================
// Contention Tests
// ============================================================================

/// Many independent writers (separate node views) hammering one block
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_contended_block_keeps_every_bit() {
    let store = Arc::new(InMemoryKvStore::new());
    let config = CacheConfig::default()
        .with_max_cas_attempts(500)
        .with_cas_backoff(Duration::from_millis(1));
    let writers = 16u64;
    let per_writer = 50u64;

    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let view = ChannelBlockStore::new("ABC", store.clone(), &config);
            tokio::spawn(async move {
                for i in 0..per_writer {
                    view.record_sequence(i * writers + w).await.unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let reader = ChannelBlockStore::new("ABC", store, &config);
    let block = reader.read_block(0).await.unwrap().unwrap();
    assert_eq!(block.len(), writers * per_writer);
    for seq in 0..writers * per_writer {
        assert!(reader.has_sequence(seq).await.unwrap(), "lost sequence {seq}");
    }
}

// ============================================================================
// Durable Backend
// ============================================================================

/// Blocks and entries written to redb are readable after reopening
#[tokio::test]
async fn test_redb_backend_persists_channel_data() {
    let temp = TempDir::new().unwrap();
    let config = RedbKvStoreConfig {
        db_path: temp.path().join("cache.redb"),
    };
    let cache_config = CacheConfig::default();

    {
        let store: Arc<dyn KvStore> = Arc::new(RedbKvStore::open(config.clone()).unwrap());
        let entries = EntryCache::new(store.clone());
        let channel = ChannelBlockStore::new("ABC", store, &cache_config);
        for seq in [1, 9_999, 10_000] {
            entries
                .put(&LogEntry::new(seq, format!("doc-{seq}"), "1-a", ["ABC"]))
                .await
                .unwrap();
            channel.record_sequence(seq).await.unwrap();
        }
    }

    let store: Arc<dyn KvStore> = Arc::new(RedbKvStore::open(config).unwrap());
    let entries = EntryCache::new(store.clone());
    let channel = ChannelBlockStore::new("ABC", store, &cache_config);

    assert!(channel.has_sequence(9_999).await.unwrap());
    assert!(channel.has_sequence(10_000).await.unwrap());
    let changes = channel.changes_since(0, None, &entries).await.unwrap();
    assert_eq!(
        changes.iter().map(|e| e.sequence).collect::<Vec<_>>(),
        vec![1, 9_999, 10_000]
    );
}
