//! # Seqcache Storage
//!
//! Storage layer of the seqcache channel change cache.
//!
//! ## Features
//!
//! - **InMemoryKvStore**: DashMap-backed [`KvStore`] for tests and simulated clusters
//! - **RedbKvStore**: Durable [`KvStore`] backed by a redb file
//! - **EntryCache**: One record per sequence, the canonical source of payloads
//! - **ChannelBlockStore**: Per-channel presence blocks with CAS merges
//! - **SequenceClock**: Durable, monotone watermarks polled by peer nodes
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use seqcache_core::{CacheConfig, LogEntry};
//! use seqcache_storage::{ChannelBlockStore, EntryCache, InMemoryKvStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(InMemoryKvStore::new());
//!     let entries = EntryCache::new(store.clone());
//!     let abc = ChannelBlockStore::new("ABC", store, &CacheConfig::default());
//!
//!     entries.put(&LogEntry::new(1, "foo1", "1-a", ["ABC"])).await.unwrap();
//!     abc.record_sequence(1).await.unwrap();
//!
//!     let changes = abc.changes_since(0, None, &entries).await.unwrap();
//!     assert_eq!(changes.len(), 1);
//! }
//! ```

pub mod bitset;
pub mod block;
pub mod channel_store;
pub mod clock;
mod codec;
pub mod entry_cache;
pub mod memory;
pub mod persistent;

// Re-exports
pub use bitset::SequenceBitset;
pub use block::{BlockMeta, CacheBlock, block_index};
pub use channel_store::ChannelBlockStore;
pub use clock::SequenceClock;
pub use entry_cache::EntryCache;
pub use memory::InMemoryKvStore;
pub use persistent::{RedbKvStore, RedbKvStoreConfig};

// Re-export the store trait from seqcache-core for convenience
pub use seqcache_core::KvStore;
