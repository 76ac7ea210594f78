//! # Seqcache Node
//!
//! Cache coordinator and changes feed for the seqcache channel change cache.
//!
//! This crate provides [`KvChangeCache`], which ties together:
//! - Storage layer (entry cache + per-channel block stores)
//! - Poll/notify layer (watermarks, waiters, background polling)
//!
//! and [`multi_changes_feed`], which turns the cache into an ordered,
//! optionally continuous stream of [`FeedEvent`]s.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use seqcache_core::{CacheConfig, ChangesOptions, LogEntry};
//! use seqcache_node::{KvChangeCache, multi_changes_feed};
//! use seqcache_storage::InMemoryKvStore;
//! use tokio_util::sync::CancellationToken;
//!
//! let cache = Arc::new(KvChangeCache::new(Arc::new(InMemoryKvStore::new()), CacheConfig::default())?);
//! cache.start_polling().await?;
//!
//! cache.add_to_cache(&LogEntry::new(1, "foo1", "1-a", ["ABC", "CBS"])).await?;
//!
//! let token = CancellationToken::new();
//! let mut feed = multi_changes_feed(cache.clone(), vec!["ABC".into()], ChangesOptions::continuous(0, token));
//! while let Some(event) = feed.next().await {
//!     println!("{:?}", event?);
//! }
//! ```

pub mod cache;
pub mod feed;
pub mod watermarks;

pub use cache::KvChangeCache;
pub use feed::{FeedEvent, multi_changes_feed};
pub use watermarks::KvWatermarkSource;
