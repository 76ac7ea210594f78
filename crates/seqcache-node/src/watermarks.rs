//! Durable watermarks read from the shared KV store

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use seqcache_core::{CacheConfig, CacheError, KvStore};
use seqcache_notify::{WatchKey, WatermarkSource};
use seqcache_storage::SequenceClock;

/// [`WatermarkSource`] over the channel and global clocks of a KV store
pub struct KvWatermarkSource {
    store: Arc<dyn KvStore>,
    max_attempts: u32,
    backoff: Duration,
}

impl KvWatermarkSource {
    pub fn new(store: Arc<dyn KvStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            max_attempts: config.max_cas_attempts,
            backoff: config.cas_backoff(),
        }
    }

    fn clock(&self, key: &WatchKey) -> SequenceClock {
        let store = Arc::clone(&self.store);
        match key {
            WatchKey::Global => SequenceClock::global(store, self.max_attempts, self.backoff),
            WatchKey::Channel(channel) => {
                SequenceClock::for_channel(store, channel, self.max_attempts, self.backoff)
            }
        }
    }
}

#[async_trait]
impl WatermarkSource for KvWatermarkSource {
    async fn read_watermark(&self, key: &WatchKey) -> Result<Option<u64>, CacheError> {
        self.clock(key).read().await
    }
}
