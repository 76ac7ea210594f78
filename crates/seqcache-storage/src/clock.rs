//! Durable watermarks
//!
//! A clock records the highest sequence that has been fully written for a
//! channel (or for the whole cache). Peer nodes poll clocks to learn about
//! writes they did not perform.

use std::sync::Arc;
use std::time::Duration;

use seqcache_core::keys::{channel_clock_key, global_clock_key};
use seqcache_core::{CacheError, CasOutcome, KvStore};
use tracing::{debug, trace};

use crate::codec::{decode, encode};

/// Monotone counter stored under a single key
#[derive(Clone)]
pub struct SequenceClock {
    store: Arc<dyn KvStore>,
    key: String,
    max_attempts: u32,
    backoff: Duration,
}

impl SequenceClock {
    /// Clock tracking one channel
    pub fn for_channel(
        store: Arc<dyn KvStore>,
        channel: &str,
        max_attempts: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            store,
            key: channel_clock_key(channel),
            max_attempts,
            backoff,
        }
    }

    /// Clock tracking every channel
    pub fn global(store: Arc<dyn KvStore>, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            store,
            key: global_clock_key(),
            max_attempts,
            backoff,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current value, or `None` if nothing was ever recorded
    pub async fn read(&self) -> Result<Option<u64>, CacheError> {
        match self.store.get(&self.key).await? {
            Some(record) => Ok(Some(decode(&record.value)?)),
            None => Ok(None),
        }
    }

    /// Current value, treating an absent clock as zero
    pub async fn current(&self) -> Result<u64, CacheError> {
        Ok(self.read().await?.unwrap_or(0))
    }

    /// Raise the clock to at least `seq`, returning the stored value
    ///
    /// Never lowers the clock: a concurrent writer that already stored a
    /// higher value wins.
    pub async fn advance_to(&self, seq: u64) -> Result<u64, CacheError> {
        for attempt in 1..=self.max_attempts {
            let (current, expected) = match self.store.get(&self.key).await? {
                Some(record) => (decode::<u64>(&record.value)?, Some(record.cas)),
                None => (0, None),
            };

            if current >= seq && expected.is_some() {
                return Ok(current);
            }

            match self
                .store
                .compare_and_swap(&self.key, encode(&seq)?, expected)
                .await?
            {
                CasOutcome::Stored(_) => {
                    trace!(key = %self.key, seq, "Advanced clock");
                    return Ok(seq);
                }
                CasOutcome::Conflict => {
                    debug!(key = %self.key, attempt, "Clock update conflicted, retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                }
            }
        }

        Err(CacheError::WriteConflict {
            key: self.key.clone(),
            attempts: self.max_attempts,
        })
    }
}
