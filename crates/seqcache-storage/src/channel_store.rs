//! Per-channel block storage
//!
//! ## Write Flow
//!
//! ```text
//! record_sequence(seq)
//!   ├─ block_index = seq / block_size
//!   ├─ load block (or start an empty one)
//!   ├─ union in the local copy, set the bit
//!   ├─ CAS against the version that was read
//!   │    └─ on conflict: reload, re-merge, retry (bounded)
//!   └─ advance the channel clock
//! ```
//!
//! ## Read Flow
//!
//! ```text
//! changes_since(since)
//!   ├─ read the channel clock once (highest fully written sequence)
//!   ├─ walk blocks from block_index(since) up to the clock's block
//!   │    ├─ first block: offsets after `since` only
//!   │    └─ offsets past the clock are left for a later read
//!   └─ hydrate each sequence from the EntryCache
//! ```

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use seqcache_core::keys::block_key;
use seqcache_core::{CacheConfig, CacheError, CasOutcome, KvStore, LogEntry, STAR_CHANNEL};
use tracing::{debug, instrument, trace, warn};

use crate::block::{CacheBlock, block_index};
use crate::clock::SequenceClock;
use crate::codec::{decode, encode};
use crate::entry_cache::EntryCache;

/// Block storage for one channel
///
/// Locally cached block copies are only ever unioned with what the store
/// returns, so a set bit seen locally is always valid.
pub struct ChannelBlockStore {
    channel: String,
    store: Arc<dyn KvStore>,
    clock: SequenceClock,
    block_size: u64,
    max_attempts: u32,
    backoff: Duration,
    /// Local copies of blocks, keyed by block index
    blocks: DashMap<u64, CacheBlock>,
}

impl ChannelBlockStore {
    /// Create the store for `channel`
    pub fn new(channel: impl Into<String>, store: Arc<dyn KvStore>, config: &CacheConfig) -> Self {
        let channel = channel.into();
        let clock = SequenceClock::for_channel(
            Arc::clone(&store),
            &channel,
            config.max_cas_attempts,
            config.cas_backoff(),
        );
        Self {
            channel,
            store,
            clock,
            block_size: config.block_size,
            max_attempts: config.max_cas_attempts,
            backoff: config.cas_backoff(),
            blocks: DashMap::new(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// The durable clock of this channel
    pub fn clock(&self) -> &SequenceClock {
        &self.clock
    }

    /// Highest sequence fully recorded for this channel by any node
    pub async fn high_sequence(&self) -> Result<u64, CacheError> {
        self.clock.current().await
    }

    /// Record that `seq` belongs to this channel
    #[instrument(skip(self), fields(channel = %self.channel))]
    pub async fn record_sequence(&self, seq: u64) -> Result<(), CacheError> {
        let index = block_index(seq, self.block_size);
        self.merge_into_store(index, |block| {
            block.add_sequence(seq);
        })
        .await?;
        self.clock.advance_to(seq).await?;
        trace!(seq, index, "Recorded sequence");
        Ok(())
    }

    /// Whether `seq` has been recorded for this channel
    ///
    /// Absent blocks and unset bits both answer `false`.
    pub async fn has_sequence(&self, seq: u64) -> Result<bool, CacheError> {
        let index = block_index(seq, self.block_size);
        if let Some(local) = self.blocks.get(&index)
            && local.has_sequence(seq)
        {
            return Ok(true);
        }
        Ok(self
            .read_block(index)
            .await?
            .is_some_and(|b| b.has_sequence(seq)))
    }

    /// Read the block owning `seq`
    pub async fn block_for_sequence(&self, seq: u64) -> Result<Option<CacheBlock>, CacheError> {
        self.read_block(block_index(seq, self.block_size)).await
    }

    /// Read a block from the store, merged with the local copy
    pub async fn read_block(&self, index: u64) -> Result<Option<CacheBlock>, CacheError> {
        let key = block_key(&self.channel, index);
        let Some(record) = self.store.get(&key).await? else {
            return Ok(self.blocks.get(&index).map(|b| b.clone()));
        };

        let stored: CacheBlock = decode(&record.value)?;
        self.check_block_size(&stored)?;
        Ok(Some(self.remember(stored)))
    }

    /// Entries recorded after `since`, in strictly increasing order
    ///
    /// Only sequences up to the channel clock, read once before the scan,
    /// are returned; a write still in flight shows up on a later call. A
    /// recorded sequence whose entry is missing from the entry cache is
    /// skipped.
    #[instrument(skip(self, entries), fields(channel = %self.channel))]
    pub async fn changes_since(
        &self,
        since: u64,
        limit: Option<usize>,
        entries: &EntryCache,
    ) -> Result<Vec<LogEntry>, CacheError> {
        let limit = limit.unwrap_or(usize::MAX);
        let high = self.high_sequence().await?;
        let last_known = block_index(high, self.block_size);
        let mut index = block_index(since, self.block_size);
        let mut results = Vec::new();

        while results.len() < limit && index <= last_known {
            if let Some(block) = self.read_block(index).await? {
                let wanted = limit - results.len();
                let seqs: Vec<u64> = block
                    .sequences_after(since)
                    .take_while(|seq| *seq <= high)
                    .take(wanted)
                    .collect();
                let hydrated = entries.get_many(&seqs).await?;
                if hydrated.len() < seqs.len() {
                    warn!(
                        index,
                        missing = seqs.len() - hydrated.len(),
                        "Recorded sequences missing from entry cache"
                    );
                }
                results.extend(hydrated);
            }

            let Some(next) = index.checked_add(1) else {
                break;
            };
            index = next;
        }

        debug!(since, high, count = results.len(), "Read changes");
        Ok(results)
    }

    /// Re-derive one block from the entry cache and merge it into the store
    ///
    /// Used to recover a lost block. Returns the number of sequences the
    /// rebuilt block holds, or `None` if the range holds no entries for this
    /// channel.
    #[instrument(skip(self, entries), fields(channel = %self.channel))]
    pub async fn rebuild_block(
        &self,
        index: u64,
        entries: &EntryCache,
    ) -> Result<Option<u64>, CacheError> {
        let range = index
            .checked_mul(self.block_size)
            .and_then(|start| Some((start, start.checked_add(self.block_size)?)));
        let Some((start, end)) = range else {
            return Err(CacheError::Config(format!(
                "block {index} of channel {} is outside the sequence space",
                self.channel
            )));
        };
        let in_range = entries.get_range(start, end).await?;

        let mut rebuilt = CacheBlock::new(self.channel.clone(), index, self.block_size);
        let mut high = None;
        for entry in in_range {
            if self.channel == STAR_CHANNEL || entry.channels.contains_key(&self.channel) {
                rebuilt.add_sequence(entry.sequence);
                high = Some(entry.sequence);
            }
        }

        let Some(high) = high else {
            debug!(index, "Nothing to rebuild");
            return Ok(None);
        };

        let merged = self.merge_into_store(index, |block| block.merge(&rebuilt)).await?;
        self.clock.advance_to(high).await?;
        debug!(index, count = merged.len(), "Rebuilt block");
        Ok(Some(merged.len()))
    }

    /// Read-modify-write one block with bounded CAS retries
    async fn merge_into_store<F>(&self, index: u64, update: F) -> Result<CacheBlock, CacheError>
    where
        F: Fn(&mut CacheBlock),
    {
        let key = block_key(&self.channel, index);

        for attempt in 1..=self.max_attempts {
            let (mut block, expected) = match self.store.get(&key).await? {
                Some(record) => {
                    let stored: CacheBlock = decode(&record.value)?;
                    self.check_block_size(&stored)?;
                    (stored, Some(record.cas))
                }
                None => (
                    CacheBlock::new(self.channel.clone(), index, self.block_size),
                    None,
                ),
            };

            if let Some(local) = self.blocks.get(&index) {
                block.merge(&local);
            }
            update(&mut block);

            match self
                .store
                .compare_and_swap(&key, encode(&block)?, expected)
                .await?
            {
                CasOutcome::Stored(_) => return Ok(self.remember(block)),
                CasOutcome::Conflict => {
                    debug!(key = %key, attempt, "Block write conflicted, merging and retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                }
            }
        }

        warn!(key = %key, attempts = self.max_attempts, "Giving up on block write");
        Err(CacheError::WriteConflict {
            key,
            attempts: self.max_attempts,
        })
    }

    /// Union a block into the local copy and return the result
    fn remember(&self, block: CacheBlock) -> CacheBlock {
        let mut local = self
            .blocks
            .entry(block.index())
            .or_insert_with(|| CacheBlock::new(self.channel.clone(), block.index(), self.block_size));
        local.merge(&block);
        local.clone()
    }

    fn check_block_size(&self, block: &CacheBlock) -> Result<(), CacheError> {
        if block.block_size() != self.block_size {
            return Err(CacheError::Config(format!(
                "block {} of channel {} has size {}, expected {}",
                block.index(),
                self.channel,
                block.block_size(),
                self.block_size
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ChannelBlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelBlockStore")
            .field("channel", &self.channel)
            .field("block_size", &self.block_size)
            .field("cached_blocks", &self.blocks.len())
            .finish()
    }
}
