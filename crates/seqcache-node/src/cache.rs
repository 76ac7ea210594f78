//! Cache coordinator
//!
//! [`KvChangeCache`] is the entry point of the write path and the query
//! path. It owns one [`ChannelBlockStore`] per channel, created lazily the
//! first time a channel is written or read, and the [`ChangeNotifier`] that
//! wakes blocked readers.
//!
//! ## Write Flow
//!
//! ```text
//! add_to_cache(entry)
//!   ├─ EntryCache::put (once; failure aborts the write)
//!   ├─ record_sequence on every channel, concurrently
//!   │    ├─ ok:     advance that channel's local watermark
//!   │    └─ failed: warn and leave the channel out of the result
//!   ├─ every channel failed: return the first error
//!   └─ advance the global clock (failure is returned) and the global watermark
//! ```
//!
//! Every step is idempotent, so a writer that gets a retryable error
//! re-adds the same entry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use futures::future::join_all;
use seqcache_core::{
    CacheConfig, CacheError, CacheResult, ChangeEntry, ChangesOptions, KvStore, LogEntry,
    STAR_CHANNEL,
};
use seqcache_notify::{ChangeNotifier, PollTask, WaitOutcome, WatchKey};
use seqcache_storage::{ChannelBlockStore, EntryCache, SequenceClock};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::watermarks::KvWatermarkSource;

/// Channel-indexed write-through cache over a shared KV store
///
/// Several instances (one per node) may share the same store. Each sees
/// the others' writes through the durable clocks once
/// [`start_polling`](Self::start_polling) is running.
pub struct KvChangeCache {
    config: CacheConfig,
    store: Arc<dyn KvStore>,
    entries: EntryCache,
    /// Channel name → block store
    channels: DashMap<String, Arc<ChannelBlockStore>>,
    notifier: Arc<ChangeNotifier>,
    global_clock: SequenceClock,
    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
    /// Poll task handle (None until polling starts)
    poll_task: Mutex<Option<JoinHandle<()>>>,
    polling: AtomicBool,
}

impl KvChangeCache {
    /// Create a cache over `store`
    pub fn new(store: Arc<dyn KvStore>, config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;

        let global_clock = SequenceClock::global(
            Arc::clone(&store),
            config.max_cas_attempts,
            config.cas_backoff(),
        );
        let (shutdown_tx, _) = broadcast::channel(1);

        info!(
            block_size = config.block_size,
            poll_interval_ms = config.poll_interval_ms,
            "Change cache created"
        );

        Ok(Self {
            entries: EntryCache::new(Arc::clone(&store)),
            config,
            store,
            channels: DashMap::new(),
            notifier: Arc::new(ChangeNotifier::new()),
            global_clock,
            shutdown_tx,
            poll_task: Mutex::new(None),
            polling: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn entry_cache(&self) -> &EntryCache {
        &self.entries
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    /// Channels this instance has a block store for
    pub fn known_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.iter().map(|c| c.key().clone()).collect();
        names.sort();
        names
    }

    /// Record `entry` in the entry cache and in every channel it belongs to
    ///
    /// Returns the channels that were updated. A channel whose block write
    /// fails is logged and left out; the others are unaffected. If no
    /// channel could be written, or the global clock could not be advanced,
    /// the error is returned ([`CacheError::WriteConflict`] is retryable).
    #[instrument(skip(self, entry), fields(seq = entry.sequence, doc = %entry.doc_id))]
    pub async fn add_to_cache(&self, entry: &LogEntry) -> CacheResult<Vec<String>> {
        self.entries.put(entry).await?;

        let seq = entry.sequence;
        let mut targets: Vec<String> = entry.channel_names().map(str::to_string).collect();
        if self.config.star_channel && !entry.channels.contains_key(STAR_CHANNEL) {
            targets.push(STAR_CHANNEL.to_string());
        }

        let writes = targets.into_iter().map(|channel| async move {
            let store = self.channel_store(&channel);
            let result = store.record_sequence(seq).await;
            (channel, result)
        });

        let mut updated = Vec::new();
        let mut first_error = None;
        for (channel, result) in join_all(writes).await {
            match result {
                Ok(()) => {
                    self.notifier.advance(&WatchKey::channel(channel.as_str()), seq);
                    updated.push(channel);
                }
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Failed to record sequence in channel");
                    first_error = first_error.or(Some(e));
                }
            }
        }
        if updated.is_empty()
            && let Some(e) = first_error
        {
            return Err(e);
        }

        // Peers learn about the write from this clock
        self.global_clock
            .advance_to(seq)
            .await
            .inspect_err(|e| warn!(error = %e, "Failed to advance global clock"))?;
        self.notifier.advance(&WatchKey::Global, seq);

        updated.sort();
        debug!(channels = ?updated, "Added entry to cache");
        Ok(updated)
    }

    /// Block store for `channel`, or `None` if no node ever wrote it
    pub async fn get_cache_helper(
        &self,
        channel: &str,
    ) -> CacheResult<Option<Arc<ChannelBlockStore>>> {
        if let Some(existing) = self.channels.get(channel) {
            return Ok(Some(Arc::clone(&existing)));
        }

        // Written by a peer node if its clock exists
        let clock = SequenceClock::for_channel(
            Arc::clone(&self.store),
            channel,
            self.config.max_cas_attempts,
            self.config.cas_backoff(),
        );
        if clock.read().await?.is_none() {
            return Ok(None);
        }
        Ok(Some(self.channel_store(channel)))
    }

    /// Entries of `channel` after `options.since`, in sequence order
    pub async fn get_changes(
        &self,
        channel: &str,
        options: &ChangesOptions,
    ) -> CacheResult<Vec<LogEntry>> {
        self.changes_after(channel, options.since.seq, options.limit)
            .await
    }

    /// Changes of `channel` as feed entries
    ///
    /// The first element is the sequence from which the cache is complete.
    pub async fn get_cached_changes(
        &self,
        channel: &str,
        options: &ChangesOptions,
    ) -> CacheResult<(u64, Vec<ChangeEntry>)> {
        let changes: Vec<ChangeEntry> = self
            .get_changes(channel, options)
            .await?
            .iter()
            .map(|entry| ChangeEntry::from_log_entry(entry, [channel]))
            .collect();
        Ok((self.valid_from(), changes))
    }

    /// First sequence the cache is guaranteed to hold
    pub fn valid_from(&self) -> u64 {
        self.config.initial_sequence + 1
    }

    /// Whether `seq` is recorded for `channel`
    pub async fn has_sequence(&self, channel: &str, seq: u64) -> CacheResult<bool> {
        match self.get_cache_helper(channel).await? {
            Some(store) => store.has_sequence(seq).await,
            None => Ok(false),
        }
    }

    /// Suspend until `seq` is visible in every channel of its entry
    ///
    /// Returns [`CacheError::Cancelled`] if `cancel` fires first and
    /// [`CacheError::Shutdown`] if the cache shuts down.
    pub async fn wait_for_sequence(
        &self,
        seq: u64,
        cancel: Option<&CancellationToken>,
    ) -> CacheResult<()> {
        let mut after = seq.saturating_sub(1);

        loop {
            let subscription = self.notifier.subscribe(vec![(WatchKey::Global, after)]);
            if self.is_sequence_visible(seq).await? {
                return Ok(());
            }

            match subscription.wait(cancel).await {
                // Seen but not yet visible everywhere; wait for the next advance
                WaitOutcome::Notified { seq: observed, .. } => after = after.max(observed),
                WaitOutcome::Cancelled => return Err(CacheError::Cancelled),
                WaitOutcome::Shutdown => return Err(CacheError::Shutdown),
            }
        }
    }

    /// Re-derive one block of `channel` from the entry cache
    pub async fn rebuild_block(&self, channel: &str, index: u64) -> CacheResult<Option<u64>> {
        let store = self.channel_store(channel);
        let rebuilt = store.rebuild_block(index, &self.entries).await?;
        if rebuilt.is_some() {
            let high = store.high_sequence().await?;
            self.notifier.advance(&WatchKey::channel(channel), high);
        }
        Ok(rebuilt)
    }

    /// Start the background task that observes writes from peer nodes
    ///
    /// Calling it again while polling is running does nothing.
    pub async fn start_polling(&self) -> CacheResult<()> {
        if self.notifier.is_shut_down() {
            return Err(CacheError::Shutdown);
        }
        if self.polling.swap(true, Ordering::SeqCst) {
            debug!("Polling already started");
            return Ok(());
        }

        let source = Arc::new(KvWatermarkSource::new(Arc::clone(&self.store), &self.config));
        let handle = PollTask::spawn(
            Arc::clone(&self.notifier),
            source,
            self.config.poll_interval(),
            self.shutdown_tx.subscribe(),
        );
        *self.poll_task.lock().await = Some(handle);

        info!(interval_ms = self.config.poll_interval_ms, "Polling started");
        Ok(())
    }

    /// Stop polling and release every blocked reader
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        self.notifier.shutdown();

        if let Some(task) = self.poll_task.lock().await.take()
            && let Err(e) = task.await
        {
            error!(error = %e, "Poll task failed");
        }
        self.polling.store(false, Ordering::SeqCst);
        info!("Change cache shut down");
    }

    /// Highest sequence fully written by any node
    pub(crate) async fn global_high(&self) -> CacheResult<u64> {
        self.global_clock.current().await
    }

    /// Entries of `channel` after `since`, at most `limit`
    pub(crate) async fn changes_after(
        &self,
        channel: &str,
        since: u64,
        limit: Option<usize>,
    ) -> CacheResult<Vec<LogEntry>> {
        match self.get_cache_helper(channel).await? {
            Some(store) => store.changes_since(since, limit, &self.entries).await,
            None => Ok(Vec::new()),
        }
    }

    /// Whether `seq` has been written and recorded in all of its channels
    async fn is_sequence_visible(&self, seq: u64) -> CacheResult<bool> {
        let Some(entry) = self.entries.get(seq).await? else {
            return Ok(false);
        };

        for channel in entry.channel_names() {
            if !self.has_sequence(channel, seq).await? {
                return Ok(false);
            }
        }
        if self.config.star_channel && !self.has_sequence(STAR_CHANNEL, seq).await? {
            return Ok(false);
        }
        Ok(true)
    }

    /// Get or create the block store for `channel`
    fn channel_store(&self, channel: &str) -> Arc<ChannelBlockStore> {
        if let Some(existing) = self.channels.get(channel) {
            return Arc::clone(&existing);
        }

        let store = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| {
                debug!(channel, "Creating channel block store");
                self.notifier.watch(WatchKey::channel(channel));
                Arc::new(ChannelBlockStore::new(
                    channel,
                    Arc::clone(&self.store),
                    &self.config,
                ))
            });
        Arc::clone(&store)
    }
}

impl std::fmt::Debug for KvChangeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvChangeCache")
            .field("config", &self.config)
            .field("channels", &self.channels.len())
            .field("polling", &self.polling.load(Ordering::SeqCst))
            .finish()
    }
}
