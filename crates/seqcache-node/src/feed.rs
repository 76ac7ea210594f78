//! Multi-channel changes feed
//!
//! Merges the changes of several channels into one stream ordered by
//! sequence. An entry in more than one subscribed channel appears once.
//!
//! ## Feed Loop
//!
//! ```text
//! loop
//!   ├─ read the global clock as the upper bound of this batch
//!   ├─ query every channel after the cursor, merge, hold back entries
//!   │  past the bound, apply the limit
//!   ├─ emit entries, moving the cursor to each emitted sequence
//!   ├─ continuous: emit Heartbeat
//!   │  one-shot:   stop unless nothing was found and waiting is allowed
//!   └─ suspend until something past the cursor is written
//!        ├─ entries held back: wait for the global clock to pass the bound
//!        ├─ otherwise: wait on every channel past the cursor
//!        └─ terminator or shutdown: stop
//! Closed
//! ```
//!
//! Channels are not scanned at one instant: a channel read late can return
//! a sequence whose predecessor landed in a channel that was already read.
//! The global clock only moves once a write is recorded in its channels,
//! so a batch never runs ahead of the last completed write.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use seqcache_core::{CacheResult, ChangeEntry, ChangesOptions, LogEntry};
use seqcache_notify::{WaitOutcome, WatchKey};
use tracing::{debug, error, trace};

use crate::cache::KvChangeCache;

/// One element of a changes feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "change", rename_all = "snake_case")]
pub enum FeedEvent {
    /// A change the consumer has not seen
    Entry(ChangeEntry),
    /// End of one continuous iteration; carries no data
    Heartbeat,
    /// The feed is finished; always the last element
    Closed,
}

impl FeedEvent {
    pub fn as_entry(&self) -> Option<&ChangeEntry> {
        match self {
            FeedEvent::Entry(entry) => Some(entry),
            _ => None,
        }
    }
}

/// Stream of changes across `channels`, starting after `options.since`
///
/// A failed query yields the error, then [`FeedEvent::Closed`].
pub fn multi_changes_feed(
    cache: Arc<KvChangeCache>,
    channels: Vec<String>,
    options: ChangesOptions,
) -> Pin<Box<dyn Stream<Item = CacheResult<FeedEvent>> + Send>> {
    Box::pin(async_stream::stream! {
        let wait = options.wait || options.continuous;
        let mut cursor = options.since.seq;
        let mut waited = false;

        debug!(?channels, since = cursor, continuous = options.continuous, "Feed opened");

        loop {
            if options.is_terminated() || cache.notifier().is_shut_down() {
                break;
            }

            let batch = match merged_changes(&cache, &channels, cursor, options.limit).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!(error = %e, "Feed query failed");
                    yield Err(e);
                    break;
                }
            };

            let emitted = batch.entries.len();
            for entry in batch.entries {
                cursor = entry.sequence;
                trace!(seq = cursor, doc = %entry.doc_id, "Feed entry");
                yield Ok(FeedEvent::Entry(ChangeEntry::from_log_entry(
                    &entry,
                    channels.iter().map(String::as_str),
                )));
            }

            if options.continuous {
                yield Ok(FeedEvent::Heartbeat);
            } else if emitted > 0 || !wait || waited {
                break;
            }

            let targets = if batch.held_back {
                vec![(WatchKey::Global, batch.bound)]
            } else {
                channels
                    .iter()
                    .map(|c| (WatchKey::channel(c.as_str()), cursor))
                    .collect()
            };
            match cache
                .notifier()
                .subscribe(targets)
                .wait(options.terminator.as_ref())
                .await
            {
                WaitOutcome::Notified { key, seq } => {
                    trace!(key = %key, seq, "Feed woken");
                    waited = true;
                }
                WaitOutcome::Cancelled | WaitOutcome::Shutdown => break,
            }
        }

        debug!(cursor, "Feed closed");
        yield Ok(FeedEvent::Closed);
    })
}

/// One merged query across the feed's channels
struct MergedBatch {
    entries: Vec<LogEntry>,
    /// Global clock read before the channels were scanned
    bound: u64,
    /// Whether entries past `bound` were found and left for a later batch
    held_back: bool,
}

/// Changes of every channel after `since`, merged and deduplicated
async fn merged_changes(
    cache: &KvChangeCache,
    channels: &[String],
    since: u64,
    limit: Option<usize>,
) -> CacheResult<MergedBatch> {
    let bound = cache.global_high().await?;
    let per_channel = try_join_all(
        channels
            .iter()
            .map(|channel| cache.changes_after(channel, since, limit)),
    )
    .await?;

    let mut merged: BTreeMap<u64, LogEntry> = per_channel
        .into_iter()
        .flatten()
        .map(|entry| (entry.sequence, entry))
        .collect();
    let held_back = !merged.split_off(&(bound.saturating_add(1))).is_empty();
    if held_back {
        trace!(bound, "Entries past the global clock held back");
    }

    Ok(MergedBatch {
        entries: merged
            .into_values()
            .take(limit.unwrap_or(usize::MAX))
            .collect(),
        bound,
        held_back,
    })
}
