//! Log entries flowing from the write path into the cache

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marker recorded when a document leaves a channel
///
/// The removal is itself a new entry at a new sequence; nothing already
/// visible is retracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRemoval {
    /// Sequence at which the document left the channel
    pub seq: u64,
    /// Revision that caused the removal
    pub rev_id: String,
    /// Whether the removing revision is a deletion
    pub deleted: bool,
}

/// Channel name → optional removal marker
pub type ChannelMap = BTreeMap<String, Option<ChannelRemoval>>;

/// One immutable write, positioned by its externally assigned sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub sequence: u64,
    pub doc_id: String,
    pub rev_id: String,
    pub time_received: DateTime<Utc>,
    pub channels: ChannelMap,
}

impl LogEntry {
    /// Create an entry that belongs to every channel in `channels`
    pub fn new<S: Into<String>>(
        sequence: u64,
        doc_id: impl Into<String>,
        rev_id: impl Into<String>,
        channels: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            sequence,
            doc_id: doc_id.into(),
            rev_id: rev_id.into(),
            time_received: Utc::now(),
            channels: channels.into_iter().map(|c| (c.into(), None)).collect(),
        }
    }

    /// Mark this entry as a tombstone for `channel`
    pub fn with_removal(mut self, channel: impl Into<String>, deleted: bool) -> Self {
        let removal = ChannelRemoval {
            seq: self.sequence,
            rev_id: self.rev_id.clone(),
            deleted,
        };
        self.channels.insert(channel.into(), Some(removal));
        self
    }

    /// Whether this entry records the document leaving `channel`
    pub fn is_removal_from(&self, channel: &str) -> bool {
        matches!(self.channels.get(channel), Some(Some(_)))
    }

    /// Whether the revision is a deletion in any channel it was removed from
    pub fn is_deleted(&self) -> bool {
        self.channels
            .values()
            .any(|r| r.as_ref().is_some_and(|r| r.deleted))
    }

    /// Channel names in sorted order
    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }
}
