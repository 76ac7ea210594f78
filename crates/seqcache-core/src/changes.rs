//! Changes-feed request and response types

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::entry::LogEntry;
use crate::sequence::SequenceId;

/// One revision listed in a [`ChangeEntry`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRev {
    pub rev: String,
}

/// One element of a changes feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub seq: SequenceId,
    pub id: String,
    pub changes: Vec<ChangeRev>,
    /// Subscribed channels this entry is a tombstone for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

impl ChangeEntry {
    /// Translate a log entry as seen through a set of subscribed channels
    pub fn from_log_entry<'a>(
        entry: &LogEntry,
        channels: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let removed: BTreeSet<String> = channels
            .into_iter()
            .filter(|c| entry.is_removal_from(c))
            .map(str::to_string)
            .collect();

        Self {
            seq: SequenceId::new(entry.sequence),
            id: entry.doc_id.clone(),
            changes: vec![ChangeRev {
                rev: entry.rev_id.clone(),
            }],
            removed: (!removed.is_empty()).then_some(removed),
            deleted: entry.is_deleted(),
        }
    }
}

/// Parameters of a changes request
#[derive(Debug, Clone, Default)]
pub struct ChangesOptions {
    /// Only entries strictly after this cursor are returned
    pub since: SequenceId,
    /// Block until at least one entry is available
    pub wait: bool,
    /// Keep the feed open after the first batch
    pub continuous: bool,
    /// Closes the feed when cancelled
    pub terminator: Option<CancellationToken>,
    /// Maximum entries per batch
    pub limit: Option<usize>,
}

impl ChangesOptions {
    /// One-shot request starting after `since`
    pub fn since(since: impl Into<SequenceId>) -> Self {
        Self {
            since: since.into(),
            ..Default::default()
        }
    }

    /// Open-ended request that stays open until `terminator` fires
    pub fn continuous(since: impl Into<SequenceId>, terminator: CancellationToken) -> Self {
        Self {
            since: since.into(),
            wait: true,
            continuous: true,
            terminator: Some(terminator),
            limit: None,
        }
    }

    /// Set the per-batch limit
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether the terminator has fired
    pub fn is_terminated(&self) -> bool {
        self.terminator.as_ref().is_some_and(|t| t.is_cancelled())
    }
}
