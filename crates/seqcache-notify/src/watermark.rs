//! Watched watermarks

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

/// What a waiter or the poll task is watching
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WatchKey {
    /// Highest sequence written by any node, across all channels
    Global,
    /// Highest sequence recorded for one channel
    Channel(String),
}

impl WatchKey {
    pub fn channel(name: impl Into<String>) -> Self {
        WatchKey::Channel(name.into())
    }
}

impl fmt::Display for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchKey::Global => write!(f, "<global>"),
            WatchKey::Channel(name) => write!(f, "{}", name),
        }
    }
}

/// Lifecycle of a watched watermark
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PollState {
    /// Nothing in flight
    Idle = 0,
    /// The poll task is re-reading the durable value
    Polling = 1,
    /// An advance was observed and waiters are being released
    NotifyPending = 2,
}

impl PollState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PollState::Polling,
            2 => PollState::NotifyPending,
            _ => PollState::Idle,
        }
    }
}

/// Highest observed sequence for one key, plus its poll state
#[derive(Debug, Default)]
pub struct Watermark {
    seq: AtomicU64,
    state: AtomicU8,
}

impl Watermark {
    pub fn seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> PollState {
        PollState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Raise the watermark to `seq`; returns whether it moved
    pub(crate) fn advance(&self, seq: u64) -> bool {
        self.seq.fetch_max(seq, Ordering::SeqCst) < seq
    }

    pub(crate) fn set_state(&self, state: PollState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Move `from` → `to` only if currently in `from`
    pub(crate) fn transition(&self, from: PollState, to: PollState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}
