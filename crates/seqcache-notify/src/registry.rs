//! Subscription registry
//!
//! Each blocked reader registers the keys it is waiting on together with the
//! sequence it has already seen, and a one-shot wake handle. Whoever
//! observes an advance scans the registry and releases the waiters it
//! satisfies. A released or dropped registration is removed, so no wake-up
//! outlives its waiter.

use std::future::pending;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::watermark::WatchKey;

/// Why a waiter was woken
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeReason {
    /// `key` reached `seq`, which is past what the waiter had seen
    Advanced { key: WatchKey, seq: u64 },
    /// The notifier shut down
    Shutdown,
}

/// Result of [`Subscription::wait`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// New data is available on `key`
    Notified { key: WatchKey, seq: u64 },
    /// The caller's cancellation token fired
    Cancelled,
    /// The notifier shut down
    Shutdown,
}

struct Waiter {
    /// `(key, after)`: satisfied once `key` moves past `after`
    targets: Vec<(WatchKey, u64)>,
    wake: oneshot::Sender<WakeReason>,
}

/// Registry of blocked waiters
#[derive(Default)]
pub struct WaiterRegistry {
    next_id: AtomicU64,
    waiters: DashMap<u64, Waiter>,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered waiters
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Register a waiter; the returned subscription deregisters on drop
    pub fn register(self: &Arc<Self>, targets: Vec<(WatchKey, u64)>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (wake, rx) = oneshot::channel();
        self.waiters.insert(id, Waiter { targets, wake });
        trace!(id, "Registered waiter");

        Subscription {
            id,
            rx,
            registry: Arc::clone(self),
        }
    }

    /// Release every waiter satisfied by `key` reaching `seq`
    pub fn release_matching(&self, key: &WatchKey, seq: u64) -> usize {
        let ids: Vec<u64> = self
            .waiters
            .iter()
            .filter(|w| w.targets.iter().any(|(k, after)| k == key && seq > *after))
            .map(|w| *w.key())
            .collect();

        ids.into_iter()
            .filter(|id| {
                self.release(
                    *id,
                    WakeReason::Advanced {
                        key: key.clone(),
                        seq,
                    },
                )
            })
            .count()
    }

    /// Release one waiter; returns whether it was still registered
    pub fn release(&self, id: u64, reason: WakeReason) -> bool {
        match self.waiters.remove(&id) {
            Some((_, waiter)) => {
                // The receiver may already be gone; the registration is removed either way
                let _ = waiter.wake.send(reason);
                trace!(id, "Released waiter");
                true
            }
            None => false,
        }
    }

    /// Release every waiter with `reason`
    pub fn release_all(&self, reason: WakeReason) -> usize {
        let ids: Vec<u64> = self.waiters.iter().map(|w| *w.key()).collect();
        ids.into_iter()
            .filter(|id| self.release(*id, reason.clone()))
            .count()
    }

    /// Every key some waiter is waiting on
    pub fn watched_keys(&self) -> Vec<WatchKey> {
        let mut keys: Vec<WatchKey> = self
            .waiters
            .iter()
            .flat_map(|w| w.targets.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>())
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    fn deregister(&self, id: u64) {
        if self.waiters.remove(&id).is_some() {
            trace!(id, "Deregistered waiter");
        }
    }
}

/// A registered wait
///
/// Dropping it removes the registration.
pub struct Subscription {
    id: u64,
    rx: oneshot::Receiver<WakeReason>,
    registry: Arc<WaiterRegistry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Suspend until released, or until `cancel` fires
    pub async fn wait(mut self, cancel: Option<&CancellationToken>) -> WaitOutcome {
        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => WaitOutcome::Cancelled,
            reason = &mut self.rx => match reason {
                Ok(WakeReason::Advanced { key, seq }) => WaitOutcome::Notified { key, seq },
                Ok(WakeReason::Shutdown) | Err(_) => WaitOutcome::Shutdown,
            },
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}
