//! Change notifier
//!
//! Holds the highest sequence this process has observed per watched key and
//! the registry of readers blocked on those keys. Local writes advance it
//! directly; the poll task advances it for writes made by peer nodes.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::{Subscription, WaiterRegistry, WakeReason};
use crate::watermark::{PollState, WatchKey, Watermark};

/// Watermarks plus the waiters blocked on them
pub struct ChangeNotifier {
    watermarks: DashMap<WatchKey, Arc<Watermark>>,
    registry: Arc<WaiterRegistry>,
    shutdown: CancellationToken,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let watermarks = DashMap::new();
        watermarks.insert(WatchKey::Global, Arc::new(Watermark::default()));
        Self {
            watermarks,
            registry: Arc::new(WaiterRegistry::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Watermark for `key`, created at zero if not yet watched
    pub fn watermark(&self, key: &WatchKey) -> Arc<Watermark> {
        if let Some(existing) = self.watermarks.get(key) {
            return Arc::clone(&existing);
        }
        Arc::clone(&self.watermarks.entry(key.clone()).or_default())
    }

    /// Highest sequence observed for `key`
    pub fn current(&self, key: &WatchKey) -> u64 {
        self.watermarks.get(key).map(|w| w.seq()).unwrap_or(0)
    }

    pub fn state(&self, key: &WatchKey) -> PollState {
        self.watermarks
            .get(key)
            .map(|w| w.state())
            .unwrap_or(PollState::Idle)
    }

    /// Start tracking `key` so the poll task refreshes it
    pub fn watch(&self, key: WatchKey) {
        self.watermarks.entry(key).or_default();
    }

    /// Keys with a watermark or an active waiter
    pub fn watched_keys(&self) -> Vec<WatchKey> {
        let mut keys: Vec<WatchKey> = self.watermarks.iter().map(|w| w.key().clone()).collect();
        keys.extend(self.registry.watched_keys());
        keys.sort();
        keys.dedup();
        keys
    }

    /// Number of blocked waiters
    pub fn waiter_count(&self) -> usize {
        self.registry.len()
    }

    /// Mark `key` as being re-read by the poll task
    pub fn begin_poll(&self, key: &WatchKey) -> bool {
        self.watermark(key)
            .transition(PollState::Idle, PollState::Polling)
    }

    /// Return `key` to idle after a poll that found nothing new
    pub fn end_poll(&self, key: &WatchKey) {
        if let Some(wm) = self.watermarks.get(key) {
            wm.transition(PollState::Polling, PollState::Idle);
        }
    }

    /// Record that `key` has reached `seq` and wake satisfied waiters
    ///
    /// Returns whether the watermark moved. Lower or equal values are
    /// ignored.
    pub fn advance(&self, key: &WatchKey, seq: u64) -> bool {
        let wm = self.watermark(key);
        if !wm.advance(seq) {
            return false;
        }

        wm.set_state(PollState::NotifyPending);
        let released = self.registry.release_matching(key, seq);
        wm.set_state(PollState::Idle);

        debug!(key = %key, seq, released, "Watermark advanced");
        true
    }

    /// Register a wait on any of `targets`
    ///
    /// Each target is `(key, after)` and is satisfied once `key` moves past
    /// `after`. A target that is already satisfied releases the
    /// subscription immediately.
    pub fn subscribe(&self, targets: Vec<(WatchKey, u64)>) -> Subscription {
        for (key, _) in &targets {
            self.watch(key.clone());
        }

        // Register before checking, so an advance racing with this call
        // either sees the waiter or is seen below.
        let subscription = self.registry.register(targets.clone());

        if self.shutdown.is_cancelled() {
            self.registry.release(subscription.id(), WakeReason::Shutdown);
            return subscription;
        }

        for (key, after) in targets {
            let seq = self.current(&key);
            if seq > after {
                self.registry
                    .release(subscription.id(), WakeReason::Advanced { key, seq });
                break;
            }
        }
        subscription
    }

    /// Wake every waiter with `Shutdown`; later subscriptions resolve at once
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        let released = self.registry.release_all(WakeReason::Shutdown);
        info!(released, "Change notifier shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Token cancelled when the notifier shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("watermarks", &self.watermarks.len())
            .field("waiters", &self.registry.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WaitOutcome;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[tokio::test]
    async fn test_advance_wakes_waiter() {
        let notifier = Arc::new(ChangeNotifier::new());
        let sub = notifier.subscribe(vec![(WatchKey::channel("ABC"), 0)]);
        assert_eq!(notifier.waiter_count(), 1);

        let n = notifier.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            n.advance(&WatchKey::channel("ABC"), 1);
        });

        assert_eq!(
            sub.wait(None).await,
            WaitOutcome::Notified {
                key: WatchKey::channel("ABC"),
                seq: 1
            }
        );
        assert_eq!(notifier.waiter_count(), 0);
        assert_eq!(notifier.state(&WatchKey::channel("ABC")), PollState::Idle);
    }

    #[tokio::test]
    async fn test_already_satisfied_resolves_immediately() {
        let notifier = ChangeNotifier::new();
        notifier.advance(&WatchKey::channel("ABC"), 5);

        let sub = notifier.subscribe(vec![(WatchKey::channel("ABC"), 4)]);
        assert!(matches!(
            sub.wait(None).await,
            WaitOutcome::Notified { seq: 5, .. }
        ));
    }

    #[test]
    fn test_unrelated_key_does_not_wake() {
        let notifier = ChangeNotifier::new();
        let mut wait = task::spawn(
            notifier
                .subscribe(vec![(WatchKey::channel("ABC"), 0)])
                .wait(None),
        );
        assert_pending!(wait.poll());

        notifier.advance(&WatchKey::channel("NBC"), 4);
        assert!(!wait.is_woken());
        assert_pending!(wait.poll());

        notifier.advance(&WatchKey::channel("ABC"), 1);
        assert!(wait.is_woken());
        assert_ready_eq!(
            wait.poll(),
            WaitOutcome::Notified {
                key: WatchKey::channel("ABC"),
                seq: 1
            }
        );
        assert_eq!(notifier.waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_wait_deregisters() {
        let notifier = ChangeNotifier::new();
        let sub = notifier.subscribe(vec![(WatchKey::channel("ABC"), 0)]);

        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        assert_eq!(sub.wait(Some(&token)).await, WaitOutcome::Cancelled);
        assert_eq!(notifier.waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_advance_is_monotone() {
        let notifier = ChangeNotifier::new();
        assert!(notifier.advance(&WatchKey::Global, 10));
        assert!(!notifier.advance(&WatchKey::Global, 7));
        assert_eq!(notifier.current(&WatchKey::Global), 10);
    }

    #[tokio::test]
    async fn test_shutdown_releases_and_rejects() {
        let notifier = ChangeNotifier::new();
        let before = notifier.subscribe(vec![(WatchKey::Global, 0)]);
        notifier.shutdown();
        let after = notifier.subscribe(vec![(WatchKey::Global, 0)]);

        assert_eq!(before.wait(None).await, WaitOutcome::Shutdown);
        assert_eq!(after.wait(None).await, WaitOutcome::Shutdown);
        assert!(notifier.is_shut_down());
    }

    #[test]
    fn test_watched_keys_include_waiters() {
        let notifier = ChangeNotifier::new();
        notifier.watch(WatchKey::channel("ABC"));
        let _sub = notifier.subscribe(vec![(WatchKey::channel("CBS"), 0)]);

        assert_eq!(
            notifier.watched_keys(),
            vec![
                WatchKey::Global,
                WatchKey::channel("ABC"),
                WatchKey::channel("CBS")
            ]
        );
    }

    #[test]
    fn test_poll_state_cycle() {
        let notifier = ChangeNotifier::new();
        let key = WatchKey::channel("ABC");
        assert!(notifier.begin_poll(&key));
        assert_eq!(notifier.state(&key), PollState::Polling);
        assert!(!notifier.begin_poll(&key));
        notifier.end_poll(&key);
        assert_eq!(notifier.state(&key), PollState::Idle);
    }
}
