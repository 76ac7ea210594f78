//! Background poll task
//!
//! Writes made by this process notify directly. Writes made by peer nodes
//! only become visible through the durable watermarks, so this task
//! re-reads them every poll interval and feeds advances into the
//! [`ChangeNotifier`]. Cross-node propagation is bounded by one interval.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use seqcache_core::CacheError;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, trace};

use crate::notifier::ChangeNotifier;
use crate::watermark::WatchKey;

/// Durable source of watermarks, shared by every node
#[async_trait]
pub trait WatermarkSource: Send + Sync {
    /// Highest sequence durably recorded for `key`, or `None` if never written
    async fn read_watermark(&self, key: &WatchKey) -> Result<Option<u64>, CacheError>;
}

/// Periodic re-read of watched watermarks
pub struct PollTask {
    notifier: Arc<ChangeNotifier>,
    source: Arc<dyn WatermarkSource>,
    /// Poll interval
    interval: Duration,
    /// Shutdown signal
    shutdown_rx: broadcast::Receiver<()>,
    /// Poll cycle counter
    cycle_count: u64,
}

impl PollTask {
    pub fn new(
        notifier: Arc<ChangeNotifier>,
        source: Arc<dyn WatermarkSource>,
        interval: Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            notifier,
            source,
            interval,
            shutdown_rx,
            cycle_count: 0,
        }
    }

    /// Spawn the poll task as a background task
    ///
    /// The task runs inside the caller's current span.
    pub fn spawn(
        notifier: Arc<ChangeNotifier>,
        source: Arc<dyn WatermarkSource>,
        interval: Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let task = Self::new(notifier, source, interval, shutdown_rx);

        tokio::spawn(
            async move {
                task.run().await;
            }
            .in_current_span(),
        )
    }

    /// Run the poll loop until shutdown
    async fn run(mut self) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "Poll task started"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let notifier_shutdown = self.notifier.shutdown_token();

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Poll task shutting down");
                    break;
                }
                _ = notifier_shutdown.cancelled() => {
                    info!("Notifier shut down, stopping poll task");
                    break;
                }
                _ = interval.tick() => {
                    self.cycle_count += 1;
                    let advanced = self.poll_once().await;
                    if advanced > 0 {
                        debug!(cycle = self.cycle_count, advanced, "Poll cycle observed new writes");
                    }
                }
            }
        }
    }

    /// Re-read every watched key once, returning how many advanced
    pub async fn poll_once(&self) -> usize {
        let mut advanced = 0;

        for key in self.notifier.watched_keys() {
            // Another poll of this key is already in flight
            if !self.notifier.begin_poll(&key) {
                continue;
            }

            match self.source.read_watermark(&key).await {
                Ok(Some(seq)) => {
                    self.notifier.end_poll(&key);
                    if self.notifier.advance(&key, seq) {
                        trace!(key = %key, seq, "Observed remote advance");
                        advanced += 1;
                    }
                }
                Ok(None) => self.notifier.end_poll(&key),
                Err(e) => {
                    self.notifier.end_poll(&key);
                    error!(key = %key, error = %e, "Failed to read watermark");
                }
            }
        }

        advanced
    }
}
