//! # Seqcache Notify
//!
//! Poll/notify layer of the seqcache channel change cache.
//!
//! Readers that need data which has not arrived yet register a
//! [`Subscription`] on one or more [`WatchKey`]s and suspend until a
//! watermark moves past what they have seen. Local writes advance the
//! [`ChangeNotifier`] directly; a [`PollTask`] re-reads durable watermarks
//! from a [`WatermarkSource`] so that writes made by peer nodes wake local
//! readers within one poll interval.
//!
//! ## Example
//!
//! ```rust,ignore
//! use seqcache_notify::{ChangeNotifier, WaitOutcome, WatchKey};
//!
//! let notifier = ChangeNotifier::new();
//! let sub = notifier.subscribe(vec![(WatchKey::channel("ABC"), 0)]);
//! notifier.advance(&WatchKey::channel("ABC"), 1);
//! assert!(matches!(sub.wait(None).await, WaitOutcome::Notified { seq: 1, .. }));
//! ```

pub mod notifier;
pub mod poller;
pub mod registry;
pub mod watermark;

pub use notifier::ChangeNotifier;
pub use poller::{PollTask, WatermarkSource};
pub use registry::{Subscription, WaitOutcome, WaiterRegistry, WakeReason};
pub use watermark::{PollState, WatchKey, Watermark};
