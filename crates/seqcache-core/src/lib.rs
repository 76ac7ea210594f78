//! # Seqcache Core
//!
//! Core traits, types, and errors for the seqcache channel change cache.
//!
//! This crate provides the foundational abstractions shared by the storage
//! engine, the poll/notify layer and the cache coordinator, so that the same
//! cache logic runs over an in-memory store in tests and a durable store in
//! production.
//!
//! ## Key Traits
//!
//! - [`KvStore`]: Shared key-value store with per-key compare-and-swap
//!
//! ## Key Types
//!
//! - [`LogEntry`]: One immutable write, positioned by its sequence number
//! - [`SequenceId`]: Opaque feed cursor
//! - [`ChangeEntry`]: One element of a changes feed
//! - [`ChangesOptions`]: Parameters of a changes request
//! - [`CacheConfig`]: Operational tuning knobs

pub mod changes;
pub mod config;
pub mod entry;
pub mod error;
pub mod keys;
pub mod sequence;
pub mod traits;

// Re-export main types
pub use changes::*;
pub use config::*;
pub use entry::*;
pub use error::*;
pub use sequence::*;
pub use traits::*;
