//! Core traits for seqcache
//!
//! ## Key Traits
//!
//! - [`KvStore`]: Shared key-value store offering per-key compare-and-swap

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageError;

/// A stored value together with its CAS version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: Bytes,
    pub cas: u64,
}

/// Outcome of a conditional write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write landed; carries the new version
    Stored(u64),
    /// The record changed (or appeared) since it was read
    Conflict,
}

impl CasOutcome {
    /// Whether the write landed
    pub fn is_stored(&self) -> bool {
        matches!(self, CasOutcome::Stored(_))
    }
}

/// Storage abstraction shared by every node of a deployment
///
/// Both cache blocks and raw entries live here. Implementations only need
/// per-key atomicity; no multi-key transactions are assumed.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value and its current version
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StorageError>;

    /// Conditionally write a value
    ///
    /// With `expected = None` the write only lands if the key is absent.
    /// With `expected = Some(cas)` it only lands if the stored version is
    /// still `cas`.
    async fn compare_and_swap(
        &self,
        key: &str,
        value: Bytes,
        expected: Option<u64>,
    ) -> Result<CasOutcome, StorageError>;

    /// Remove a key, returning whether it existed
    async fn remove(&self, key: &str) -> Result<bool, StorageError>;

    /// Whether a key exists
    async fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that the KvStore trait is object-safe
    fn _assert_object_safe(_: &dyn KvStore) {}

    #[test]
    fn test_cas_outcome() {
        assert!(CasOutcome::Stored(3).is_stored());
        assert!(!CasOutcome::Conflict.is_stored());
    }
}
