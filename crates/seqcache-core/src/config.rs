//! Cache configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Name of the broadcast channel every entry is also recorded in
pub const STAR_CHANNEL: &str = "*";

/// Operational settings for a cache instance
///
/// Every field has a default, so a TOML file only needs to name what it
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How often the poll task re-reads durable watermarks
    pub poll_interval_ms: u64,
    /// Sequences per cache block
    pub block_size: u64,
    /// Attempts at a block merge before surfacing a write conflict
    pub max_cas_attempts: u32,
    /// Backoff unit between CAS attempts (multiplied by the attempt number)
    pub cas_backoff_ms: u64,
    /// Also record every entry in the `*` channel
    pub star_channel: bool,
    /// Sequence the cache was initialized at; it is complete after this point
    pub initial_sequence: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            block_size: 10_000,
            max_cas_attempts: 5,
            cas_backoff_ms: 5,
            star_channel: false,
            initial_sequence: 0,
        }
    }
}

impl CacheConfig {
    /// Settings for deployments that need sub-100ms cross-node propagation
    pub fn low_latency() -> Self {
        Self {
            poll_interval_ms: 50,
            ..Default::default()
        }
    }

    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self, CacheError> {
        let config: Self = toml::from_str(s).map_err(|e| CacheError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CacheError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    /// Reject settings the cache cannot run with
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.block_size == 0 {
            return Err(CacheError::Config("block_size must be positive".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(CacheError::Config("poll_interval_ms must be positive".into()));
        }
        if self.max_cas_attempts == 0 {
            return Err(CacheError::Config("max_cas_attempts must be positive".into()));
        }
        Ok(())
    }

    /// Set the poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the block size
    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the CAS attempt bound
    pub fn with_max_cas_attempts(mut self, attempts: u32) -> Self {
        self.max_cas_attempts = attempts;
        self
    }

    /// Set the backoff unit between CAS attempts
    pub fn with_cas_backoff(mut self, backoff: Duration) -> Self {
        self.cas_backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Enable or disable the `*` channel
    pub fn with_star_channel(mut self, enabled: bool) -> Self {
        self.star_channel = enabled;
        self
    }

    /// Set the sequence the cache was initialized at
    pub fn with_initial_sequence(mut self, seq: u64) -> Self {
        self.initial_sequence = seq;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cas_backoff(&self) -> Duration {
        Duration::from_millis(self.cas_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.block_size, 10_000);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = CacheConfig::from_toml_str("poll_interval_ms = 50\nstar_channel = true\n").unwrap();
        assert_eq!(config.poll_interval_ms, 50);
        assert!(config.star_channel);
        assert_eq!(config.block_size, 10_000);
    }

    #[test]
    fn test_invalid_toml_values() {
        assert!(matches!(
            CacheConfig::from_toml_str("block_size = 0"),
            Err(CacheError::Config(_))
        ));
        assert!(CacheConfig::from_toml_str("block_size = \"big\"").is_err());
        assert!(CacheConfig::default().with_max_cas_attempts(0).validate().is_err());
    }

    #[test]
    fn test_low_latency_preset() {
        let config = CacheConfig::low_latency();
        assert!(config.poll_interval() < Duration::from_millis(100));
    }
}
