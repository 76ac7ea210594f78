//! Error types for seqcache

use thiserror::Error;

/// Errors raised by a key-value store backend
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// An immutable record already exists with different content
    #[error("Conflicting record at {0}")]
    Conflict(String),
}

impl StorageError {
    /// Create a new I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Create a new Database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<postcard::Error> for StorageError {
    fn from(err: postcard::Error) -> Self {
        StorageError::Deserialization(err.to_string())
    }
}

/// Top-level error type for cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// CAS retries on a block merge were exhausted
    #[error("Write conflict on {key} after {attempts} attempts")]
    WriteConflict { key: String, attempts: u32 },

    #[error("Wait cancelled")]
    Cancelled,

    #[error("Cache shut down")]
    Shutdown,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Whether the caller may retry the same operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::WriteConflict { .. })
    }
}

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Io("disk full".to_string());
        assert!(format!("{}", err).contains("disk full"));

        let err = StorageError::Conflict("cache:seq:7".to_string());
        assert!(format!("{}", err).contains("cache:seq:7"));
    }

    #[test]
    fn test_write_conflict_is_retryable() {
        let err = CacheError::WriteConflict {
            key: "cache:block:ABC:0".to_string(),
            attempts: 5,
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("5 attempts"));

        assert!(!CacheError::Cancelled.is_retryable());
        assert!(!CacheError::Storage(StorageError::io("gone")).is_retryable());
    }

    #[test]
    fn test_storage_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let storage_err: StorageError = io_err.into();
        let cache_err: CacheError = storage_err.into();
        assert!(matches!(cache_err, CacheError::Storage(StorageError::Io(_))));
    }
}
