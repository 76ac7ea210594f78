//! postcard encoding of stored records

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use seqcache_core::StorageError;

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Bytes, StorageError> {
    postcard::to_allocvec(value)
        .map(Bytes::from)
        .map_err(|e| StorageError::Serialization(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    postcard::from_bytes(bytes).map_err(|e| StorageError::Deserialization(e.to_string()))
}
