//! Durable key-value store backed by redb
//!
//! Each record is stored as an 8-byte big-endian version followed by the
//! payload. Versions come from a counter kept in the same database and
//! bumped inside the same write transaction, so a removed-then-recreated key
//! never reuses a version.

use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use redb::{Database, ReadableTable, TableDefinition};
use seqcache_core::{CasOutcome, KvStore, StorageError, Versioned};
use tracing::{debug, info, instrument};

// Key: store key, Value: version (u64 BE) ++ payload
const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

// Key: counter name, Value: next value
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_CAS: &str = "next_cas";

/// Configuration for the redb store
#[derive(Debug, Clone)]
pub struct RedbKvStoreConfig {
    /// Path to the database file
    pub db_path: PathBuf,
}

impl Default for RedbKvStoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/seqcache.redb"),
        }
    }
}

/// Durable implementation of [`KvStore`]
///
/// redb serializes write transactions, which makes every compare-and-swap
/// atomic with respect to every other write.
#[derive(Clone)]
pub struct RedbKvStore {
    db: Arc<Database>,
}

fn db_err(err: impl Display) -> StorageError {
    StorageError::database(err.to_string())
}

fn encode_record(cas: u64, value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + value.len());
    buf.extend_from_slice(&cas.to_be_bytes());
    buf.extend_from_slice(value);
    buf
}

fn decode_record(raw: &[u8]) -> Result<Versioned, StorageError> {
    let (version, payload) = raw
        .split_first_chunk::<8>()
        .ok_or_else(|| StorageError::Deserialization("truncated record".into()))?;
    Ok(Versioned {
        value: Bytes::copy_from_slice(payload),
        cas: u64::from_be_bytes(*version),
    })
}

impl RedbKvStore {
    /// Open or create the database
    #[instrument(skip(config), fields(path = %config.db_path.display()))]
    pub fn open(config: RedbKvStoreConfig) -> Result<Self, StorageError> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(&config.db_path).map_err(db_err)?;
        info!("Opened redb database");

        let store = Self { db: Arc::new(db) };
        store.init_tables()?;
        Ok(store)
    }

    fn init_tables(&self) -> Result<(), StorageError> {
        let write_txn = self.db.begin_write().map_err(db_err)?;
        write_txn.open_table(RECORDS).map_err(db_err)?;
        {
            let mut meta = write_txn.open_table(META).map_err(db_err)?;
            let next = meta.get(NEXT_CAS).map_err(db_err)?.map(|g| g.value());
            if next.is_none() {
                meta.insert(NEXT_CAS, 1).map_err(db_err)?;
            }
        }
        write_txn.commit().map_err(db_err)?;

        debug!("Initialized redb tables");
        Ok(())
    }

    fn get_blocking(db: &Database, key: &str) -> Result<Option<Versioned>, StorageError> {
        let read_txn = db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(RECORDS).map_err(db_err)?;
        match table.get(key).map_err(db_err)? {
            Some(raw) => decode_record(raw.value()).map(Some),
            None => Ok(None),
        }
    }

    fn cas_blocking(
        db: &Database,
        key: &str,
        value: &[u8],
        expected: Option<u64>,
    ) -> Result<CasOutcome, StorageError> {
        let write_txn = db.begin_write().map_err(db_err)?;
        let outcome = {
            let mut records = write_txn.open_table(RECORDS).map_err(db_err)?;
            let current = match records.get(key).map_err(db_err)? {
                Some(raw) => Some(decode_record(raw.value())?.cas),
                None => None,
            };

            if current != expected {
                CasOutcome::Conflict
            } else {
                let mut meta = write_txn.open_table(META).map_err(db_err)?;
                let cas = meta.get(NEXT_CAS).map_err(db_err)?.map_or(1, |g| g.value());
                meta.insert(NEXT_CAS, cas + 1).map_err(db_err)?;
                records
                    .insert(key, encode_record(cas, value).as_slice())
                    .map_err(db_err)?;
                CasOutcome::Stored(cas)
            }
        };

        if outcome.is_stored() {
            write_txn.commit().map_err(db_err)?;
        } else {
            write_txn.abort().map_err(db_err)?;
        }
        Ok(outcome)
    }

    fn remove_blocking(db: &Database, key: &str) -> Result<bool, StorageError> {
        let write_txn = db.begin_write().map_err(db_err)?;
        let existed = {
            let mut records = write_txn.open_table(RECORDS).map_err(db_err)?;
            records.remove(key).map_err(db_err)?.is_some()
        };
        write_txn.commit().map_err(db_err)?;
        Ok(existed)
    }

    async fn run_blocking<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| StorageError::io(e.to_string()))?
    }
}

#[async_trait]
impl KvStore for RedbKvStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StorageError> {
        let key = key.to_string();
        self.run_blocking(move |db| Self::get_blocking(db, &key))
            .await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        value: Bytes,
        expected: Option<u64>,
    ) -> Result<CasOutcome, StorageError> {
        let key = key.to_string();
        self.run_blocking(move |db| Self::cas_blocking(db, &key, &value, expected))
            .await
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let key = key.to_string();
        self.run_blocking(move |db| Self::remove_blocking(db, &key))
            .await
    }
}
