/// Adapter over the external ordered key-value engine.
///
/// The core needs three things from its backing store: point reads, whole-
/// record writes, and a full scan in ascending key order. Removal never
/// touches the engine's own delete machinery; a removed document is a
/// tombstone envelope written through the same `put`.
///
/// Not-found is a typed signal, not an error: the commit core and the read
/// path both map it to "absent".
use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use thiserror::Error;

/// Failures surfaced by a KV engine.
#[derive(Error, Debug)]
pub enum KvError {
    /// The key has no stored record.
    #[error("key not found")]
    NotFound,

    /// Any other backend failure.
    #[error("{0}")]
    Backend(String),
}

impl KvError {
    fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// The ordered byte-valued store the core runs on.
///
/// Implementations must return keys from `scan_all` in ascending order and
/// must write each record atomically: a concurrent reader sees the old
/// bytes or the new bytes, never a mix.
pub trait KvEngine: Send + Sync {
    /// Read the record stored under `key`, or `KvError::NotFound`.
    fn get(&self, key: &str) -> Result<Vec<u8>, KvError>;

    /// Store `value` under `key`, replacing any previous record.
    fn put(&self, key: &str, value: &[u8]) -> Result<(), KvError>;

    /// Every stored `(key, value)` pair in ascending key order.
    fn scan_all(&self) -> Result<Vec<(String, Vec<u8>)>, KvError>;
}

/// In-memory engine: a BTreeMap behind a lock. Zero setup, no durability.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKv {
    /// Create an empty in-memory engine.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvEngine for MemoryKv {
    fn get(&self, key: &str) -> Result<Vec<u8>, KvError> {
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or(KvError::NotFound)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn scan_all(&self) -> Result<Vec<(String, Vec<u8>)>, KvError> {
        Ok(self
            .entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

const DOCUMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");

/// Durable engine backed by a single-table redb database.
#[derive(Debug)]
pub struct RedbKv {
    db: Database,
}

impl RedbKv {
    /// Open (or create) a redb database at `path`.
    ///
    /// The documents table is created up front so reads on a fresh database
    /// see an empty table rather than a missing one.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
        let db = Database::create(path).map_err(KvError::backend)?;

        let init = db.begin_write().map_err(KvError::backend)?;
        init.open_table(DOCUMENTS).map_err(KvError::backend)?;
        init.commit().map_err(KvError::backend)?;

        Ok(Self { db })
    }
}

impl KvEngine for RedbKv {
    fn get(&self, key: &str) -> Result<Vec<u8>, KvError> {
        let txn = self.db.begin_read().map_err(KvError::backend)?;
        let table = txn.open_table(DOCUMENTS).map_err(KvError::backend)?;
        match table.get(key).map_err(KvError::backend)? {
            Some(guard) => Ok(guard.value().to_vec()),
            None => Err(KvError::NotFound),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        let txn = self.db.begin_write().map_err(KvError::backend)?;
        {
            let mut table = txn.open_table(DOCUMENTS).map_err(KvError::backend)?;
            table.insert(key, value).map_err(KvError::backend)?;
        }
        txn.commit().map_err(KvError::backend)
    }

    fn scan_all(&self) -> Result<Vec<(String, Vec<u8>)>, KvError> {
        let txn = self.db.begin_read().map_err(KvError::backend)?;
        let table = txn.open_table(DOCUMENTS).map_err(KvError::backend)?;

        let mut entries = Vec::new();
        for item in table.iter().map_err(KvError::backend)? {
            let (key, value) = item.map_err(KvError::backend)?;
            entries.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(entries)
    }
}
