//! Durable key/value storage.
//!
//! [`KeyValueStore`] is the only persistence capability the ride state needs.
//! `SqliteStore` is the on-disk backend; `MemoryStore` backs tests and can be
//! told to reject writes.

use crate::storage::schema::{
    CURRENT_VERSION, DELETE_VALUE, SCHEMA, SCHEMA_VERSION_TABLE, SELECT_VALUE, UPSERT_VALUE,
};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// One write in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    Put(String, String),
    Remove(String),
}

impl KvOp {
    pub fn put(key: &str, value: impl Into<String>) -> Self {
        KvOp::Put(key.to_string(), value.into())
    }

    pub fn remove(key: &str) -> Self {
        KvOp::Remove(key.to_string())
    }
}

/// Durable string key/value storage.
pub trait KeyValueStore: Send {
    /// Read one value.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Apply a batch of writes atomically.
    fn apply(&mut self, ops: &[KvOp]) -> Result<(), StoreError>;
}

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::IoError(e.to_string()))?;
        }

        let conn =
            Connection::open(path).map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let store = Self { conn };
        store.initialize()?;

        tracing::debug!("Opened ride state store at {}", path.display());
        Ok(store)
    }

    /// Open an in-memory store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let store = Self { conn };
        store.initialize()?;

        Ok(store)
    }

    fn initialize(&self) -> Result<(), StoreError> {
        self.conn
            .execute_batch(SCHEMA_VERSION_TABLE)
            .map_err(|e| StoreError::MigrationFailed(e.to_string()))?;

        let current_version = self.get_schema_version()?;

        if current_version < CURRENT_VERSION {
            self.migrate(current_version)?;
        }

        Ok(())
    }

    fn get_schema_version(&self) -> Result<i32, StoreError> {
        let result: SqliteResult<i32> = self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        );

        match result {
            Ok(version) => Ok(version),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(StoreError::QueryFailed(e.to_string())),
        }
    }

    fn migrate(&self, from_version: i32) -> Result<(), StoreError> {
        if from_version < 1 {
            self.conn
                .execute_batch(SCHEMA)
                .map_err(|e| StoreError::MigrationFailed(e.to_string()))?;

            self.conn
                .execute(
                    "INSERT INTO schema_version (version, applied_at) VALUES (?, datetime('now'))",
                    [CURRENT_VERSION],
                )
                .map_err(|e| StoreError::MigrationFailed(e.to_string()))?;

            tracing::info!("Ride state store migrated to version {}", CURRENT_VERSION);
        }

        Ok(())
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.conn
            .query_row(SELECT_VALUE, params![key], |row| row.get(0))
            .optional()
            .map_err(|e| StoreError::QueryFailed(e.to_string()))
    }

    fn apply(&mut self, ops: &[KvOp]) -> Result<(), StoreError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;

        for op in ops {
            let result = match op {
                KvOp::Put(key, value) => tx.execute(UPSERT_VALUE, params![key, value]),
                KvOp::Remove(key) => tx.execute(DELETE_VALUE, params![key]),
            };
            result.map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        }

        tx.commit()
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: HashMap<String, String>,
    reject_writes: bool,
    failed_writes: usize,
}

/// In-memory store. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following write fail until turned off again.
    pub fn set_reject_writes(&self, reject: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.reject_writes = reject;
        }
    }

    /// Number of writes rejected so far.
    pub fn failed_writes(&self) -> usize {
        self.inner.lock().map(|inner| inner.failed_writes).unwrap_or(0)
    }

    /// Copy of the current contents.
    pub fn entries(&self) -> HashMap<String, String> {
        self.inner
            .lock()
            .map(|inner| inner.entries.clone())
            .unwrap_or_default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.entries.get(key).cloned())
    }

    fn apply(&mut self, ops: &[KvOp]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;

        if inner.reject_writes {
            inner.failed_writes += 1;
            return Err(StoreError::WriteRejected("store is read-only".to_string()));
        }

        for op in ops {
            match op {
                KvOp::Put(key, value) => {
                    inner.entries.insert(key.clone(), value.clone());
                }
                KvOp::Remove(key) => {
                    inner.entries.remove(key);
                }
            }
        }
        Ok(())
    }
}

/// Key/value persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to open store: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Write rejected: {0}")]
    WriteRejected(String),

    #[error("Store lock poisoned")]
    Poisoned,
}
