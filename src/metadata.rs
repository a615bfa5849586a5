//! Client-side metadata store.
//!
//! A redb table mapping logical path -> [`FileRecord`], serialized as JSON.
//! The record remembers the hash the server last acknowledged
//! (`last_synced_hash`) plus advisory size/mtime used to skip rehashing
//! untouched files. Correctness never depends on the fast path: a cold or
//! deleted store just means everything is rehashed and reclassified.

use crate::path::SyncPath;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

const RECORDS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("file_records");

/// Tracked state of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: SyncPath,
    /// Hash of current local content as of the last producer scan.
    pub content_hash: String,
    /// Hash the server last acknowledged for this path. Absent until the
    /// first successful sync; only updated after an acknowledged action.
    pub last_synced_hash: Option<String>,
    pub size: u64,
    pub modified_at: u64,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("record serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<redb::DatabaseError> for StoreError {
    fn from(e: redb::DatabaseError) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(e: redb::TableError) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(e: redb::StorageError) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(e: redb::CommitError) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Durable path -> [`FileRecord`] mapping.
pub struct MetadataStore {
    db: Database,
}

impl MetadataStore {
    /// Create or open the store at `path`, ensuring the table exists.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }
        let db = Database::create(path)?;
        let txn = db.begin_write()?;
        txn.open_table(RECORDS_TABLE)?;
        txn.commit()?;
        Ok(MetadataStore { db })
    }

    pub fn get(&self, path: &SyncPath) -> Result<Option<FileRecord>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(RECORDS_TABLE)?;
        match table.get(path.as_str())? {
            Some(guard) => Ok(Some(serde_json::from_str(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, record: &FileRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(RECORDS_TABLE)?;
            table.insert(record.path.as_str(), json.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn delete(&self, path: &SyncPath) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(RECORDS_TABLE)?;
            table.remove(path.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// All records whose path lies inside `scope`.
    pub fn scan(&self, scope: &SyncPath) -> Result<Vec<FileRecord>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(RECORDS_TABLE)?;
        let prefix = scope.as_str().to_string();
        let mut out = Vec::new();
        for entry in table.range(prefix.as_str()..)? {
            let (key, value) = entry?;
            let key = key.value();
            if key != prefix && !key.starts_with(&format!("{prefix}/")) {
                if !key.starts_with(&prefix) {
                    break;
                }
                continue;
            }
            out.push(serde_json::from_str(value.value())?);
        }
        Ok(out)
    }

    /// Whether any record exists inside `scope` (drives bootstrap).
    pub fn is_empty_scope(&self, scope: &SyncPath) -> Result<bool, StoreError> {
        Ok(self.scan(scope)?.is_empty())
    }
}
