//! Authoritative file store.
//!
//! The server keeps every datasite's content under a snapshot directory and
//! its metadata (hash, size, mtime, delta signature) in a redb table.
//! Mutations to one path are serialized by a per-path async lock and made
//! visible atomically (temp file + rename, metadata committed after the
//! content): a concurrent reader sees either the old content+hash or the
//! new, never a mix.

use crate::config::ServerConfig;
use crate::hash::{hash_bytes, modified_unix, now_unix};
use crate::path::SyncPath;
use crate::protocol::ManifestEntry;
use crate::server::error::ApiError;
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const FILES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("files");

/// Stored metadata for one path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRecord {
    pub hash: String,
    pub size: u64,
    pub modified_at: u64,
    /// Base64 `fast_rsync` signature of the stored content.
    pub signature_b64: String,
}

impl ServerRecord {
    pub fn to_manifest_entry(&self, path: &SyncPath) -> ManifestEntry {
        ManifestEntry {
            path: path.clone(),
            hash: self.hash.clone(),
            size: self.size,
            signature_b64: self.signature_b64.clone(),
        }
    }
}

/// Snapshot directory + metadata table + per-path locks.
pub struct FileStore {
    root: PathBuf,
    db: Database,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileStore {
    /// Open the store, creating the snapshot directory if needed and
    /// reindexing any content that changed out of band.
    pub fn open(config: &ServerConfig) -> Result<Self, ApiError> {
        fs::create_dir_all(&config.snapshot_root)?;
        let db = Database::create(config.metadata_db_path())
            .map_err(|e| ApiError::Storage(e.to_string()))?;
        let store = FileStore {
            root: config.snapshot_root.clone(),
            db,
            locks: Mutex::new(HashMap::new()),
        };
        store.with_write_table(|_| Ok(()))?; // ensure table exists
        store.reindex()?;
        Ok(store)
    }

    fn lock_for(&self, path: &SyncPath) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock map poisoned");
        locks
            .entry(path.as_str().to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn abs(&self, path: &SyncPath) -> PathBuf {
        path.to_local(&self.root)
    }

    /// Point-in-time permission view of the snapshot. Rules are re-read per
    /// check; there is no cache to invalidate.
    pub fn permission_tree(&self) -> crate::perms::PermissionTree {
        crate::perms::PermissionTree::load(&self.root)
    }

    fn with_write_table<T>(
        &self,
        f: impl FnOnce(&mut redb::Table<&str, &str>) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| ApiError::Storage(e.to_string()))?;
        let out = {
            let mut table = txn
                .open_table(FILES_TABLE)
                .map_err(|e| ApiError::Storage(e.to_string()))?;
            f(&mut table)?
        };
        txn.commit().map_err(|e| ApiError::Storage(e.to_string()))?;
        Ok(out)
    }

    fn get_record(&self, path: &SyncPath) -> Result<Option<ServerRecord>, ApiError> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| ApiError::Storage(e.to_string()))?;
        let table = txn
            .open_table(FILES_TABLE)
            .map_err(|e| ApiError::Storage(e.to_string()))?;
        match table
            .get(path.as_str())
            .map_err(|e| ApiError::Storage(e.to_string()))?
        {
            Some(guard) => Ok(Some(
                serde_json::from_str(guard.value())
                    .map_err(|e| ApiError::Storage(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    fn put_record(&self, path: &SyncPath, record: &ServerRecord) -> Result<(), ApiError> {
        let json = serde_json::to_string(record).map_err(|e| ApiError::Storage(e.to_string()))?;
        self.with_write_table(|table| {
            table
                .insert(path.as_str(), json.as_str())
                .map_err(|e| ApiError::Storage(e.to_string()))?;
            Ok(())
        })
    }

    fn remove_record(&self, path: &SyncPath) -> Result<(), ApiError> {
        self.with_write_table(|table| {
            table
                .remove(path.as_str())
                .map_err(|e| ApiError::Storage(e.to_string()))?;
            Ok(())
        })
    }

    /// All records under `scope`, path-sorted.
    pub fn list(&self, scope: &SyncPath) -> Result<Vec<(SyncPath, ServerRecord)>, ApiError> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| ApiError::Storage(e.to_string()))?;
        let table = txn
            .open_table(FILES_TABLE)
            .map_err(|e| ApiError::Storage(e.to_string()))?;
        let prefix = scope.as_str().to_string();
        let child_prefix = format!("{prefix}/");
        let mut out = Vec::new();
        for entry in table
            .range(prefix.as_str()..)
            .map_err(|e| ApiError::Storage(e.to_string()))?
        {
            let (key, value) = entry.map_err(|e| ApiError::Storage(e.to_string()))?;
            let key = key.value();
            if key != prefix && !key.starts_with(&child_prefix) {
                if !key.starts_with(&prefix) {
                    break;
                }
                continue;
            }
            let path = SyncPath::parse(key).map_err(|e| ApiError::Storage(e.to_string()))?;
            let record: ServerRecord = serde_json::from_str(value.value())
                .map_err(|e| ApiError::Storage(e.to_string()))?;
            out.push((path, record));
        }
        Ok(out)
    }

    /// Datasite directories currently present in the snapshot.
    pub fn datasites(&self) -> Result<Vec<String>, ApiError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)?.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() && name.contains('@') {
                out.push(name);
            }
        }
        out.sort();
        Ok(out)
    }

    /// Read content and metadata for one path. Holds the per-path lock so
    /// a concurrent write cannot land between fetching the record and
    /// reading the content.
    pub async fn read(&self, path: &SyncPath) -> Result<(Vec<u8>, ServerRecord), ApiError> {
        let lock = self.lock_for(path);
        let _guard = lock.lock().await;

        let record = self
            .get_record(path)?
            .ok_or_else(|| ApiError::NotFound(path.to_string()))?;
        let content = fs::read(self.abs(path))?;
        Ok((content, record))
    }

    /// Create or replace one file. `declared_hash` must match the content.
    pub async fn put(
        &self,
        path: &SyncPath,
        content: &[u8],
        declared_hash: &str,
    ) -> Result<ServerRecord, ApiError> {
        let hash = hash_bytes(content);
        if hash != declared_hash {
            return Err(ApiError::BadRequest(format!(
                "{path}: content hashes to {hash}, request declared {declared_hash}"
            )));
        }
        let lock = self.lock_for(path);
        let _guard = lock.lock().await;
        self.persist(path, content, hash)
    }

    /// Apply a delta against the stored content. Rejects with
    /// [`ApiError::StaleBase`] when the stored hash is not `base_hash`.
    pub async fn apply_diff(
        &self,
        path: &SyncPath,
        base_hash: &str,
        delta: &[u8],
        expected_hash: &str,
    ) -> Result<ServerRecord, ApiError> {
        let lock = self.lock_for(path);
        let _guard = lock.lock().await;

        let record = self
            .get_record(path)?
            .ok_or_else(|| ApiError::NotFound(path.to_string()))?;
        if record.hash != base_hash {
            return Err(ApiError::StaleBase(format!(
                "{path}: stored hash is {}, delta base is {base_hash}",
                record.hash
            )));
        }
        let base = fs::read(self.abs(path))?;
        let mut rebuilt = Vec::new();
        fast_rsync::apply(&base, delta, &mut rebuilt)
            .map_err(|e| ApiError::BadRequest(format!("{path}: delta apply failed: {e}")))?;
        let hash = hash_bytes(&rebuilt);
        if hash != expected_hash {
            return Err(ApiError::BadRequest(format!(
                "{path}: delta result hashes to {hash}, request declared {expected_hash}"
            )));
        }
        self.persist(path, &rebuilt, hash)
    }

    /// Delete one file and its record.
    pub async fn delete(&self, path: &SyncPath) -> Result<(), ApiError> {
        let lock = self.lock_for(path);
        let _guard = lock.lock().await;

        if self.get_record(path)?.is_none() {
            return Err(ApiError::NotFound(path.to_string()));
        }
        let abs = self.abs(path);
        match fs::remove_file(&abs) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.remove_record(path)?;
        info!(%path, "deleted");
        Ok(())
    }

    /// Caller must hold the per-path lock.
    fn persist(&self, path: &SyncPath, content: &[u8], hash: String) -> Result<ServerRecord, ApiError> {
        let abs = self.abs(path);
        crate::sync::consumer::atomic_write(&abs, content)?;
        let record = ServerRecord {
            hash,
            size: content.len() as u64,
            modified_at: fs::metadata(&abs)
                .map(|m| modified_unix(&m))
                .unwrap_or_else(|_| now_unix()),
            signature_b64: B64.encode(crate::hash::signature_bytes(content)),
        };
        self.put_record(path, &record)?;
        debug!(%path, hash = %record.hash, "persisted");
        Ok(record)
    }

    /// Reconcile the metadata table with what is actually on disk, so
    /// out-of-band edits to the snapshot directory are picked up at start.
    fn reindex(&self) -> Result<(), ApiError> {
        let mut seen = Vec::new();
        let root = self.root.clone();
        self.index_dir(&root, &mut seen)?;

        // drop records whose file is gone
        let everything: Vec<String> = {
            let txn = self
                .db
                .begin_read()
                .map_err(|e| ApiError::Storage(e.to_string()))?;
            let table = txn
                .open_table(FILES_TABLE)
                .map_err(|e| ApiError::Storage(e.to_string()))?;
            let mut keys = Vec::new();
            for entry in table
                .iter()
                .map_err(|e| ApiError::Storage(e.to_string()))?
            {
                let (key, _) = entry.map_err(|e| ApiError::Storage(e.to_string()))?;
                keys.push(key.value().to_string());
            }
            keys
        };
        for key in everything {
            if !seen.iter().any(|s| s == &key) {
                if let Ok(path) = SyncPath::parse(&key) {
                    warn!(%path, "file missing from snapshot, dropping record");
                    self.remove_record(&path)?;
                }
            }
        }
        Ok(())
    }

    fn index_dir(&self, dir: &Path, seen: &mut Vec<String>) -> Result<(), ApiError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if path.is_dir() {
                self.index_dir(&path, seen)?;
                continue;
            }
            let logical = match SyncPath::from_local(&self.root, &path) {
                Ok(logical) => logical,
                Err(_) => continue,
            };
            seen.push(logical.as_str().to_string());
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            let fresh = match self.get_record(&logical)? {
                Some(record) => {
                    record.size == meta.len() && record.modified_at == modified_unix(&meta)
                }
                None => false,
            };
            if !fresh {
                let content = fs::read(&path)?;
                let hash = hash_bytes(&content);
                self.persist(&logical, &content, hash)?;
            }
        }
        Ok(())
    }
}
