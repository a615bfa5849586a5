//! Cold-start batch bootstrap.
//!
//! When the metadata store has no entries for a scope, one `batch` call
//! fetches the scope's full readable content instead of O(files) download
//! round-trips. Applying a batch leaves exactly the state the incremental
//! path would converge to: files on disk plus records with
//! `last_synced_hash = content_hash`.

use crate::hash::{hash_bytes, modified_unix};
use crate::metadata::{FileRecord, MetadataStore};
use crate::path::SyncPath;
use crate::sync::client::SyncClient;
use crate::sync::consumer::atomic_write;
use crate::sync::error::{SyncError, SyncResult};
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Whether `scope` should bootstrap instead of running the normal cycle.
pub fn needs_bootstrap(store: &MetadataStore, scope: &SyncPath) -> SyncResult<bool> {
    Ok(store.is_empty_scope(scope)?)
}

/// Fetch and apply one batch for `scope`. Returns the number of files
/// written. Individual bad entries are skipped with a warning; they will be
/// picked up by the next incremental cycle.
pub async fn bootstrap_scope(
    root: &Path,
    store: &Arc<MetadataStore>,
    client: &SyncClient,
    scope: &SyncPath,
) -> SyncResult<usize> {
    let batch = client.batch(scope).await?;
    let mut applied = 0;
    for entry in batch.entries {
        if !entry.path.in_scope(scope) {
            warn!(path = %entry.path, scope = %scope, "batch entry outside scope, skipping");
            continue;
        }
        match apply_entry(root, store, &entry.path, &entry.content_b64, &entry.hash) {
            Ok(()) => applied += 1,
            Err(e) => {
                warn!(path = %entry.path, error = %e, "failed to apply batch entry");
            }
        }
    }
    info!(scope = %scope, applied, "bootstrap complete");
    Ok(applied)
}

fn apply_entry(
    root: &Path,
    store: &Arc<MetadataStore>,
    path: &SyncPath,
    content_b64: &str,
    declared_hash: &str,
) -> SyncResult<()> {
    let content = B64.decode(content_b64)?;
    let hash = hash_bytes(&content);
    if hash != declared_hash {
        return Err(SyncError::protocol(format!(
            "{path}: batch content hashes to {hash}, server declared {declared_hash}"
        )));
    }
    let abs = path.to_local(root);
    // A pre-existing local file that differs must go through the normal
    // classification (and its conflict handling), never a blind overwrite.
    if let Ok(existing) = fs::read(&abs) {
        if hash_bytes(&existing) != hash {
            warn!(path = %path, "local file differs, leaving to incremental sync");
            return Ok(());
        }
    }
    atomic_write(&abs, &content)?;
    let meta = fs::metadata(&abs)?;
    store.put(&FileRecord {
        path: path.clone(),
        content_hash: hash.clone(),
        last_synced_hash: Some(hash),
        size: meta.len(),
        modified_at: modified_unix(&meta),
    })?;
    Ok(())
}
