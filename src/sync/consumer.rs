//! Action execution.
//!
//! The consumer re-derives the three hash positions for each queued path,
//! classifies them, and drives the resulting action: uploads (full or
//! delta with full-upload fallback), downloads, deletes on either side, and
//! conflict adoption. The file record's `last_synced_hash` moves only after
//! the server acknowledged the action or the local write completed.

use crate::hash::{hash_bytes, hash_file, signature_bytes, HashedFile};
use crate::ignore::INTERNAL_DIR;
use crate::metadata::{FileRecord, MetadataStore};
use crate::path::SyncPath;
use crate::perms::{is_permission_path, AccessLevel, PermissionTree};
use crate::protocol::{ContentPayload, DiffPayload, ManifestEntry};
use crate::sync::classify::{classify, SyncAction};
use crate::sync::client::SyncClient;
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::types::RemoteState;
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use fast_rsync::Signature;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Synced,
    Noop,
    Conflict,
}

/// Executes sync actions for individual paths.
pub struct Consumer {
    root: PathBuf,
    store: Arc<MetadataStore>,
    client: SyncClient,
    /// Minimum file size before a delta upload is attempted.
    delta_min_size: u64,
}

impl Consumer {
    pub fn new(
        root: impl Into<PathBuf>,
        store: Arc<MetadataStore>,
        client: SyncClient,
        delta_min_size: u64,
    ) -> Self {
        Consumer {
            root: root.into(),
            store,
            client,
            delta_min_size,
        }
    }

    /// Classify and act on one path.
    ///
    /// `remote` is the manifest snapshot from the producer pass; `perms` is
    /// the locally resolved permission tree used for early denial of
    /// outbound mutations. A denial never touches local content.
    pub async fn process(
        &self,
        path: &SyncPath,
        remote: &RemoteState,
        perms: &PermissionTree,
    ) -> SyncResult<Outcome> {
        let abs = path.to_local(&self.root);
        let local = current_local(&abs)?;
        let record = self.store.get(path)?;
        let h_sync = record.as_ref().and_then(|r| r.last_synced_hash.as_deref());
        let h_local = local.as_ref().map(|f| f.hash.as_str());
        let remote_entry = remote.get(path);
        let h_remote = remote_entry.map(|e| e.hash.as_str());

        let action = classify(h_sync, h_local, h_remote);
        debug!(%path, ?action, "classified");

        match action {
            SyncAction::Noop => {
                self.reconcile_noop(path, local.as_ref(), h_remote).await?;
                Ok(Outcome::Noop)
            }
            SyncAction::CreateRemote | SyncAction::ModifyRemote => {
                self.check_outbound(perms, path)?;
                let local = local.ok_or_else(|| {
                    SyncError::protocol(format!("{path}: local file vanished before upload"))
                })?;
                self.upload(path, &abs, &local, remote_entry).await?;
                Ok(Outcome::Synced)
            }
            SyncAction::CreateLocal | SyncAction::ModifyLocal => {
                self.download(path, &abs).await?;
                Ok(Outcome::Synced)
            }
            SyncAction::DeleteRemote => {
                self.check_outbound(perms, path)?;
                // On permission denial the record stays put; the path will
                // reclassify next cycle.
                self.client.delete(path).await?;
                self.store.delete(path)?;
                info!(%path, "remote delete acknowledged");
                Ok(Outcome::Synced)
            }
            SyncAction::DeleteLocal => {
                fs::remove_file(&abs)?;
                self.store.delete(path)?;
                info!(%path, "deleted locally");
                Ok(Outcome::Synced)
            }
            SyncAction::Conflict => {
                self.resolve_conflict(path, &abs, local.as_ref(), remote_entry)
                    .await?;
                Ok(Outcome::Conflict)
            }
        }
    }

    fn check_outbound(&self, perms: &PermissionTree, path: &SyncPath) -> SyncResult<()> {
        let level = if is_permission_path(path) {
            AccessLevel::Admin
        } else {
            AccessLevel::Write
        };
        if perms.check(self.client.user(), path, level) {
            Ok(())
        } else {
            Err(SyncError::denied(format!(
                "{}: {} not permitted for {}",
                path,
                match level {
                    AccessLevel::Admin => "admin",
                    _ => "write",
                },
                self.client.user()
            )))
        }
    }

    /// Upload local content, preferring a delta when the file is large
    /// enough and the server's signature is available. A stale-base
    /// rejection always falls back to a full upload.
    async fn upload(
        &self,
        path: &SyncPath,
        abs: &Path,
        local: &HashedFile,
        remote_entry: Option<&ManifestEntry>,
    ) -> SyncResult<()> {
        let content = fs::read(abs)?;
        let hash = hash_bytes(&content);

        if let Some(entry) = remote_entry {
            if content.len() as u64 >= self.delta_min_size {
                match self.try_delta(path, &content, &hash, entry).await {
                    Ok(true) => {
                        self.commit_record(path, local, &hash)?;
                        return Ok(());
                    }
                    Ok(false) => {}
                    Err(SyncError::StaleBase(msg)) => {
                        debug!(%path, %msg, "stale delta base, falling back to full upload");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let acked = self
            .client
            .upload(
                path,
                &ContentPayload {
                    content_b64: B64.encode(&content),
                    hash: hash.clone(),
                },
            )
            .await?;
        if acked != hash {
            return Err(SyncError::protocol(format!(
                "{path}: server acknowledged hash {acked}, expected {hash}"
            )));
        }
        self.commit_record(path, local, &hash)?;
        info!(%path, "upload acknowledged");
        Ok(())
    }

    /// Attempt a delta upload. Returns Ok(false) when the delta would not
    /// be smaller than the content, Err(StaleBase) when the server's base
    /// moved.
    async fn try_delta(
        &self,
        path: &SyncPath,
        content: &[u8],
        hash: &str,
        entry: &ManifestEntry,
    ) -> SyncResult<bool> {
        let sig_bytes = B64.decode(&entry.signature_b64)?;
        let signature = Signature::deserialize(sig_bytes)
            .map_err(|e| SyncError::protocol(format!("{path}: bad signature: {e}")))?;
        let mut delta = Vec::new();
        fast_rsync::diff(&signature.index(), content, &mut delta)
            .map_err(|e| SyncError::protocol(format!("{path}: delta failed: {e}")))?;
        if delta.len() >= content.len() {
            return Ok(false);
        }
        let acked = self
            .client
            .apply_diff(
                path,
                &DiffPayload {
                    base_hash: entry.hash.clone(),
                    delta_b64: B64.encode(&delta),
                    expected_hash: hash.to_string(),
                },
            )
            .await?;
        if acked != hash {
            return Err(SyncError::protocol(format!(
                "{path}: delta acknowledged hash {acked}, expected {hash}"
            )));
        }
        info!(%path, delta_len = delta.len(), "delta upload acknowledged");
        Ok(true)
    }

    /// Fetch remote content and adopt it locally.
    async fn download(&self, path: &SyncPath, abs: &Path) -> SyncResult<()> {
        let payload = self.client.download(path).await?;
        let content = B64.decode(&payload.content_b64)?;
        let hash = hash_bytes(&content);
        if hash != payload.hash {
            return Err(SyncError::protocol(format!(
                "{path}: downloaded content hashes to {hash}, server declared {}",
                payload.hash
            )));
        }
        atomic_write(abs, &content)?;
        let meta = fs::metadata(abs)?;
        self.store.put(&FileRecord {
            path: path.clone(),
            content_hash: hash.clone(),
            last_synced_hash: Some(hash),
            size: meta.len(),
            modified_at: crate::hash::modified_unix(&meta),
        })?;
        info!(%path, "download applied");
        Ok(())
    }

    /// Remote wins. The pre-conflict local version (when present) is moved
    /// into the recovery area before the remote state is adopted.
    async fn resolve_conflict(
        &self,
        path: &SyncPath,
        abs: &Path,
        local: Option<&HashedFile>,
        remote_entry: Option<&ManifestEntry>,
    ) -> SyncResult<()> {
        if local.is_some() {
            let recovery = self.recovery_path(path);
            if let Some(parent) = recovery.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(abs, &recovery)?;
            warn!(%path, recovery = %recovery.display(), "conflict: local version preserved");
        }
        match remote_entry {
            Some(_) => self.download(path, abs).await,
            None => {
                // remote deleted while local changed: adopt the deletion
                self.store.delete(path)?;
                warn!(%path, "conflict: adopted remote deletion");
                Ok(())
            }
        }
    }

    fn recovery_path(&self, path: &SyncPath) -> PathBuf {
        let mut out = self.root.join(INTERNAL_DIR).join("conflicts");
        for segment in path.as_str().split('/') {
            out.push(segment);
        }
        let name = path.file_name();
        let ts = crate::hash::now_unix();
        // a second conflict on the same path within one second must not
        // overwrite the earlier preserved copy
        let mut candidate = out.with_file_name(format!("{name}.{ts}"));
        let mut n = 1;
        while candidate.exists() {
            candidate = out.with_file_name(format!("{name}.{ts}.{n}"));
            n += 1;
        }
        candidate
    }

    /// Bookkeeping for paths classify() called converged: clear records for
    /// doubly-deleted files and seed `last_synced_hash` when both sides
    /// independently hold the same content.
    async fn reconcile_noop(
        &self,
        path: &SyncPath,
        local: Option<&HashedFile>,
        h_remote: Option<&str>,
    ) -> SyncResult<()> {
        match (local, h_remote) {
            (None, None) => {
                self.store.delete(path)?;
            }
            (Some(file), Some(remote_hash)) if file.hash == remote_hash => {
                let needs_seed = match self.store.get(path)? {
                    Some(record) => record.last_synced_hash.as_deref() != Some(file.hash.as_str()),
                    None => true,
                };
                if needs_seed {
                    self.commit_record(path, file, &file.hash)?;
                    debug!(%path, "seeded record for converged path");
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn commit_record(&self, path: &SyncPath, local: &HashedFile, synced_hash: &str) -> SyncResult<()> {
        self.store.put(&FileRecord {
            path: path.clone(),
            content_hash: local.hash.clone(),
            last_synced_hash: Some(synced_hash.to_string()),
            size: local.size,
            modified_at: local.modified_at,
        })?;
        Ok(())
    }
}

fn current_local(abs: &Path) -> SyncResult<Option<HashedFile>> {
    match hash_file(abs) {
        Ok(hashed) => Ok(Some(hashed)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write via temp file + rename so readers never observe partial content.
pub fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let tmp = parent.join(format!(
        ".tmp-{}",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_string())
    ));
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Build a signature payload suitable for a manifest entry.
pub fn manifest_signature(content: &[u8]) -> String {
    B64.encode(signature_bytes(content))
}
