//! Change detection.
//!
//! The producer diffs three sources for a scope: the local filesystem
//! (walk + hash, with a size/mtime fast path against the metadata store),
//! the store's last-synced records, and the server's hash manifest. It
//! emits one deduplicated [`ChangeDescriptor`] per differing path and never
//! mutates records or file content; acting on the differences is the
//! consumer's job.

use crate::hash::{hash_file, modified_unix, HashedFile};
use crate::ignore;
use crate::metadata::MetadataStore;
use crate::path::SyncPath;
use crate::perms::is_permission_path;
use crate::sync::client::SyncClient;
use crate::sync::error::SyncResult;
use crate::sync::types::{ChangeDescriptor, ChangeKind, ChangeLocation, RemoteState};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything one producer pass learned about a scope.
#[derive(Debug, Default)]
pub struct ProducerPass {
    /// Differences to act on. Permission marker files sort first so new
    /// grants land before the content they unlock.
    pub changes: Vec<ChangeDescriptor>,
    /// Local hashes at scan time.
    pub local: BTreeMap<SyncPath, HashedFile>,
    /// Remote manifest at scan time.
    pub remote: RemoteState,
    /// Local files skipped for exceeding the size limit.
    pub ignored: Vec<SyncPath>,
}

/// Detects out-of-sync paths for the consumer.
pub struct Producer {
    root: std::path::PathBuf,
    store: Arc<MetadataStore>,
    client: SyncClient,
}

impl Producer {
    pub fn new(root: impl Into<std::path::PathBuf>, store: Arc<MetadataStore>, client: SyncClient) -> Self {
        Producer {
            root: root.into(),
            store,
            client,
        }
    }

    /// Scopes to sync this cycle: every datasite the server lists plus every
    /// local datasite directory, always including our own.
    pub async fn scopes(&self) -> SyncResult<Vec<SyncPath>> {
        let mut names: HashSet<String> = HashSet::new();
        match self.client.list_datasites().await {
            Ok(remote) => names.extend(remote),
            Err(e) => {
                warn!(error = %e, "could not list remote datasites, syncing local ones only");
            }
        }
        if let Ok(entries) = fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if entry.path().is_dir() && name.contains('@') && !ignore::ignore_dir(&name) {
                    names.insert(name);
                }
            }
        }
        names.insert(self.client.user().to_string());

        let mut scopes: Vec<SyncPath> = names
            .into_iter()
            .filter_map(|n| SyncPath::parse(&n).ok())
            .collect();
        scopes.sort();
        Ok(scopes)
    }

    /// One detection pass over `scope`.
    pub async fn scan_scope(&self, scope: &SyncPath) -> SyncResult<ProducerPass> {
        let (local, ignored) = self.local_snapshot(scope)?;
        let remote: RemoteState = self
            .client
            .manifest(scope)
            .await?
            .into_iter()
            .map(|entry| (entry.path.clone(), entry))
            .collect();

        let mut paths: HashSet<SyncPath> = HashSet::new();
        paths.extend(local.keys().cloned());
        paths.extend(remote.keys().cloned());
        for record in self.store.scan(scope)? {
            paths.insert(record.path);
        }

        let mut changes = Vec::new();
        for path in paths {
            let record = self.store.get(&path)?;
            let h_sync = record.as_ref().and_then(|r| r.last_synced_hash.clone());
            let h_local = local.get(&path).map(|f| f.hash.clone());
            let h_remote = remote.get(&path).map(|e| e.hash.clone());
            if let Some(change) = describe(&path, h_sync.as_deref(), h_local.as_deref(), h_remote.as_deref()) {
                changes.push(change);
            }
        }

        order_changes(&mut changes);

        debug!(scope = %scope, changes = changes.len(), "producer pass complete");
        Ok(ProducerPass {
            changes,
            local,
            remote,
            ignored,
        })
    }

    /// Walk the scope directory, hashing every tracked file. Reuses the
    /// stored hash when size and mtime are unchanged; a cold store simply
    /// rehashes everything.
    fn local_snapshot(
        &self,
        scope: &SyncPath,
    ) -> SyncResult<(BTreeMap<SyncPath, HashedFile>, Vec<SyncPath>)> {
        let mut out = BTreeMap::new();
        let mut ignored = Vec::new();
        let dir = scope.to_local(&self.root);
        if dir.is_dir() {
            self.walk(&dir, &mut out, &mut ignored)?;
        }
        Ok((out, ignored))
    }

    fn walk(
        &self,
        dir: &Path,
        out: &mut BTreeMap<SyncPath, HashedFile>,
        ignored: &mut Vec<SyncPath>,
    ) -> SyncResult<()> {
        for entry in fs::read_dir(dir)?.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if path.is_dir() {
                if !ignore::ignore_dir(&name) {
                    self.walk(&path, out, ignored)?;
                }
                continue;
            }
            if ignore::ignore_file(&name) {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot stat file, skipping");
                    continue;
                }
            };
            let logical = match SyncPath::from_local(&self.root, &path) {
                Ok(logical) => logical,
                Err(_) => continue,
            };
            if ignore::ignore_size(&path, meta.len()) {
                ignored.push(logical);
                continue;
            }
            let hashed = match self.cached_hash(&logical, &meta) {
                Some(hashed) => hashed,
                None => match hash_file(&path) {
                    Ok(hashed) => hashed,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "cannot hash file, skipping");
                        continue;
                    }
                },
            };
            out.insert(logical, hashed);
        }
        Ok(())
    }

    fn cached_hash(&self, path: &SyncPath, meta: &fs::Metadata) -> Option<HashedFile> {
        let record = self.store.get(path).ok()??;
        if record.size == meta.len() && record.modified_at == modified_unix(meta) {
            Some(HashedFile {
                hash: record.content_hash,
                size: record.size,
                modified_at: record.modified_at,
            })
        } else {
            None
        }
    }
}

/// Permission marker files first, then stable path order, so new grants
/// land before the content they unlock.
fn order_changes(changes: &mut [ChangeDescriptor]) {
    changes.sort_by(|a, b| {
        let a_perm = is_permission_path(&a.path);
        let b_perm = is_permission_path(&b.path);
        b_perm.cmp(&a_perm).then_with(|| a.path.cmp(&b.path))
    });
}

/// Turn a hash triple into a descriptor, or `None` when the path is in sync.
fn describe(
    path: &SyncPath,
    h_sync: Option<&str>,
    h_local: Option<&str>,
    h_remote: Option<&str>,
) -> Option<ChangeDescriptor> {
    let (kind, location) = match (h_sync, h_local, h_remote) {
        (_, Some(l), _) if h_sync != Some(l) => (
            if h_sync.is_none() {
                ChangeKind::Create
            } else {
                ChangeKind::Modify
            },
            ChangeLocation::Local,
        ),
        (Some(_), None, _) => (ChangeKind::Delete, ChangeLocation::Local),
        (_, _, Some(r)) if h_sync != Some(r) => (
            if h_sync.is_none() {
                ChangeKind::Create
            } else {
                ChangeKind::Modify
            },
            ChangeLocation::Remote,
        ),
        (Some(_), _, None) => (ChangeKind::Delete, ChangeLocation::Remote),
        _ => return None,
    };
    Some(ChangeDescriptor {
        path: path.clone(),
        kind,
        location,
    })
}
