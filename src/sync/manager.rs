//! Cycle orchestration.
//!
//! The manager wires the producer and consumer together: each cycle runs
//! one producer pass per scope, then dispatches the resulting changes to a
//! bounded worker pool. Paths are guarded so at most one mutating action is
//! in flight per path; failures are isolated per path and collected into a
//! [`CycleReport`]. A poll timer and the filesystem watcher both trigger
//! the same cycle; shutdown is a watch-channel flag checked between cycles.

use crate::config::ClientConfig;
use crate::metadata::MetadataStore;
use crate::path::SyncPath;
use crate::perms::PermissionTree;
use crate::sync::bootstrap;
use crate::sync::client::SyncClient;
use crate::sync::consumer::{Consumer, Outcome};
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::producer::Producer;
use crate::sync::types::{CycleReport, RemoteState, SyncStatus, SyncStatusInfo};
use crate::sync::watcher::watch_root_task;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Drives the produce/consume cycle for one client.
pub struct SyncManager {
    config: ClientConfig,
    store: Arc<MetadataStore>,
    client: SyncClient,
    producer: Producer,
    consumer: Arc<Consumer>,
    status: Arc<Mutex<HashMap<SyncPath, SyncStatusInfo>>>,
    in_flight: Arc<Mutex<HashSet<SyncPath>>>,
}

impl SyncManager {
    pub fn new(config: ClientConfig) -> SyncResult<Self> {
        let store = Arc::new(MetadataStore::open(&config.state_db_path())?);
        let client = SyncClient::new(&config.server_url, &config.user);
        let producer = Producer::new(&config.sync_root, store.clone(), client.clone());
        let consumer = Arc::new(Consumer::new(
            &config.sync_root,
            store.clone(),
            client.clone(),
            config.delta_min_size,
        ));
        Ok(SyncManager {
            config,
            store,
            client,
            producer,
            consumer,
            status: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Snapshot of the per-path status map (for reporting).
    pub fn status_snapshot(&self) -> HashMap<SyncPath, SyncStatusInfo> {
        self.status.lock().expect("status lock poisoned").clone()
    }

    /// Run one full cycle across all scopes. Failures are collected, never
    /// propagated: a single path can't take the cycle down.
    pub async fn run_once(&self) -> SyncResult<CycleReport> {
        let mut report = CycleReport::default();
        let scopes = self.producer.scopes().await?;
        for scope in scopes {
            if let Err(e) = self.sync_scope(&scope, &mut report).await {
                // scope-level failure (e.g. manifest unreachable): report
                // against the scope path and keep going
                warn!(scope = %scope, error = %e, "scope cycle failed");
                report.failures.push((scope.clone(), e.kind().to_string()));
            }
        }
        if !report.is_clean() {
            info!(
                synced = report.synced,
                conflicts = report.conflicts,
                failed = report.failures.len(),
                "cycle finished with failures"
            );
            for (path, kind) in &report.failures {
                debug!(%path, kind, "failed path");
            }
        }
        Ok(report)
    }

    async fn sync_scope(&self, scope: &SyncPath, report: &mut CycleReport) -> SyncResult<()> {
        if bootstrap::needs_bootstrap(&self.store, scope)? {
            match bootstrap::bootstrap_scope(
                &self.config.sync_root,
                &self.store,
                &self.client,
                scope,
            )
            .await
            {
                Ok(applied) => {
                    report.synced += applied;
                    // fall through: a producer pass still reconciles local
                    // files that existed before the first sync
                }
                Err(e) if matches!(e, SyncError::NotFound(_)) => {
                    debug!(scope = %scope, "nothing on server yet, skipping bootstrap");
                }
                Err(e) => return Err(e),
            }
        }

        let pass = self.producer.scan_scope(scope).await?;
        for path in &pass.ignored {
            self.set_status(
                path,
                SyncStatus::Ignored,
                Some("exceeds sync size limit".to_string()),
            );
        }
        if pass.changes.is_empty() {
            return Ok(());
        }
        info!(scope = %scope, changes = pass.changes.len(), "dispatching changes");

        let perms = Arc::new(PermissionTree::load(&self.config.sync_root));
        let remote: Arc<RemoteState> = Arc::new(pass.remote);
        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let mut tasks: JoinSet<(SyncPath, SyncResult<Outcome>)> = JoinSet::new();

        for change in pass.changes {
            let path = change.path.clone();
            if !self.claim(&path) {
                debug!(%path, "already in flight, skipping this cycle");
                continue;
            }
            self.set_status(&path, SyncStatus::Queued, None);

            let consumer = self.consumer.clone();
            let remote = remote.clone();
            let perms = perms.clone();
            let semaphore = semaphore.clone();
            let status = self.status.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                if let Ok(mut map) = status.lock() {
                    map.insert(
                        path.clone(),
                        SyncStatusInfo::new(SyncStatus::InProgress, None),
                    );
                }
                let result = consumer.process(&path, &remote, &perms).await;
                (path, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (path, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "consumer task panicked");
                    continue;
                }
            };
            self.release(&path);
            match result {
                Ok(Outcome::Synced) => {
                    report.synced += 1;
                    self.set_status(&path, SyncStatus::Synced, None);
                }
                Ok(Outcome::Noop) => {
                    report.noops += 1;
                    self.set_status(&path, SyncStatus::Synced, None);
                }
                Ok(Outcome::Conflict) => {
                    report.conflicts += 1;
                    self.set_status(
                        &path,
                        SyncStatus::Synced,
                        Some("conflict resolved, remote adopted".to_string()),
                    );
                }
                Err(e) => {
                    let status = match e {
                        SyncError::PermissionDenied(_) => SyncStatus::Rejected,
                        _ => SyncStatus::Error,
                    };
                    self.set_status(&path, status, Some(e.to_string()));
                    report.failures.push((path, e.kind().to_string()));
                }
            }
        }
        Ok(())
    }

    /// Run cycles until `shutdown` flips to true. Triggers: a poll interval
    /// and the filesystem watcher; both run the same cycle, and cycles
    /// never overlap because each is awaited before the next trigger is
    /// taken.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> SyncResult<()> {
        let (watch_tx, mut watch_rx) = mpsc::channel::<()>(16);
        let watcher = tokio::spawn(watch_root_task(
            self.config.sync_root.clone(),
            watch_tx,
        ));

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut watcher_alive = true;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                signal = watch_rx.recv(), if watcher_alive => {
                    if signal.is_none() {
                        watcher_alive = false;
                        warn!("filesystem watcher stopped, polling only");
                        continue;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.run_once().await {
                error!(error = %e, "sync cycle failed");
            }
        }

        watcher.abort();
        info!("sync manager stopped");
        Ok(())
    }

    fn claim(&self, path: &SyncPath) -> bool {
        self.in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .insert(path.clone())
    }

    fn release(&self, path: &SyncPath) {
        self.in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .remove(path);
    }

    fn set_status(&self, path: &SyncPath, status: SyncStatus, message: Option<String>) {
        if let Ok(mut map) = self.status.lock() {
            map.insert(path.clone(), SyncStatusInfo::new(status, message));
        }
    }
}
