//! Shared sync-engine types: change descriptors and per-path status.

use crate::path::SyncPath;
use crate::protocol::ManifestEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What kind of difference the producer observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Create,
    Modify,
    Delete,
}

/// Which side the difference was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeLocation {
    Local,
    Remote,
}

/// One path-level difference detected by the producer. Ephemeral: consumed
/// (or dropped with a terminal failure) within the cycle that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeDescriptor {
    pub path: SyncPath,
    pub kind: ChangeKind,
    pub location: ChangeLocation,
}

/// Remote state captured alongside a producer pass: manifest entries keyed
/// by path. The consumer classifies against this snapshot rather than
/// refetching per path.
pub type RemoteState = HashMap<SyncPath, ManifestEntry>;

/// Last known sync status of one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    Queued,
    InProgress,
    Synced,
    Error,
    Rejected,
    Ignored,
}

/// Status record kept per path, refreshed each cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatusInfo {
    pub status: SyncStatus,
    pub message: Option<String>,
    pub updated_at: u64,
}

impl SyncStatusInfo {
    pub fn new(status: SyncStatus, message: Option<String>) -> Self {
        SyncStatusInfo {
            status,
            message,
            updated_at: crate::hash::now_unix(),
        }
    }
}

/// Outcome summary of one full producer/consumer cycle.
#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    pub synced: usize,
    pub noops: usize,
    pub conflicts: usize,
    /// Path -> error kind for every terminal or retryable failure.
    pub failures: Vec<(SyncPath, String)>,
}

impl CycleReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
