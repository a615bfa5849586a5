//! Process configuration.
//!
//! Both sides take an explicit, immutable config value built at process
//! start and threaded into constructors. Nothing reads configuration
//! ambiently.

use crate::ignore::INTERNAL_DIR;
use std::path::PathBuf;
use std::time::Duration;

/// Default producer poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default consumer worker pool size.
pub const DEFAULT_WORKERS: usize = 8;
/// Default minimum file size before delta uploads are attempted.
pub const DEFAULT_DELTA_MIN_SIZE: u64 = 4096;

/// Client-side configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the caching server.
    pub server_url: String,
    /// Acting identity sent with every request.
    pub user: String,
    /// Root directory holding one subdirectory per datasite.
    pub sync_root: PathBuf,
    pub poll_interval: Duration,
    pub workers: usize,
    pub delta_min_size: u64,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, user: impl Into<String>, sync_root: impl Into<PathBuf>) -> Self {
        ClientConfig {
            server_url: server_url.into(),
            user: user.into(),
            sync_root: sync_root.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            workers: DEFAULT_WORKERS,
            delta_min_size: DEFAULT_DELTA_MIN_SIZE,
        }
    }

    /// Location of the client metadata database.
    pub fn state_db_path(&self) -> PathBuf {
        self.sync_root.join(INTERNAL_DIR).join("state.redb")
    }
}

/// Server-side configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory holding the authoritative copy of every datasite.
    pub snapshot_root: PathBuf,
    /// When set, deleting a file requires admin rather than write.
    pub admin_only_delete: bool,
}

impl ServerConfig {
    pub fn new(snapshot_root: impl Into<PathBuf>) -> Self {
        ServerConfig {
            snapshot_root: snapshot_root.into(),
            admin_only_delete: false,
        }
    }

    /// Location of the server metadata database.
    pub fn metadata_db_path(&self) -> PathBuf {
        self.snapshot_root.join(".metadata.redb")
    }
}
