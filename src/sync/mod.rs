//! The client-side sync engine.
//!
//! A producer detects path-level differences between the local tree, the
//! last-synced records, and the server manifest; a consumer classifies each
//! difference from its three hashes and drives the matching action through
//! the server API. See [`classify`](classify::classify) for the decision
//! table.

pub mod bootstrap;
pub mod classify;
pub mod client;
pub mod consumer;
pub mod error;
pub mod manager;
pub mod producer;
pub mod types;
pub mod watcher;

pub use classify::{classify, SyncAction};
pub use client::SyncClient;
pub use consumer::{Consumer, Outcome};
pub use error::{SyncError, SyncResult};
pub use manager::SyncManager;
pub use producer::{Producer, ProducerPass};
pub use types::{ChangeDescriptor, ChangeKind, ChangeLocation, CycleReport, SyncStatus};
