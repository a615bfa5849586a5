//! cachebox: permissioned file-tree synchronization through a central
//! caching server.
//!
//! The client side ([`sync`]) detects differences between the local tree,
//! the last-synced state, and the server manifest, classifies each one from
//! its three content hashes, and drives the matching action. The server
//! side ([`server`]) re-validates every mutation against the per-directory
//! permission model ([`perms`]) before persisting it atomically.

pub mod config;
pub mod hash;
pub mod ignore;
pub mod metadata;
pub mod path;
pub mod perms;
pub mod protocol;
pub mod server;
pub mod sync;

pub use config::{ClientConfig, ServerConfig};
pub use path::SyncPath;
pub use server::create_router;
pub use sync::{SyncError, SyncManager, SyncResult};
