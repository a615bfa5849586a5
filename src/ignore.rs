//! Ignore rules for the local scan.
//!
//! The producer never tracks hidden entries, the client's own bookkeeping
//! directory, or OS junk files; oversized files are skipped with a warning.

use std::path::Path;
use tracing::warn;

/// Directory under the sync root holding client bookkeeping (state db,
/// conflict recovery copies). Never synced.
pub const INTERNAL_DIR: &str = ".cachebox";

/// Files larger than this are not synced.
pub const MAX_FILE_SIZE: u64 = 100_000_000;

const JUNK_FILES: &[&str] = &[".DS_Store", "Thumbs.db"];

/// Whether a directory entry name should be skipped entirely.
pub fn ignore_dir(name: &str) -> bool {
    name == INTERNAL_DIR || name.starts_with('.')
}

/// Whether a file name should be skipped.
pub fn ignore_file(name: &str) -> bool {
    name.starts_with('.') || JUNK_FILES.contains(&name)
}

/// Whether a file should be skipped for its size. Logs once per offending
/// file per scan.
pub fn ignore_size(path: &Path, size: u64) -> bool {
    if size > MAX_FILE_SIZE {
        warn!(path = %path.display(), size, "file exceeds sync size limit, skipping");
        return true;
    }
    false
}
