//! Three-way hash classification.
//!
//! For each path the consumer holds up to three hashes: the hash the server
//! last acknowledged (`h_sync`), the current local content hash (`h_local`),
//! and the server's current hash (`h_remote`). Comparing the three decides
//! the action; absence of a hash means the file does not exist on that side
//! (or was never synced, for `h_sync`).

/// The action chosen for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Nothing to do. The consumer may still reseed the file record when
    /// both sides converged out of band.
    Noop,
    /// New local file, never synced: full upload.
    CreateRemote,
    /// Local modified, remote unchanged: upload (delta preferred when the
    /// change is small relative to the file).
    ModifyRemote,
    /// New remote file: download and create locally.
    CreateLocal,
    /// Remote modified, local unchanged: download and overwrite.
    ModifyLocal,
    /// Local deleted, remote unchanged: request remote delete.
    DeleteRemote,
    /// Remote deleted, local unchanged: delete locally.
    DeleteLocal,
    /// Both sides diverged from the synced base. Remote wins; the local
    /// version is preserved in the recovery area first.
    Conflict,
}

/// Classify one path from its three hash positions.
///
/// Pure and total: every combination of present/absent and equal/unequal
/// hashes maps to exactly one action.
pub fn classify(
    h_sync: Option<&str>,
    h_local: Option<&str>,
    h_remote: Option<&str>,
) -> SyncAction {
    match (h_sync, h_local, h_remote) {
        // Never synced.
        (None, None, None) => SyncAction::Noop,
        (None, Some(_), None) => SyncAction::CreateRemote,
        (None, None, Some(_)) => SyncAction::CreateLocal,
        // Both sides have content but no sync history: equal content is
        // convergence (the consumer seeds the record), unequal is a
        // conflict with no base to reason from.
        (None, Some(l), Some(r)) => {
            if l == r {
                SyncAction::Noop
            } else {
                SyncAction::Conflict
            }
        }
        // Synced before, both sides now gone: just forget the record.
        (Some(_), None, None) => SyncAction::Noop,
        (Some(s), None, Some(r)) => {
            if r == s {
                SyncAction::DeleteRemote
            } else {
                // local deleted while remote moved on
                SyncAction::Conflict
            }
        }
        (Some(s), Some(l), None) => {
            if l == s {
                SyncAction::DeleteLocal
            } else {
                // local modified while remote deleted
                SyncAction::Conflict
            }
        }
        (Some(s), Some(l), Some(r)) => {
            let local_changed = l != s;
            let remote_changed = r != s;
            match (local_changed, remote_changed) {
                (false, false) => SyncAction::Noop,
                (true, false) => SyncAction::ModifyRemote,
                (false, true) => SyncAction::ModifyLocal,
                (true, true) => {
                    if l == r {
                        // both sides made the same change independently
                        SyncAction::Noop
                    } else {
                        SyncAction::Conflict
                    }
                }
            }
        }
    }
}
