//! Unified error type for sync operations.

use thiserror::Error;

/// Errors surfaced by the sync engine, grouped by how the consumer reacts.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Transport-level failure. The change is requeued on the next cycle.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// The server (or the client's early check) denied the operation.
    /// Terminal for this cycle; reported, not retried automatically.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A diff-apply was computed against a base the server no longer holds.
    /// The caller falls back to a full upload in the same cycle.
    #[error("stale delta base: {0}")]
    StaleBase(String),

    /// The path no longer exists remotely; reclassified next producer pass.
    #[error("not found: {0}")]
    NotFound(String),

    /// Local filesystem failure. Terminal per path; never aborts the cycle.
    #[error("local I/O error: {0}")]
    LocalIo(#[from] std::io::Error),

    /// Malformed payload or response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Metadata store failure.
    #[error("store error: {0}")]
    Store(#[from] crate::metadata::StoreError),

    #[error("invalid path: {0}")]
    Path(#[from] crate::path::PathError),
}

impl SyncError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientNetwork(msg.into())
    }

    pub fn denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Short stable label for status reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransientNetwork(_) => "transient_network",
            Self::PermissionDenied(_) => "permission_denied",
            Self::StaleBase(_) => "stale_base",
            Self::NotFound(_) => "not_found",
            Self::LocalIo(_) => "local_io",
            Self::Protocol(_) => "protocol",
            Self::Store(_) => "store",
            Self::Path(_) => "path",
        }
    }

    /// Whether the next producer cycle should try this path again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_) | Self::NotFound(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        // Anything that failed before an HTTP status was produced is
        // transport-level and worth retrying next cycle.
        SyncError::TransientNetwork(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Protocol(e.to_string())
    }
}

impl From<base64::DecodeError> for SyncError {
    fn from(e: base64::DecodeError) -> Self {
        SyncError::Protocol(e.to_string())
    }
}

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_taxonomy() {
        assert!(SyncError::transient("timeout").is_retryable());
        assert!(SyncError::NotFound("gone".into()).is_retryable());
        assert!(!SyncError::denied("no write").is_retryable());
        assert!(!SyncError::StaleBase("moved".into()).is_retryable());
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(SyncError::denied("x").kind(), "permission_denied");
        assert_eq!(SyncError::StaleBase("x".into()).kind(), "stale_base");
    }
}
