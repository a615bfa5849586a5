//! Wire types shared by the sync client and the caching server.
//!
//! Binary payloads (content, deltas, signatures) travel base64-encoded
//! inside JSON bodies. Hashes are hex-encoded SHA-256 strings.

use crate::path::SyncPath;
use serde::{Deserialize, Serialize};

/// One row of `GET /sync/manifest/{scope}`.
///
/// The signature lets the client compute an upload delta against the
/// server's current content without an extra round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: SyncPath,
    pub hash: String,
    pub size: u64,
    /// Base64 `fast_rsync` signature of the stored content.
    pub signature_b64: String,
}

/// `GET /sync/content/{path}` response and `PUT /sync/content/{path}` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPayload {
    pub content_b64: String,
    /// Hex SHA-256 of the decoded content, verified server-side on upload.
    pub hash: String,
}

/// `PATCH /sync/diff/{path}` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffPayload {
    /// Hash the delta was computed against. The server rejects the apply
    /// with 409 when its stored hash differs (stale base).
    pub base_hash: String,
    pub delta_b64: String,
    /// Expected hash of the content after applying the delta.
    pub expected_hash: String,
}

/// Acknowledgment for every mutating call: the hash now stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResponse {
    pub hash: String,
}

/// One file inside a bootstrap batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub path: SyncPath,
    pub content_b64: String,
    pub hash: String,
}

/// `GET /sync/batch/{scope}` response: the full readable content of a scope
/// at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncBatch {
    pub entries: Vec<BatchEntry>,
}

/// `GET /sync/datasites` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasiteList {
    pub datasites: Vec<String>,
}

/// Error body returned by the server for non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// Header carrying the acting identity. Token verification happens in an
/// outer layer; the sync core only needs the resolved identity.
pub const ACTING_USER_HEADER: &str = "x-acting-user";
