//! Content hashing and delta signatures.
//!
//! All sync decisions are driven by hex-encoded SHA-256 hashes of file
//! content. Alongside the hash we compute a `fast_rsync` signature so peers
//! can build deltas against content they do not hold.

use fast_rsync::{Signature, SignatureOptions};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Block size for delta signatures.
pub const SIGNATURE_BLOCK_SIZE: u32 = 4096;
/// Truncated per-block crypto hash length for delta signatures.
pub const SIGNATURE_CRYPTO_HASH_SIZE: u32 = 8;

/// Hex-encoded SHA-256 of a byte slice.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Serialized `fast_rsync` signature for `data`.
pub fn signature_bytes(data: &[u8]) -> Vec<u8> {
    Signature::calculate(
        data,
        SignatureOptions {
            block_size: SIGNATURE_BLOCK_SIZE,
            crypto_hash_size: SIGNATURE_CRYPTO_HASH_SIZE,
        },
    )
    .into_serialized()
}

/// A hashed view of one file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedFile {
    pub hash: String,
    pub size: u64,
    pub modified_at: u64,
}

/// Hash a file's content, returning its hash plus advisory metadata.
pub fn hash_file(path: &Path) -> io::Result<HashedFile> {
    let data = fs::read(path)?;
    let meta = fs::metadata(path)?;
    Ok(HashedFile {
        hash: hash_bytes(&data),
        size: meta.len(),
        modified_at: modified_unix(&meta),
    })
}

/// Modification time as unix seconds, zero when unavailable.
pub fn modified_unix(meta: &fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Current wall-clock time as unix seconds.
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_hex_sha256() {
        let h = hash_bytes(b"hello");
        assert_eq!(h.len(), 64);
        assert_eq!(
            h,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn signature_round_trips_through_diff_apply() {
        let base = b"the quick brown fox jumps over the lazy dog".repeat(200);
        let mut modified = base.clone();
        modified.extend_from_slice(b" and then some");

        let sig = Signature::deserialize(signature_bytes(&base)).unwrap();
        let mut delta = Vec::new();
        fast_rsync::diff(&sig.index(), &modified, &mut delta).unwrap();

        let mut rebuilt = Vec::new();
        fast_rsync::apply(&base, &delta, &mut rebuilt).unwrap();
        assert_eq!(rebuilt, modified);
    }

    #[test]
    fn hash_file_reads_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, b"content").unwrap();
        let hashed = hash_file(&path).unwrap();
        assert_eq!(hashed.hash, hash_bytes(b"content"));
        assert_eq!(hashed.size, 7);
    }
}
