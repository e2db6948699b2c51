//! SHA-256 content hashing for integrity verification.
//!
//! Hashes are rendered as lowercase hex, the same form manifests declare.

use sha2::{Digest, Sha256};

use crate::error::{SyncError, SyncResult};

/// Chunk size fed to the hasher (64KB).
const CHUNK_SIZE: usize = 64 * 1024;

/// Calculate the SHA-256 content hash of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    for chunk in bytes.chunks(CHUNK_SIZE) {
        hasher.update(chunk);
    }
    format!("{:x}", hasher.finalize())
}

/// Verify that `bytes` hash to `expected`.
///
/// # Returns
///
/// The computed hash on success.
///
/// # Errors
///
/// `SyncError::ChecksumMismatch` naming `path`, the declared and the computed hash.
pub fn verify_checksum(path: &str, bytes: &[u8], expected: &str) -> SyncResult<String> {
    let actual = content_hash(bytes);
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(SyncError::ChecksumMismatch {
            path: path.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(actual)
}
