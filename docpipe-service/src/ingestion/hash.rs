//! Content hashing for upload deduplication.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 of uploaded bytes as lowercase hex.
///
/// Two uploads with the same hash are the same physical content.
pub fn compute_content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
