//! Content hashing used as the identity of a picture.

use sha2::{Digest, Sha256};

/// Compute the lowercase hex SHA-256 digest of `data`.
pub fn fingerprint(data: &[u8]) -> String {
    let mut hasher = Sha256::default();

    hasher.update(data);

    hex::encode(hasher.finalize())
}

/// Storage-relative path of a picture with the specified content hash
pub fn storage_path(hash: &str) -> String {
    format!("{}.jpg", hash)
}
