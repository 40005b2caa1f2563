//! Content-addressed blob storage
//!
//! Blobs are named by the SHA-256 digest of their bytes and laid out on disk as
//! `base/xx/yy/<64-hex-digest>`, where `xx` and `yy` are the first and second
//! pairs of hex characters of the digest. Identical content is stored once.

mod store;

pub use store::{compute_hash, shard_key, ContentAddressedStorage};

/// Digest of the empty byte string
pub const EMPTY_DIGEST: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Whether `digest` looks like a lowercase hex SHA-256 digest
pub fn is_valid_digest(digest: &str) -> bool {
    digest.len() == 64 && digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
