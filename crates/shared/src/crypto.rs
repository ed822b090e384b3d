//! Hashing utilities for deterministic rollout bucketing.

use sha2::{Digest, Sha256};

/// Number of buckets used for percentage rollouts.
pub const ROLLOUT_BUCKETS: u32 = 100;

/// Computes SHA-256 hash of the input and returns it as a hex string.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Maps a `(namespace, identifier)` pair onto a stable bucket in `[0, 100)`.
///
/// The first four bytes of `SHA-256("<namespace>:<identifier>")` are read as a
/// big-endian integer and reduced modulo [`ROLLOUT_BUCKETS`]. The same pair
/// always lands in the same bucket, across processes and restarts.
pub fn rollout_bucket(namespace: &str, identifier: &str) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b":");
    hasher.update(identifier.as_bytes());
    let digest = hasher.finalize();

    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    prefix % ROLLOUT_BUCKETS
}
