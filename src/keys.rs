//! Partition and sort key derivation.
//!
//! Partition keys spread one aggregate kind over `shard_count` logical
//! partitions: `"{type}-{shard}"` where `shard` is the SHA-256 digest of the
//! encoded identity, read as a big-endian integer, modulo `shard_count`.
//! Sort keys identify one record within a partition:
//! `"{type}-{identity}-{sequence}"`.
//!
//! Sort keys embed the sequence unpadded, so they do not sort numerically as
//! strings. Range reads never compare sort keys: they go through the
//! `(aid, seq_nr)` secondary indexes, where `seq_nr` is a number attribute.

use sha2::{Digest, Sha256};

use crate::domain::AggregateId;

/// Strategy for deriving storage keys from an aggregate identity.
///
/// Both functions must be pure: the same inputs always yield the same key.
pub trait KeyResolver<I: AggregateId>: Send + Sync {
    /// Partition key for `id` given the configured shard count.
    fn resolve_partition_key(&self, id: &I, shard_count: u64) -> String;

    /// Sort key for the record of `id` at `sequence`.
    fn resolve_sort_key(&self, id: &I, sequence: u64) -> String;
}

/// Hash-sharded key scheme used unless a store is given another resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultKeyResolver;

impl<I: AggregateId> KeyResolver<I> for DefaultKeyResolver {
    fn resolve_partition_key(&self, id: &I, shard_count: u64) -> String {
        format!("{}-{}", I::TYPE_NAME, shard_of(&id.encode(), shard_count))
    }

    fn resolve_sort_key(&self, id: &I, sequence: u64) -> String {
        format!("{}-{}-{}", I::TYPE_NAME, id.encode(), sequence)
    }
}

/// Shard index of an encoded identity, in `[0, shard_count)`.
///
/// Folds the digest byte by byte as `r = (r * 256 + b) mod n`, which equals
/// the digest's big-endian value mod `n`. Intermediate values are kept in
/// 128 bits so any `u64` shard count is safe. `shard_count` must be at least
/// 1; configuration rejects 0 before a store is built.
pub fn shard_of(encoded_id: &str, shard_count: u64) -> u64 {
    let modulus = u128::from(shard_count.max(1));
    let digest = Sha256::digest(encoded_id.as_bytes());
    let remainder = digest
        .iter()
        .fold(0u128, |acc, byte| (acc * 256 + u128::from(*byte)) % modulus);
    remainder as u64
}
