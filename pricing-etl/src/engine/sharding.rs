//! Key-hash partitioning of a table's rows into shards.
//!
//! Every row with a given key lands in the same shard, so no two shards can
//! have the same key in flight. Within a shard rows keep their input order.

use sha2::{Digest, Sha256};

use crate::errors::EtlError;
use crate::model::{Row, RowKey};
use crate::policy::KeyPolicy;

/// A row paired with its key.
#[derive(Debug, Clone)]
pub struct KeyedRow {
    /// The row's key under the table policy.
    pub key: RowKey,
    /// The row itself.
    pub row: Row,
}

/// Rows split into shards, plus rows whose key could not be extracted.
#[derive(Debug, Default)]
pub struct Partitioned {
    /// One bucket per shard, possibly empty.
    pub shards: Vec<Vec<KeyedRow>>,
    /// Rows rejected before dispatch, with their input position.
    pub rejected: Vec<(usize, EtlError)>,
}

/// Stable shard index for a key.
///
/// Uses SHA-256 over the key values, so assignment does not change between
/// builds or processes.
#[must_use]
pub fn shard_for_key(key: &RowKey, shard_count: usize) -> usize {
    let shard_count = shard_count.max(1);
    let mut hasher = Sha256::new();
    for value in key.values() {
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let hash = u64::from_be_bytes(prefix);
    usize::try_from(hash % shard_count as u64).unwrap_or(0)
}

/// Splits rows into `shard_count` buckets by key hash.
#[must_use]
pub fn partition(policy: &KeyPolicy, rows: Vec<Row>, shard_count: usize) -> Partitioned {
    let shard_count = shard_count.max(1);
    let mut shards: Vec<Vec<KeyedRow>> = (0..shard_count).map(|_| Vec::new()).collect();
    let mut rejected = Vec::new();

    for (position, row) in rows.into_iter().enumerate() {
        match policy.key_of(&row) {
            Ok(key) => {
                let shard = shard_for_key(&key, shard_count);
                shards[shard].push(KeyedRow { key, row });
            }
            Err(err) => rejected.push((position, err)),
        }
    }

    Partitioned { shards, rejected }
}
