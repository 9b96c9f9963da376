//! The upsert engine: key-hash shards, bounded retry and per-table results.

mod result;
mod retry;
mod sharding;
mod upsert;

pub use result::{RecordError, TableRunResult};
pub use retry::{merge_with_retry, BackoffStrategy, JitterStrategy, RetryConfig};
pub use sharding::{partition, shard_for_key, KeyedRow, Partitioned};
pub use upsert::UpsertEngine;
