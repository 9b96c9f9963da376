//! Sharded, partial-failure-tolerant upsert of one table.

use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

use super::retry::{merge_with_retry, RetryConfig};
use super::sharding::{partition, KeyedRow, Partitioned};
use super::{RecordError, TableRunResult};
use crate::cancellation::CancellationToken;
use crate::config::UpsertConfig;
use crate::model::Row;
use crate::policy::KeyPolicy;
use crate::store::Store;

/// Applies keyed merges for one table at a time.
///
/// Rows are split into key-hash shards; each shard runs as its own task with
/// one store session and merges its rows in order. A failing record is
/// recorded and skipped. A lost connection ends its shard only.
#[derive(Clone)]
pub struct UpsertEngine {
    store: Arc<dyn Store>,
    config: UpsertConfig,
    cancel: Arc<CancellationToken>,
}

impl UpsertEngine {
    /// Creates an engine writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            config: UpsertConfig::default(),
            cancel: Arc::new(CancellationToken::new()),
        }
    }

    /// Sets the shard count and retry policy.
    #[must_use]
    pub fn with_config(mut self, config: UpsertConfig) -> Self {
        self.config = config;
        self
    }

    /// Shares a cancellation token with the engine.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// The engine's configuration.
    #[must_use]
    pub fn config(&self) -> &UpsertConfig {
        &self.config
    }

    /// Upserts every row of one table.
    ///
    /// Never fails as a whole: every row ends up counted as applied, failed
    /// or skipped (cancelled before dispatch).
    pub async fn run(&self, policy: &KeyPolicy, rows: Vec<Row>) -> TableRunResult {
        let started = Instant::now();
        let mut result = TableRunResult::new(policy.table);
        result.attempted = rows.len();

        let Partitioned { shards, rejected } = partition(policy, rows, self.config.shard_count);
        for (position, err) in rejected {
            result.record_failure(RecordError {
                key: None,
                shard: None,
                kind: err.kind().to_string(),
                message: format!("record #{position}: {err}"),
                attempts: 0,
            });
        }

        let policy = Arc::new(policy.clone());
        let mut tasks = JoinSet::new();
        for (shard, rows) in shards.into_iter().enumerate() {
            if rows.is_empty() {
                continue;
            }
            tasks.spawn(run_shard(
                shard,
                rows,
                self.store.clone(),
                policy.clone(),
                self.config.retry.clone(),
                self.cancel.clone(),
            ));
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(shard_result) => result.absorb(shard_result),
                Err(err) => {
                    tracing::error!(table = %policy.table, error = %err, "Shard task died");
                    result.errors.push(RecordError {
                        key: None,
                        shard: None,
                        kind: "shard_task".to_string(),
                        message: err.to_string(),
                        attempts: 0,
                    });
                }
            }
        }

        // Rows owned by a shard task that died never reported back.
        let accounted = result.applied + result.failed + result.skipped;
        if accounted < result.attempted {
            result.failed += result.attempted - accounted;
        }

        result.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        tracing::info!(
            table = %result.table,
            store = self.store.name(),
            attempted = result.attempted,
            applied = result.applied,
            inserted = result.inserted,
            updated = result.updated,
            stale = result.stale,
            failed = result.failed,
            skipped = result.skipped,
            duration_ms = result.duration_ms,
            "Table upsert finished"
        );

        result
    }
}

impl std::fmt::Debug for UpsertEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpsertEngine")
            .field("store", &self.store.name())
            .field("config", &self.config)
            .field("cancel", &self.cancel)
            .finish()
    }
}

async fn run_shard(
    shard: usize,
    rows: Vec<KeyedRow>,
    store: Arc<dyn Store>,
    policy: Arc<KeyPolicy>,
    retry: RetryConfig,
    cancel: Arc<CancellationToken>,
) -> TableRunResult {
    let mut result = TableRunResult::new(policy.table);
    let total = rows.len();

    if cancel.is_cancelled() {
        result.skipped = total;
        result.cancelled = true;
        return result;
    }

    let mut session = match store.acquire().await {
        Ok(session) => session,
        Err(err) => {
            tracing::warn!(table = %policy.table, shard, error = %err, "Shard could not acquire a session");
            result.failed = total;
            result.errors.push(RecordError {
                key: None,
                shard: Some(shard),
                kind: err.kind.as_str().to_string(),
                message: format!("{total} records not applied: {}", err.message),
                attempts: 1,
            });
            return result;
        }
    };

    for (index, keyed) in rows.into_iter().enumerate() {
        if cancel.is_cancelled() {
            result.skipped += total - index;
            result.cancelled = true;
            tracing::debug!(table = %policy.table, shard, skipped = total - index, "Shard stopped by cancellation");
            break;
        }

        let (attempts, outcome) = merge_with_retry(&retry, &mut *session, &policy, &keyed.row).await;
        match outcome {
            Ok(outcome) => result.record_applied(outcome),
            Err(err) if err.is_connection() => {
                let remaining = total - index;
                tracing::warn!(
                    table = %policy.table,
                    shard,
                    key = %keyed.key,
                    remaining,
                    error = %err,
                    "Store connection lost, abandoning shard"
                );
                result.failed += remaining;
                result.errors.push(RecordError {
                    key: None,
                    shard: Some(shard),
                    kind: err.kind.as_str().to_string(),
                    message: format!(
                        "connection lost at {}; {remaining} records not applied: {}",
                        keyed.key, err.message
                    ),
                    attempts,
                });
                break;
            }
            Err(err) => {
                tracing::debug!(table = %policy.table, shard, key = %keyed.key, error = %err, "Record rejected");
                result.record_failure(RecordError {
                    key: Some(keyed.key.to_string()),
                    shard: Some(shard),
                    kind: err.kind.as_str().to_string(),
                    message: err.message,
                    attempts,
                });
            }
        }
    }

    result
}
