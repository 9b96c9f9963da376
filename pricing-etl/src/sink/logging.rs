use async_trait::async_trait;

use super::Sink;
use crate::cluster::ClusterAggregate;
use crate::engine::TableRunResult;
use crate::errors::EtlResult;

/// Writes run output to the log instead of storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSink;

#[async_trait]
impl Sink for LoggingSink {
    fn name(&self) -> &str {
        "logging"
    }

    async fn write_table_result(&self, result: &TableRunResult) -> EtlResult<()> {
        tracing::info!(
            table = %result.table,
            attempted = result.attempted,
            applied = result.applied,
            failed = result.failed,
            skipped = result.skipped,
            source_error = ?result.source_error,
            "Table result"
        );
        for error in &result.errors {
            tracing::warn!(
                table = %result.table,
                key = ?error.key,
                shard = ?error.shard,
                kind = %error.kind,
                message = %error.message,
                "Table error"
            );
        }
        Ok(())
    }

    async fn write_aggregates(&self, aggregates: &[ClusterAggregate]) -> EtlResult<()> {
        for aggregate in aggregates {
            tracing::info!(
                cluster_key = %aggregate.cluster_key,
                booking_count = aggregate.booking_count,
                "Cluster aggregate"
            );
        }
        Ok(())
    }
}
