use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::Sink;
use crate::cluster::ClusterAggregate;
use crate::engine::TableRunResult;
use crate::errors::EtlResult;

#[derive(Debug, Default)]
struct Inner {
    table_results: Vec<TableRunResult>,
    aggregate_writes: Vec<Vec<ClusterAggregate>>,
}

/// Keeps everything written to it, for tests and dry runs.
///
/// Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Table results in write order.
    pub async fn table_results(&self) -> Vec<TableRunResult> {
        self.inner.lock().await.table_results.clone()
    }

    /// Every aggregate write, in call order.
    pub async fn aggregate_writes(&self) -> Vec<Vec<ClusterAggregate>> {
        self.inner.lock().await.aggregate_writes.clone()
    }

    /// The most recent aggregate write.
    pub async fn aggregates(&self) -> Option<Vec<ClusterAggregate>> {
        self.inner.lock().await.aggregate_writes.last().cloned()
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write_table_result(&self, result: &TableRunResult) -> EtlResult<()> {
        self.inner.lock().await.table_results.push(result.clone());
        Ok(())
    }

    async fn write_aggregates(&self, aggregates: &[ClusterAggregate]) -> EtlResult<()> {
        self.inner
            .lock()
            .await
            .aggregate_writes
            .push(aggregates.to_vec());
        Ok(())
    }
}
