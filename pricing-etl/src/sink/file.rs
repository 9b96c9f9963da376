use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::Sink;
use crate::cluster::ClusterAggregate;
use crate::engine::TableRunResult;
use crate::errors::EtlResult;

/// File name of the aggregate output.
const AGGREGATES_FILE: &str = "cluster_aggregates.json";

/// Writes pretty JSON files into a directory.
///
/// Each table result goes to `<dir>/<table>_result.json` and the aggregates
/// to `<dir>/cluster_aggregates.json`. Files are written beside the target
/// and renamed over it, so readers never see a partial file.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    /// Creates a sink writing into `dir` (created on first write).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Output directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a table's result file.
    #[must_use]
    pub fn table_result_path(&self, result: &TableRunResult) -> PathBuf {
        self.dir.join(format!("{}_result.json", result.table))
    }

    /// Path of the aggregates file.
    #[must_use]
    pub fn aggregates_path(&self) -> PathBuf {
        self.dir.join(AGGREGATES_FILE)
    }
}

#[async_trait]
impl Sink for JsonFileSink {
    fn name(&self) -> &str {
        "json_file"
    }

    async fn write_table_result(&self, result: &TableRunResult) -> EtlResult<()> {
        write_json(&self.table_result_path(result), result).await
    }

    async fn write_aggregates(&self, aggregates: &[ClusterAggregate]) -> EtlResult<()> {
        write_json(&self.aggregates_path(), aggregates).await
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> EtlResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes).await
}

/// Writes `bytes` to a sibling temp file and renames it over `path`.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> EtlResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::AggregationEngine;
    use crate::model::TableName;
    use crate::store::MergeOutcome;
    use crate::testing::{booking, product};

    #[tokio::test]
    async fn test_writes_table_result_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path().join("out"));

        let mut result = TableRunResult::new(TableName::Prices);
        result.attempted = 1;
        result.record_applied(MergeOutcome::Inserted);
        sink.write_table_result(&result).await.unwrap();

        let path = dir.path().join("out").join("prices_result.json");
        let written: TableRunResult =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written, result);
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_aggregates_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path());
        let report = AggregationEngine::default()
            .aggregate_products(&[booking("K1", "P1")], &[product("P1")]);

        sink.write_aggregates(&report.sorted_aggregates()).await.unwrap();
        sink.write_aggregates(&[]).await.unwrap();

        let written: Vec<ClusterAggregate> =
            serde_json::from_slice(&std::fs::read(sink.aggregates_path()).unwrap()).unwrap();
        assert!(written.is_empty());
    }
}
