use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::file::write_atomic;
use crate::errors::EtlResult;
use crate::model::{TableBatch, TableName};

/// Replaces a table's whole dataset at once.
///
/// This is the write path for runs without a store. It never merges: each
/// call discards whatever the previous run wrote for the table.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CuratedWriter: Send + Sync {
    /// Returns a short name for logs.
    fn name(&self) -> &str;

    /// Overwrites the dataset of `batch.table()` with the batch. Returns
    /// the number of records written.
    async fn overwrite(&self, batch: &TableBatch) -> EtlResult<usize>;
}

/// Writes each table as JSON lines under `<dir>/curated/<table>.jsonl`.
#[derive(Debug, Clone)]
pub struct JsonLinesCuratedWriter {
    root: PathBuf,
}

impl JsonLinesCuratedWriter {
    /// Creates a writer rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            root: dir.as_ref().join("curated"),
        }
    }

    /// Path of a table's dataset.
    #[must_use]
    pub fn path_for(&self, table: TableName) -> PathBuf {
        self.root.join(format!("{table}.jsonl"))
    }
}

#[async_trait]
impl CuratedWriter for JsonLinesCuratedWriter {
    fn name(&self) -> &str {
        "jsonl_curated"
    }

    async fn overwrite(&self, batch: &TableBatch) -> EtlResult<usize> {
        let path = self.path_for(batch.table());
        let lines = batch.to_json_lines()?;
        write_atomic(&path, lines.as_bytes()).await?;
        tracing::info!(
            table = %batch.table(),
            records = batch.len(),
            path = %path.display(),
            "Curated dataset overwritten"
        );
        Ok(batch.len())
    }
}
