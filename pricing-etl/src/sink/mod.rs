//! Output sinks for run results.
//!
//! A [`Sink`] receives each table's [`TableRunResult`] once per run and the
//! cluster aggregates once per run. A [`CuratedWriter`] is the separate path
//! used when no store is configured: it replaces a table's whole dataset
//! rather than merging records.

mod curated;
mod file;
mod logging;
mod memory;

pub use curated::{CuratedWriter, JsonLinesCuratedWriter};
pub use file::JsonFileSink;
pub use logging::LoggingSink;
pub use memory::MemorySink;

use async_trait::async_trait;

use crate::cluster::ClusterAggregate;
use crate::engine::TableRunResult;
use crate::errors::EtlResult;

/// Receives run output.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Sink: Send + Sync {
    /// Returns a short name for logs.
    fn name(&self) -> &str;

    /// Writes one table's upsert outcome.
    async fn write_table_result(&self, result: &TableRunResult) -> EtlResult<()>;

    /// Writes the cluster aggregates of a run, sorted by cluster key.
    async fn write_aggregates(&self, aggregates: &[ClusterAggregate]) -> EtlResult<()>;
}
