//! The final report of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::RunStatus;
use crate::cluster::AggregationSummary;
use crate::engine::TableRunResult;
use crate::model::TableName;

/// What happened to the aggregation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AggregationOutcome {
    /// Aggregation ran.
    Completed(AggregationSummary),
    /// Aggregation did not run.
    Skipped {
        /// Why it did not run.
        reason: String,
    },
}

impl AggregationOutcome {
    /// The summary, if aggregation ran.
    #[must_use]
    pub fn summary(&self) -> Option<&AggregationSummary> {
        match self {
            Self::Completed(summary) => Some(summary),
            Self::Skipped { .. } => None,
        }
    }
}

/// A failed write to the output sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkError {
    /// What was being written: a table name or `aggregates`.
    pub target: String,
    /// The sink error.
    pub message: String,
}

/// Everything a run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique id of the run.
    pub run_id: Uuid,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run ended.
    pub finished_at: DateTime<Utc>,
    /// Overall status.
    pub status: RunStatus,
    /// One result per table, in pipeline order.
    pub tables: Vec<TableRunResult>,
    /// Aggregation outcome.
    pub aggregation: AggregationOutcome,
    /// Sink writes that failed.
    pub sink_errors: Vec<SinkError>,
    /// Cancellation reason, if the run was cancelled.
    pub cancel_reason: Option<String>,
}

impl RunReport {
    /// Result of one table.
    #[must_use]
    pub fn table(&self, table: TableName) -> Option<&TableRunResult> {
        self.tables.iter().find(|t| t.table == table)
    }

    /// Records attempted across all tables.
    #[must_use]
    pub fn total_attempted(&self) -> usize {
        self.tables.iter().map(|t| t.attempted).sum()
    }

    /// Records applied across all tables.
    #[must_use]
    pub fn total_applied(&self) -> usize {
        self.tables.iter().map(|t| t.applied).sum()
    }

    /// Records failed across all tables.
    #[must_use]
    pub fn total_failed(&self) -> usize {
        self.tables.iter().map(|t| t.failed).sum()
    }

    /// Wall-clock duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        u64::try_from((self.finished_at - self.started_at).num_milliseconds()).unwrap_or(0)
    }

    /// Serializes the report as pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
