//! Lifecycle events emitted during a run.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::TableName;
use crate::pipeline::RunStatus;

/// A point in a run's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A run began.
    RunStarted {
        /// Run id.
        run_id: Uuid,
    },
    /// A table is about to be read and upserted.
    TableStarted {
        /// Run id.
        run_id: Uuid,
        /// The table.
        table: TableName,
    },
    /// A table finished (or could not start).
    TableCompleted {
        /// Run id.
        run_id: Uuid,
        /// The table.
        table: TableName,
        /// Records handed to the engine.
        attempted: usize,
        /// Records applied.
        applied: usize,
        /// Records failed.
        failed: usize,
        /// Records skipped by cancellation.
        skipped: usize,
        /// Source failure, if any.
        source_error: Option<String>,
    },
    /// Aggregation produced its output.
    AggregationCompleted {
        /// Run id.
        run_id: Uuid,
        /// Distinct clusters.
        clusters: usize,
        /// Bookings counted.
        resolved: usize,
    },
    /// Aggregation did not run.
    AggregationSkipped {
        /// Run id.
        run_id: Uuid,
        /// Why it was skipped.
        reason: String,
    },
    /// A run ended.
    RunCompleted {
        /// Run id.
        run_id: Uuid,
        /// Final status.
        status: RunStatus,
        /// Wall-clock duration in milliseconds.
        duration_ms: u64,
    },
}

impl PipelineEvent {
    /// Dotted event name, e.g. `table.completed`.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run.started",
            Self::TableStarted { .. } => "table.started",
            Self::TableCompleted { .. } => "table.completed",
            Self::AggregationCompleted { .. } => "aggregation.completed",
            Self::AggregationSkipped { .. } => "aggregation.skipped",
            Self::RunCompleted { .. } => "run.completed",
        }
    }

    /// The run this event belongs to.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        match self {
            Self::RunStarted { run_id }
            | Self::TableStarted { run_id, .. }
            | Self::TableCompleted { run_id, .. }
            | Self::AggregationCompleted { run_id, .. }
            | Self::AggregationSkipped { run_id, .. }
            | Self::RunCompleted { run_id, .. } => *run_id,
        }
    }
}
