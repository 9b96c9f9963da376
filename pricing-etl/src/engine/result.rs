//! Per-table upsert outcomes.

use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::model::TableName;
use crate::store::MergeOutcome;

/// A failure recorded while upserting one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    /// Key of the failed record (`col=value,...`), or `None` for shard-level errors.
    pub key: Option<String>,
    /// Shard the record was assigned to, if it got that far.
    pub shard: Option<usize>,
    /// Error label, e.g. `store_permanent`.
    pub kind: String,
    /// Error message.
    pub message: String,
    /// Attempts made before giving up.
    pub attempts: usize,
}

/// Outcome of upserting one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRunResult {
    /// The table.
    pub table: TableName,
    /// Records handed to the engine.
    pub attempted: usize,
    /// Records the store accepted (inserted + updated + stale).
    pub applied: usize,
    /// Records that could not be applied.
    pub failed: usize,
    /// Records never dispatched because the run was cancelled.
    pub skipped: usize,
    /// Merges that created a row.
    pub inserted: usize,
    /// Merges that overwrote a row.
    pub updated: usize,
    /// Merges that kept a newer stored row.
    pub stale: usize,
    /// Every failure, record- or shard-level.
    pub errors: Vec<RecordError>,
    /// Set when the table's source could not be read at all.
    pub source_error: Option<String>,
    /// Set when the write target could not take any record of the table.
    #[serde(default)]
    pub target_error: Option<String>,
    /// Whether cancellation cut this table short.
    pub cancelled: bool,
    /// Wall-clock time spent on the table, in milliseconds.
    pub duration_ms: u64,
}

impl TableRunResult {
    /// Creates an empty result for a table.
    #[must_use]
    pub fn new(table: TableName) -> Self {
        Self {
            table,
            attempted: 0,
            applied: 0,
            failed: 0,
            skipped: 0,
            inserted: 0,
            updated: 0,
            stale: 0,
            errors: Vec::new(),
            source_error: None,
            target_error: None,
            cancelled: false,
            duration_ms: 0,
        }
    }

    /// Creates the result for a table whose source was unreadable.
    #[must_use]
    pub fn source_unavailable(table: TableName, reason: impl Into<String>) -> Self {
        let mut result = Self::new(table);
        result.source_error = Some(reason.into());
        result
    }

    /// Creates the result for a table whose records could not be written
    /// because the store itself was unusable. Every record counts as failed.
    #[must_use]
    pub fn target_unavailable(table: TableName, records: usize, error: &StoreError) -> Self {
        let mut result = Self::new(table);
        result.attempted = records;
        result.failed = records;
        result.target_error = Some(error.to_string());
        result.errors.push(RecordError {
            key: None,
            shard: None,
            kind: error.kind.as_str().to_string(),
            message: format!("{records} records not applied: {}", error.message),
            attempts: 0,
        });
        result
    }

    /// Creates the result for a table that was never started.
    #[must_use]
    pub fn not_started(table: TableName) -> Self {
        let mut result = Self::new(table);
        result.cancelled = true;
        result
    }

    /// Records one applied merge.
    pub fn record_applied(&mut self, outcome: MergeOutcome) {
        self.applied += 1;
        match outcome {
            MergeOutcome::Inserted => self.inserted += 1,
            MergeOutcome::Updated => self.updated += 1,
            MergeOutcome::Stale => self.stale += 1,
        }
    }

    /// Records one failed record.
    pub fn record_failure(&mut self, error: RecordError) {
        self.failed += 1;
        self.errors.push(error);
    }

    /// Folds a shard's counts into this result.
    pub fn absorb(&mut self, shard: Self) {
        self.applied += shard.applied;
        self.failed += shard.failed;
        self.skipped += shard.skipped;
        self.inserted += shard.inserted;
        self.updated += shard.updated;
        self.stale += shard.stale;
        self.errors.extend(shard.errors);
        self.cancelled |= shard.cancelled;
    }

    /// True when the source was unreadable.
    #[must_use]
    pub fn is_source_failure(&self) -> bool {
        self.source_error.is_some()
    }

    /// True when the source or the write target was unavailable for the
    /// whole table.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        self.source_error.is_some() || self.target_error.is_some()
    }

    /// True when any record failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// True when every record was applied.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !self.is_unavailable() && !self.cancelled && self.failed == 0 && self.skipped == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(key: &str) -> RecordError {
        RecordError {
            key: Some(key.to_string()),
            shard: Some(0),
            kind: "store_permanent".to_string(),
            message: "rejected".to_string(),
            attempts: 1,
        }
    }

    #[test]
    fn test_record_applied_counts_outcomes() {
        let mut result = TableRunResult::new(TableName::Prices);
        result.record_applied(MergeOutcome::Inserted);
        result.record_applied(MergeOutcome::Updated);
        result.record_applied(MergeOutcome::Stale);

        assert_eq!(result.applied, 3);
        assert_eq!((result.inserted, result.updated, result.stale), (1, 1, 1));
    }

    #[test]
    fn test_absorb_merges_shards() {
        let mut total = TableRunResult::new(TableName::Bookings);
        total.attempted = 3;

        let mut a = TableRunResult::new(TableName::Bookings);
        a.record_applied(MergeOutcome::Inserted);
        let mut b = TableRunResult::new(TableName::Bookings);
        b.record_failure(error("id=X"));
        b.skipped = 1;
        b.cancelled = true;

        total.absorb(a);
        total.absorb(b);

        assert_eq!(total.applied, 1);
        assert_eq!(total.failed, 1);
        assert_eq!(total.skipped, 1);
        assert!(total.cancelled);
        assert_eq!(total.errors.len(), 1);
        assert!(!total.is_clean());
    }

    #[test]
    fn test_source_unavailable_result() {
        let result = TableRunResult::source_unavailable(TableName::Prices, "missing");
        assert!(result.is_source_failure());
        assert_eq!(result.attempted, 0);
        assert!(!result.is_clean());
    }

    #[test]
    fn test_target_unavailable_fails_every_record() {
        let error = StoreError::permanent("ddl denied");
        let result = TableRunResult::target_unavailable(TableName::Bookings, 4, &error);

        assert_eq!((result.attempted, result.failed, result.applied), (4, 4, 0));
        assert!(result.is_unavailable());
        assert!(!result.is_source_failure());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, "store_permanent");
        assert!(result.errors[0].message.contains("ddl denied"));
        assert!(!result.is_clean());
    }
}
