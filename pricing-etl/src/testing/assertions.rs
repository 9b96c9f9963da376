//! Assertions over per-table results.

use crate::engine::TableRunResult;

/// Asserts `(attempted, applied, failed, skipped)` for a table result.
///
/// # Panics
///
/// Panics if any count differs.
pub fn assert_counts(
    result: &TableRunResult,
    attempted: usize,
    applied: usize,
    failed: usize,
    skipped: usize,
) {
    assert_eq!(
        (result.attempted, result.applied, result.failed, result.skipped),
        (attempted, applied, failed, skipped),
        "unexpected counts for table '{}': errors = {:?}",
        result.table,
        result.errors
    );
}

/// Asserts a table applied every record without errors.
///
/// # Panics
///
/// Panics if anything failed, was skipped, or the source was unreadable.
pub fn assert_table_clean(result: &TableRunResult) {
    assert!(
        result.is_clean(),
        "table '{}' was not clean: failed={} skipped={} source_error={:?} errors={:?}",
        result.table,
        result.failed,
        result.skipped,
        result.source_error,
        result.errors
    );
    assert_eq!(result.applied, result.attempted);
}
