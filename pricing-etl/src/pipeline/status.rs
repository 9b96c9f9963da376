//! Overall run status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a run ended.
///
/// When several apply, the first in this order wins: cancelled, failed,
/// degraded, succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every table and the aggregation completed without errors.
    Succeeded,
    /// The run completed but recorded non-fatal failures.
    Degraded,
    /// A table's source could not be read, or the store could not be
    /// prepared for writing.
    Failed,
    /// The run was cancelled before it finished.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Degraded => write!(f, "degraded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl RunStatus {
    /// Picks the status from what the run observed.
    #[must_use]
    pub fn resolve(cancelled: bool, unavailable: bool, degraded: bool) -> Self {
        if cancelled {
            Self::Cancelled
        } else if unavailable {
            Self::Failed
        } else if degraded {
            Self::Degraded
        } else {
            Self::Succeeded
        }
    }

    /// Returns true for a clean run.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns true if the run produced complete output, possibly with
    /// recorded failures.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Degraded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_display() {
        assert_eq!(RunStatus::Succeeded.to_string(), "succeeded");
        assert_eq!(RunStatus::Degraded.to_string(), "degraded");
        assert_eq!(RunStatus::Failed.to_string(), "failed");
        assert_eq!(RunStatus::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_run_status_serde() {
        let json = serde_json::to_string(&RunStatus::Degraded).unwrap();
        assert_eq!(json, "\"degraded\"");
        let back: RunStatus = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(back, RunStatus::Cancelled);
    }

    #[test]
    fn test_resolve_precedence() {
        assert_eq!(RunStatus::resolve(true, true, true), RunStatus::Cancelled);
        assert_eq!(RunStatus::resolve(false, true, true), RunStatus::Failed);
        assert_eq!(RunStatus::resolve(false, false, true), RunStatus::Degraded);
        assert_eq!(RunStatus::resolve(false, false, false), RunStatus::Succeeded);
    }

    #[test]
    fn test_status_predicates() {
        assert!(RunStatus::Succeeded.is_success());
        assert!(RunStatus::Degraded.is_complete());
        assert!(!RunStatus::Degraded.is_success());
        assert!(!RunStatus::Failed.is_complete());
        assert!(!RunStatus::Cancelled.is_complete());
    }
}
