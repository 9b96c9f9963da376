//! Target store abstraction.
//!
//! A [`Store`] hands out scoped [`StoreSession`]s. A shard acquires one
//! session for its whole batch; dropping the session releases the underlying
//! connection whether the batch finished, failed or was cancelled.
//!
//! Every [`StoreSession::merge`] is a single atomic insert-or-update from the
//! store's point of view.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{SqliteConfig, SqliteStore};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::StoreError;
use crate::model::Row;
use crate::policy::KeyPolicy;

/// What a merge did to the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// No row existed for the key; all columns were inserted.
    Inserted,
    /// A row existed; its non-key columns were overwritten.
    Updated,
    /// A row with a newer version column already existed and was kept.
    Stale,
}

impl fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inserted => write!(f, "inserted"),
            Self::Updated => write!(f, "updated"),
            Self::Stale => write!(f, "stale"),
        }
    }
}

/// A store that accepts keyed merges.
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns a short name for logs.
    fn name(&self) -> &str;

    /// Prepares the store for the given tables (e.g. creates them).
    async fn prepare(&self, _policies: &[KeyPolicy]) -> Result<(), StoreError> {
        Ok(())
    }

    /// Acquires a session (connection) for a batch of merges.
    ///
    /// Fails with a connection error when no usable connection can be had.
    async fn acquire(&self) -> Result<Box<dyn StoreSession>, StoreError>;
}

/// A scoped connection to a [`Store`].
///
/// Implementations release their connection on drop.
#[async_trait]
pub trait StoreSession: Send {
    /// Inserts the row if its key is absent, otherwise overwrites every
    /// non-key column (subject to the policy's version column).
    async fn merge(&mut self, policy: &KeyPolicy, row: &Row) -> Result<MergeOutcome, StoreError>;
}

/// Returns true when the incoming row's version is older than the stored one.
///
/// Rows without a comparable version are never considered stale.
pub(crate) fn is_stale(policy: &KeyPolicy, stored: &Row, incoming: &Row) -> bool {
    let Some(column) = policy.version_column.as_deref() else {
        return false;
    };
    match (stored.get(column), incoming.get(column)) {
        (Some(stored), Some(incoming)) => {
            incoming.compare(stored) == Some(std::cmp::Ordering::Less)
        }
        _ => false,
    }
}
