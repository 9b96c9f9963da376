//! Error types for the pricing ETL.
//!
//! The taxonomy mirrors how failures propagate through a run: a whole table
//! can be unreadable, a single record can be rejected by the store, and a
//! product can be refused a cluster key. Only the first kind is fatal, and
//! only for its own table.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::model::TableName;

/// Convenience alias used across the crate.
pub type EtlResult<T> = Result<T, EtlError>;

/// The main error type for pricing ETL operations.
#[derive(Debug, Error)]
pub enum EtlError {
    /// A whole table could not be read from its source.
    #[error("source for table '{table}' is unavailable: {reason}")]
    SourceUnavailable {
        /// The table that could not be read.
        table: TableName,
        /// Why the source failed.
        reason: String,
    },

    /// A record-level or connection-level store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A product carries a delimiter inside a cluster key field.
    #[error("{0}")]
    KeyCollisionRisk(#[from] KeyCollisionRisk),

    /// A record is missing a key column or carries an empty key.
    #[error("invalid key for table '{table}': {reason}")]
    InvalidKey {
        /// The table being written.
        table: TableName,
        /// What is wrong with the key.
        reason: String,
    },

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// The output sink rejected a write.
    #[error("sink error: {0}")]
    Sink(String),

    /// The run was cancelled.
    #[error("run cancelled: {0}")]
    Cancelled(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EtlError {
    /// Creates a source-unavailable error.
    #[must_use]
    pub fn source_unavailable(table: TableName, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            table,
            reason: reason.into(),
        }
    }

    /// Creates an invalid-key error.
    #[must_use]
    pub fn invalid_key(table: TableName, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            table,
            reason: reason.into(),
        }
    }

    /// Short machine-readable label, used in run reports.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable { .. } => "source_unavailable",
            Self::Store(err) => err.kind.as_str(),
            Self::KeyCollisionRisk(_) => "key_collision_risk",
            Self::InvalidKey { .. } => "invalid_key",
            Self::Config(_) => "config",
            Self::Sink(_) => "sink",
            Self::Cancelled(_) => "cancelled",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
        }
    }
}

/// Classification of a store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorKind {
    /// Retryable: lock contention, busy database, timeouts.
    Transient,
    /// Not retryable: the record itself was rejected.
    Permanent,
    /// The connection is unusable; the rest of the shard cannot proceed.
    Connection,
}

impl StoreErrorKind {
    /// Returns the snake-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "store_transient",
            Self::Permanent => "store_permanent",
            Self::Connection => "store_connection",
        }
    }
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
            Self::Connection => write!(f, "connection"),
        }
    }
}

/// Error raised by a [`crate::store::Store`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} store error: {message}")]
pub struct StoreError {
    /// The failure class.
    pub kind: StoreErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl StoreError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Transient,
            message: message.into(),
        }
    }

    /// Creates a permanent error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Permanent,
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Connection,
            message: message.into(),
        }
    }

    /// Returns true if the error may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind == StoreErrorKind::Transient
    }

    /// Returns true if the session that produced this error is unusable.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        self.kind == StoreErrorKind::Connection
    }

    /// Turns an exhausted transient error into a permanent one.
    #[must_use]
    pub fn demote(self, attempts: usize) -> Self {
        if self.kind == StoreErrorKind::Transient {
            Self::permanent(format!(
                "gave up after {attempts} attempts: {}",
                self.message
            ))
        } else {
            self
        }
    }
}

/// Raised when a cluster key field contains the key delimiter.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("product '{product_id}' field '{field}' contains the cluster key delimiter: {value:?}")]
pub struct KeyCollisionRisk {
    /// The product whose derivation was refused.
    pub product_id: String,
    /// The offending field.
    pub field: String,
    /// The raw field value.
    pub value: String,
}

impl KeyCollisionRisk {
    /// Creates a new collision-risk error.
    #[must_use]
    pub fn new(
        product_id: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            field: field.into(),
            value: value.into(),
        }
    }
}
