//! Logical table names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::EtlError;

/// One of the four record sets ingested per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableName {
    /// Buildings keyed by `id`.
    Buildings,
    /// Products keyed by `id`.
    Products,
    /// Bookings keyed by `id`.
    Bookings,
    /// Prices keyed by `(product_id, currency)`.
    Prices,
}

impl TableName {
    /// The order in which a run upserts tables.
    ///
    /// Buildings and products come first because later tables reference them,
    /// even though referential integrity is not enforced here.
    pub const PIPELINE_ORDER: [Self; 4] = [
        Self::Buildings,
        Self::Products,
        Self::Bookings,
        Self::Prices,
    ];

    /// Returns the table name as stored.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buildings => "buildings",
            Self::Products => "products",
            Self::Bookings => "bookings",
            Self::Prices => "prices",
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableName {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buildings" => Ok(Self::Buildings),
            "products" => Ok(Self::Products),
            "bookings" => Ok(Self::Bookings),
            "prices" => Ok(Self::Prices),
            other => Err(EtlError::Config(format!("unknown table '{other}'"))),
        }
    }
}
