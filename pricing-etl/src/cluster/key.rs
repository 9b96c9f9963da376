//! Cluster key derivation.
//!
//! A cluster key is the five clustering attributes of a product joined by
//! [`CLUSTER_KEY_DELIMITER`] in the order
//! `arrival_date|room_type|no_of_beds|grade|private_pool`, e.g.
//! `2024-06-01|suite|2|5|true`.
//!
//! Only `room_type` is free text. A `room_type` containing the delimiter is
//! refused with [`KeyCollisionRisk`] instead of being escaped, so every key
//! splits back into exactly the attributes it was built from.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::KeyCollisionRisk;
use crate::model::{Product, DATE_FORMAT};

/// Separator between cluster key fields.
pub const CLUSTER_KEY_DELIMITER: char = '|';

/// The product attributes that define a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterAttributes {
    /// Arrival date.
    pub arrival_date: NaiveDate,
    /// Room type.
    pub room_type: String,
    /// Number of beds.
    pub no_of_beds: u32,
    /// Quality grade.
    pub grade: i32,
    /// Private pool flag.
    pub private_pool: bool,
}

impl ClusterAttributes {
    /// Creates attributes from explicit values.
    #[must_use]
    pub fn new(
        arrival_date: NaiveDate,
        room_type: impl Into<String>,
        no_of_beds: u32,
        grade: i32,
        private_pool: bool,
    ) -> Self {
        Self {
            arrival_date,
            room_type: room_type.into(),
            no_of_beds,
            grade,
            private_pool,
        }
    }

    /// Takes the clustering attributes of a product.
    #[must_use]
    pub fn from_product(product: &Product) -> Self {
        Self {
            arrival_date: product.arrival_date,
            room_type: product.room_type.clone(),
            no_of_beds: product.no_of_beds,
            grade: product.grade,
            private_pool: product.private_pool,
        }
    }

    /// Encodes the attributes, or `None` if `room_type` holds the delimiter.
    #[must_use]
    pub fn key(&self) -> Option<ClusterKey> {
        if self.room_type.contains(CLUSTER_KEY_DELIMITER) {
            return None;
        }
        let d = CLUSTER_KEY_DELIMITER;
        Some(ClusterKey(format!(
            "{}{d}{}{d}{}{d}{}{d}{}",
            self.arrival_date.format(DATE_FORMAT),
            self.room_type,
            self.no_of_beds,
            self.grade,
            self.private_pool,
        )))
    }
}

/// A derived cluster key.
///
/// Equal keys mean equal [`ClusterAttributes`] and vice versa.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterKey(String);

impl ClusterKey {
    /// Returns the encoded key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decodes the key back into its attributes.
    ///
    /// Returns `None` for strings that were not produced by
    /// [`derive_cluster_key`], which can only arrive through deserialization.
    #[must_use]
    pub fn attributes(&self) -> Option<ClusterAttributes> {
        let mut fields = self.0.split(CLUSTER_KEY_DELIMITER);
        let arrival_date = NaiveDate::parse_from_str(fields.next()?, DATE_FORMAT).ok()?;
        let room_type = fields.next()?.to_string();
        let no_of_beds = fields.next()?.parse().ok()?;
        let grade = fields.next()?.parse().ok()?;
        let private_pool = match fields.next()? {
            "true" => true,
            "false" => false,
            _ => return None,
        };
        if fields.next().is_some() {
            return None;
        }
        Some(ClusterAttributes {
            arrival_date,
            room_type,
            no_of_beds,
            grade,
            private_pool,
        })
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ClusterKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derives the cluster key of a product.
///
/// # Errors
///
/// Returns [`KeyCollisionRisk`] when `room_type` contains the delimiter.
pub fn derive_cluster_key(product: &Product) -> Result<ClusterKey, KeyCollisionRisk> {
    ClusterAttributes::from_product(product)
        .key()
        .ok_or_else(|| KeyCollisionRisk::new(&product.id, "room_type", &product.room_type))
}
