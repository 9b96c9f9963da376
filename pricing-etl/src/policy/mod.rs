//! Per-table identity and update policies.
//!
//! A [`KeyPolicy`] names the key column(s) of a table, the full column list,
//! and optionally a version column. On conflict every non-key column is
//! overwritten; with a version column the overwrite only happens when the
//! incoming version is not older than the stored one, which makes repeated
//! upserts order-independent.

use serde::{Deserialize, Serialize};

use crate::errors::{EtlError, EtlResult};
use crate::model::{Booking, Building, Price, Product, Record, Row, RowKey, TableName};

/// Identity key and update rules for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPolicy {
    /// The table this policy applies to.
    pub table: TableName,
    /// Key columns, in key order.
    pub key_columns: Vec<String>,
    /// All columns, in storage order.
    pub columns: Vec<String>,
    /// Column whose value must not move backwards on conflict.
    #[serde(default)]
    pub version_column: Option<String>,
}

impl KeyPolicy {
    /// Creates a policy from explicit column lists.
    #[must_use]
    pub fn new<K, C>(table: TableName, key_columns: K, columns: C) -> Self
    where
        K: IntoIterator,
        K::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            table,
            key_columns: key_columns.into_iter().map(Into::into).collect(),
            columns: columns.into_iter().map(Into::into).collect(),
            version_column: None,
        }
    }

    /// Sets the version column.
    #[must_use]
    pub fn with_version_column(mut self, column: impl Into<String>) -> Self {
        self.version_column = Some(column.into());
        self
    }

    /// Returns the default policy for a table.
    ///
    /// Buildings, products and bookings are keyed by `id`; prices by
    /// `(product_id, currency)` with `last_updated` as the version column.
    #[must_use]
    pub fn for_table(table: TableName) -> Self {
        match table {
            TableName::Buildings => Self::new(table, ["id"], Building::COLUMNS.iter().copied()),
            TableName::Products => Self::new(table, ["id"], Product::COLUMNS.iter().copied()),
            TableName::Bookings => Self::new(table, ["id"], Booking::COLUMNS.iter().copied()),
            TableName::Prices => Self::new(
                table,
                ["product_id", "currency"],
                Price::COLUMNS.iter().copied(),
            )
            .with_version_column("last_updated"),
        }
    }

    /// Default policies for all tables, in pipeline order.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        TableName::PIPELINE_ORDER
            .iter()
            .map(|t| Self::for_table(*t))
            .collect()
    }

    /// Returns true if the table has a composite key.
    #[must_use]
    pub fn is_composite(&self) -> bool {
        self.key_columns.len() > 1
    }

    /// Returns true if `column` is part of the key.
    #[must_use]
    pub fn is_key_column(&self, column: &str) -> bool {
        self.key_columns.iter().any(|k| k == column)
    }

    /// Columns overwritten on conflict.
    pub fn update_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .map(String::as_str)
            .filter(|c| !self.is_key_column(c))
    }

    /// Checks the policy is internally consistent.
    pub fn validate(&self) -> EtlResult<()> {
        if self.key_columns.is_empty() {
            return Err(EtlError::Config(format!(
                "policy for '{}' has no key columns",
                self.table
            )));
        }
        for key in &self.key_columns {
            if !self.columns.contains(key) {
                return Err(EtlError::Config(format!(
                    "key column '{key}' is not a column of '{}'",
                    self.table
                )));
            }
        }
        if let Some(version) = &self.version_column {
            if !self.columns.contains(version) || self.is_key_column(version) {
                return Err(EtlError::Config(format!(
                    "version column '{version}' must be a non-key column of '{}'",
                    self.table
                )));
            }
        }
        Ok(())
    }

    /// Extracts the key of a row.
    ///
    /// Fails when a key column is missing or its value renders empty.
    pub fn key_of(&self, row: &Row) -> EtlResult<RowKey> {
        let mut parts = Vec::with_capacity(self.key_columns.len());
        for column in &self.key_columns {
            let value = row.get(column).ok_or_else(|| {
                EtlError::invalid_key(self.table, format!("missing key column '{column}'"))
            })?;
            let text = value.to_canonical();
            if text.is_empty() {
                return Err(EtlError::invalid_key(
                    self.table,
                    format!("empty value for key column '{column}'"),
                ));
            }
            parts.push((column.clone(), text));
        }
        Ok(RowKey::new(parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_single_key_policies() {
        for table in [TableName::Buildings, TableName::Products, TableName::Bookings] {
            let policy = KeyPolicy::for_table(table);
            assert_eq!(policy.key_columns, vec!["id".to_string()]);
            assert!(!policy.is_composite());
            assert!(policy.version_column.is_none());
            policy.validate().unwrap();
        }
    }

    #[test]
    fn test_price_policy_is_composite_and_versioned() {
        let policy = KeyPolicy::for_table(TableName::Prices);
        assert!(policy.is_composite());
        assert_eq!(policy.version_column.as_deref(), Some("last_updated"));
        let updates: Vec<_> = policy.update_columns().collect();
        assert_eq!(updates, vec!["value", "last_updated"]);
        policy.validate().unwrap();
    }

    #[test]
    fn test_defaults_follow_pipeline_order() {
        let tables: Vec<_> = KeyPolicy::defaults().iter().map(|p| p.table).collect();
        assert_eq!(tables, TableName::PIPELINE_ORDER.to_vec());
    }

    #[test]
    fn test_validate_rejects_unknown_key_column() {
        let policy = KeyPolicy::new(TableName::Buildings, ["code"], ["id", "name"]);
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_key_as_version() {
        let policy =
            KeyPolicy::new(TableName::Buildings, ["id"], ["id", "name"]).with_version_column("id");
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_key_of_composite_row() {
        let policy = KeyPolicy::for_table(TableName::Prices);
        let row = Row::new()
            .with("product_id", "P1")
            .with("currency", "USD")
            .with("value", 100.0);
        let key = policy.key_of(&row).unwrap();
        assert_eq!(key.to_string(), "product_id=P1,currency=USD");
    }

    #[test]
    fn test_key_of_missing_or_empty() {
        let policy = KeyPolicy::for_table(TableName::Buildings);
        assert!(matches!(
            policy.key_of(&Row::new().with("name", "x")),
            Err(EtlError::InvalidKey { .. })
        ));
        assert!(matches!(
            policy.key_of(&Row::new().with("id", "")),
            Err(EtlError::InvalidKey { .. })
        ));
    }
}
