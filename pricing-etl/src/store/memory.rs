use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use super::{is_stale, MergeOutcome, Store, StoreSession};
use crate::errors::StoreError;
use crate::model::{Row, RowKey, TableName};
use crate::policy::KeyPolicy;

type Rows = DashMap<(TableName, RowKey), Row>;

/// In-memory store for tests and dry runs.
///
/// Each merge goes through the map's entry API, so it is atomic per key
/// even when shards run concurrently.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    rows: Arc<Rows>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored row for a key.
    #[must_use]
    pub fn row(&self, table: TableName, key: &RowKey) -> Option<Row> {
        self.rows
            .get(&(table, key.clone()))
            .map(|entry| entry.value().clone())
    }

    /// Returns every stored row of a table, sorted by key.
    #[must_use]
    pub fn rows(&self, table: TableName) -> Vec<(RowKey, Row)> {
        let mut rows: Vec<_> = self
            .rows
            .iter()
            .filter(|entry| entry.key().0 == table)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    /// Number of rows in a table.
    #[must_use]
    pub fn len(&self, table: TableName) -> usize {
        self.rows.iter().filter(|entry| entry.key().0 == table).count()
    }

    /// Returns true if no table has any rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Removes all rows.
    pub fn clear(&self) {
        self.rows.clear();
    }

    pub(crate) fn merge_row(&self, policy: &KeyPolicy, row: &Row) -> Result<MergeOutcome, StoreError> {
        let key = policy
            .key_of(row)
            .map_err(|e| StoreError::permanent(e.to_string()))?;

        match self.rows.entry((policy.table, key)) {
            Entry::Vacant(slot) => {
                slot.insert(row.clone());
                Ok(MergeOutcome::Inserted)
            }
            Entry::Occupied(mut slot) => {
                if is_stale(policy, slot.get(), row) {
                    return Ok(MergeOutcome::Stale);
                }
                let stored = slot.get_mut();
                for column in policy.update_columns() {
                    if let Some(value) = row.get(column) {
                        stored.set(column, value.clone());
                    }
                }
                Ok(MergeOutcome::Updated)
            }
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn acquire(&self) -> Result<Box<dyn StoreSession>, StoreError> {
        Ok(Box::new(MemorySession {
            store: self.clone(),
        }))
    }
}

struct MemorySession {
    store: MemoryStore,
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn merge(&mut self, policy: &KeyPolicy, row: &Row) -> Result<MergeOutcome, StoreError> {
        self.store.merge_row(policy, row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;
    use pretty_assertions::assert_eq;

    fn building(id: &str, name: &str) -> Row {
        Row::new()
            .with("id", id)
            .with("name", name)
            .with("type", "hotel")
    }

    #[tokio::test]
    async fn test_insert_then_update() {
        let store = MemoryStore::new();
        let policy = KeyPolicy::for_table(TableName::Buildings);
        let mut session = store.acquire().await.unwrap();

        let first = session.merge(&policy, &building("B1", "Old")).await.unwrap();
        let second = session.merge(&policy, &building("B1", "New")).await.unwrap();

        assert_eq!(first, MergeOutcome::Inserted);
        assert_eq!(second, MergeOutcome::Updated);
        assert_eq!(store.len(TableName::Buildings), 1);

        let key = policy.key_of(&building("B1", "")).unwrap();
        let stored = store.row(TableName::Buildings, &key).unwrap();
        assert_eq!(stored.get("name"), Some(&Value::from("New")));
    }

    #[tokio::test]
    async fn test_missing_key_is_permanent() {
        let store = MemoryStore::new();
        let policy = KeyPolicy::for_table(TableName::Buildings);
        let mut session = store.acquire().await.unwrap();

        let err = session
            .merge(&policy, &Row::new().with("name", "No id"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::errors::StoreErrorKind::Permanent);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_tables_are_isolated() {
        let store = MemoryStore::new();
        let mut session = store.acquire().await.unwrap();
        let buildings = KeyPolicy::for_table(TableName::Buildings);
        let bookings = KeyPolicy::new(TableName::Bookings, ["id"], ["id", "name", "type"]);

        session.merge(&buildings, &building("X", "a")).await.unwrap();
        session.merge(&bookings, &building("X", "b")).await.unwrap();

        assert_eq!(store.len(TableName::Buildings), 1);
        assert_eq!(store.len(TableName::Bookings), 1);
        assert_eq!(store.rows(TableName::Bookings).len(), 1);
    }
}
