//! Record sources.
//!
//! A [`RecordSource`] supplies one table's typed, already-validated records
//! per call. Discovering and parsing input files happens upstream of this
//! crate; sources here only hand over materialized batches.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

use crate::errors::{EtlError, EtlResult};
use crate::model::{Booking, Building, Price, Product, TableBatch, TableName};

/// Supplies the records of one logical table.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Reads every record of a table.
    ///
    /// Fails with [`EtlError::SourceUnavailable`] when the table cannot be read.
    async fn read(&self, table: TableName) -> EtlResult<TableBatch>;
}

/// An in-memory snapshot of all four tables.
#[derive(Debug, Default)]
pub struct MemorySource {
    batches: RwLock<HashMap<TableName, TableBatch>>,
    unavailable: RwLock<HashSet<TableName>>,
}

impl MemorySource {
    /// Creates an empty snapshot; unset tables read as empty batches.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the buildings batch.
    #[must_use]
    pub fn with_buildings(self, records: Vec<Building>) -> Self {
        self.with_batch(TableBatch::Buildings(records))
    }

    /// Sets the products batch.
    #[must_use]
    pub fn with_products(self, records: Vec<Product>) -> Self {
        self.with_batch(TableBatch::Products(records))
    }

    /// Sets the bookings batch.
    #[must_use]
    pub fn with_bookings(self, records: Vec<Booking>) -> Self {
        self.with_batch(TableBatch::Bookings(records))
    }

    /// Sets the prices batch.
    #[must_use]
    pub fn with_prices(self, records: Vec<Price>) -> Self {
        self.with_batch(TableBatch::Prices(records))
    }

    /// Sets a batch for its table.
    #[must_use]
    pub fn with_batch(self, batch: TableBatch) -> Self {
        self.batches.write().insert(batch.table(), batch);
        self
    }

    /// Makes every read of `table` fail.
    pub fn mark_unavailable(&self, table: TableName) {
        self.unavailable.write().insert(table);
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn read(&self, table: TableName) -> EtlResult<TableBatch> {
        if self.unavailable.read().contains(&table) {
            return Err(EtlError::source_unavailable(table, "table marked unavailable"));
        }
        Ok(self
            .batches
            .read()
            .get(&table)
            .cloned()
            .unwrap_or_else(|| TableBatch::empty(table)))
    }
}
