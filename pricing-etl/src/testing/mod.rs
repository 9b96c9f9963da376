//! Testing utilities for pricing ETL runs.
//!
//! This module provides:
//! - Record fixtures and a sample snapshot
//! - A fault-injecting store
//! - Assertions over run results

mod assertions;
pub mod fixtures;
mod mocks;

pub use assertions::{assert_counts, assert_table_clean};
pub use fixtures::{
    at_hour, booking, building, date, price, product, sample_source, ProductBuilder,
};
pub use mocks::FaultyStore;
