//! # Pricing ETL
//!
//! Ingests hotel pricing snapshots (buildings, products, bookings and
//! prices), upserts them idempotently into a store and counts bookings per
//! product cluster.
//!
//! - **Idempotent upserts**: a key policy per table decides which columns
//!   identify a row; re-running the same snapshot leaves the store unchanged
//! - **Sharded writes**: rows are routed to shards by key hash so concurrent
//!   writers never touch the same key
//! - **Per-record failure isolation**: a rejected record is reported, the rest
//!   of its table still lands
//! - **Product clustering**: products with equal arrival date, room type,
//!   beds, grade and pool share a cluster key
//! - **Cancellation**: runs stop between records and report what they skipped
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pricing_etl::prelude::*;
//!
//! let pipeline = PipelineBuilder::new()
//!     .with_source(Arc::new(source))
//!     .with_store(Arc::new(SqliteStore::open(SqliteConfig::new("etl.db"))?))
//!     .with_sink(Arc::new(JsonFileSink::new("out")))
//!     .build()?;
//!
//! let report = pipeline.run().await;
//! println!("{}", report.status);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod cluster;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod model;
pub mod observability;
pub mod pipeline;
pub mod policy;
pub mod sink;
pub mod source;
pub mod store;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::cluster::{
        derive_cluster_key, AggregationEngine, AggregationReport, ClusterAggregate, ClusterKey,
    };
    pub use crate::config::{AggregationConfig, EtlConfig, UpsertConfig};
    pub use crate::engine::{RetryConfig, TableRunResult, UpsertEngine};
    pub use crate::errors::{EtlError, EtlResult, KeyCollisionRisk, StoreError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent};
    pub use crate::model::{Booking, Building, Price, Product, Record, TableBatch, TableName};
    pub use crate::observability::init_logging;
    pub use crate::pipeline::{
        AggregationOutcome, Pipeline, PipelineBuilder, RunReport, RunStatus,
    };
    pub use crate::policy::KeyPolicy;
    pub use crate::sink::{JsonFileSink, JsonLinesCuratedWriter, LoggingSink, MemorySink, Sink};
    pub use crate::source::{MemorySource, RecordSource};
    pub use crate::store::{MemoryStore, SqliteConfig, SqliteStore, Store};
}
