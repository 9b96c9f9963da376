//! Pipeline building and execution.
//!
//! A [`Pipeline`] reads the four tables in dependency order, writes each one
//! through its target, aggregates bookings per product cluster and reports
//! everything to a [`crate::sink::Sink`].

mod builder;
mod report;
mod runner;
mod status;

#[cfg(test)]
mod integration_tests;

pub use builder::PipelineBuilder;
pub use report::{AggregationOutcome, RunReport, SinkError};
pub use runner::Pipeline;
pub use status::RunStatus;
