//! Product clustering: cluster key derivation and booking aggregation.

mod aggregate;
mod key;

pub use aggregate::{
    bookings_for_cluster, AggregationEngine, AggregationReport, AggregationSummary,
    ClusterAggregate, ProductIndex,
};
pub use key::{derive_cluster_key, ClusterAttributes, ClusterKey, CLUSTER_KEY_DELIMITER};
