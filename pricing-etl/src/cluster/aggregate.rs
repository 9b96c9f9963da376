//! Booking counts per cluster.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Instant;

use super::key::{derive_cluster_key, ClusterAttributes, ClusterKey};
use crate::config::AggregationConfig;
use crate::errors::KeyCollisionRisk;
use crate::model::{Booking, Product};

/// Read-only `product_id -> ClusterKey` lookup built once per run.
///
/// Products refused a key are remembered so their bookings can be told
/// apart from bookings of unknown products. On duplicate product ids the
/// last product wins, for the key and for the rejection alike.
#[derive(Debug, Clone, Default)]
pub struct ProductIndex {
    keys: HashMap<String, ClusterKey>,
    rejected_ids: HashSet<String>,
    rejected: Vec<KeyCollisionRisk>,
    duplicate_products: usize,
}

impl ProductIndex {
    /// Derives a key for every product.
    #[must_use]
    pub fn build(products: &[Product]) -> Self {
        let mut index = Self::default();
        let mut seen = HashSet::with_capacity(products.len());
        let mut risks: HashMap<String, KeyCollisionRisk> = HashMap::new();

        for product in products {
            if !seen.insert(product.id.as_str()) {
                index.duplicate_products += 1;
            }
            match derive_cluster_key(product) {
                Ok(key) => {
                    index.rejected_ids.remove(&product.id);
                    risks.remove(&product.id);
                    index.keys.insert(product.id.clone(), key);
                }
                Err(risk) => {
                    tracing::warn!(
                        product_id = %product.id,
                        field = %risk.field,
                        value = %risk.value,
                        "Product refused a cluster key"
                    );
                    index.keys.remove(&product.id);
                    index.rejected_ids.insert(product.id.clone());
                    risks.insert(product.id.clone(), risk);
                }
            }
        }

        index.rejected = risks.into_values().collect();
        index.rejected.sort_by(|a, b| a.product_id.cmp(&b.product_id));
        index
    }

    /// Cluster key of a product, if it has one.
    #[must_use]
    pub fn resolve(&self, product_id: &str) -> Option<&ClusterKey> {
        self.keys.get(product_id)
    }

    /// Whether the product was refused a key.
    #[must_use]
    pub fn is_rejected(&self, product_id: &str) -> bool {
        self.rejected_ids.contains(product_id)
    }

    /// Products whose surviving record was refused a key, by product id.
    #[must_use]
    pub fn rejected(&self) -> &[KeyCollisionRisk] {
        &self.rejected
    }

    /// Product ids that appeared more than once.
    #[must_use]
    pub fn duplicate_products(&self) -> usize {
        self.duplicate_products
    }

    /// Number of products with a key.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if no product has a key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Bookings counted under one cluster key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAggregate {
    /// The cluster.
    pub cluster_key: ClusterKey,
    /// Booking rows resolved to this cluster.
    pub booking_count: usize,
    /// Sorted member booking ids, when collection is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_ids: Option<Vec<String>>,
}

/// Output of one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationReport {
    /// One entry per cluster with at least one booking.
    pub aggregates: HashMap<ClusterKey, ClusterAggregate>,
    /// Bookings received.
    pub total_bookings: usize,
    /// Booking rows counted into some cluster.
    pub resolved: usize,
    /// Booking rows whose product is unknown.
    pub unresolved: usize,
    /// Booking rows whose product was refused a key.
    pub excluded_rejected: usize,
    /// Rows repeating an earlier booking id. Diagnostic only: every row is
    /// still counted.
    pub duplicate_bookings: usize,
    /// Products refused a key.
    pub rejected_products: Vec<KeyCollisionRisk>,
    /// Repeated product ids.
    pub duplicate_products: usize,
}

impl AggregationReport {
    /// Aggregates sorted by cluster key.
    #[must_use]
    pub fn sorted_aggregates(&self) -> Vec<ClusterAggregate> {
        let mut out: Vec<_> = self.aggregates.values().cloned().collect();
        out.sort_by(|a, b| a.cluster_key.cmp(&b.cluster_key));
        out
    }

    /// Count for one cluster, zero if absent.
    #[must_use]
    pub fn count_for(&self, key: &ClusterKey) -> usize {
        self.aggregates.get(key).map_or(0, |a| a.booking_count)
    }

    /// Sum of all cluster counts.
    #[must_use]
    pub fn total_counted(&self) -> usize {
        self.aggregates.values().map(|a| a.booking_count).sum()
    }

    /// Counters without the aggregate rows.
    #[must_use]
    pub fn summary(&self) -> AggregationSummary {
        AggregationSummary {
            clusters: self.aggregates.len(),
            total_bookings: self.total_bookings,
            resolved: self.resolved,
            unresolved: self.unresolved,
            excluded_rejected: self.excluded_rejected,
            duplicate_bookings: self.duplicate_bookings,
            rejected_products: self.rejected_products.clone(),
            duplicate_products: self.duplicate_products,
        }
    }
}

/// Aggregation counters as reported per run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSummary {
    /// Distinct clusters emitted.
    pub clusters: usize,
    /// Bookings received.
    pub total_bookings: usize,
    /// Booking rows counted.
    pub resolved: usize,
    /// Booking rows with an unknown product.
    pub unresolved: usize,
    /// Booking rows whose product was refused a key.
    pub excluded_rejected: usize,
    /// Repeated booking ids.
    pub duplicate_bookings: usize,
    /// Products refused a key.
    pub rejected_products: Vec<KeyCollisionRisk>,
    /// Repeated product ids.
    pub duplicate_products: usize,
}

#[derive(Debug, Default)]
struct Partial {
    groups: HashMap<ClusterKey, (usize, Vec<String>)>,
    resolved: usize,
    unresolved: usize,
    excluded_rejected: usize,
}

impl Partial {
    fn merge(mut self, other: Self) -> Self {
        for (key, (count, ids)) in other.groups {
            let slot = self.groups.entry(key).or_default();
            slot.0 += count;
            slot.1.extend(ids);
        }
        self.resolved += other.resolved;
        self.unresolved += other.unresolved;
        self.excluded_rejected += other.excluded_rejected;
        self
    }
}

/// Groups bookings by their product's cluster key.
#[derive(Debug, Clone, Default)]
pub struct AggregationEngine {
    config: AggregationConfig,
}

impl AggregationEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(config: AggregationConfig) -> Self {
        Self { config }
    }

    /// The engine's configuration.
    #[must_use]
    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Counts bookings per cluster.
    ///
    /// Every booking row whose product resolves is counted, so the result
    /// does not depend on input order. Bookings of unknown or rejected
    /// products are left out of every aggregate. Repeated booking ids are
    /// only reported in [`AggregationReport::duplicate_bookings`].
    #[must_use]
    pub fn aggregate(&self, bookings: &[Booking], index: &ProductIndex) -> AggregationReport {
        let started = Instant::now();

        let mut seen = HashSet::with_capacity(bookings.len());
        let duplicate_bookings = bookings
            .iter()
            .filter(|b| !seen.insert(b.id.as_str()))
            .count();

        let collect = self.config.collect_booking_ids;
        let partial = if self.config.workers > 1 && bookings.len() > 1 {
            self.fold_parallel(bookings, index)
        } else {
            fold(bookings, index, collect)
        };

        let aggregates = partial
            .groups
            .into_iter()
            .map(|(key, (count, mut ids))| {
                let booking_ids = collect.then(|| {
                    ids.sort();
                    ids
                });
                let aggregate = ClusterAggregate {
                    cluster_key: key.clone(),
                    booking_count: count,
                    booking_ids,
                };
                (key, aggregate)
            })
            .collect::<HashMap<_, _>>();

        let report = AggregationReport {
            aggregates,
            total_bookings: bookings.len(),
            resolved: partial.resolved,
            unresolved: partial.unresolved,
            excluded_rejected: partial.excluded_rejected,
            duplicate_bookings,
            rejected_products: index.rejected().to_vec(),
            duplicate_products: index.duplicate_products(),
        };

        tracing::info!(
            bookings = report.total_bookings,
            clusters = report.aggregates.len(),
            resolved = report.resolved,
            unresolved = report.unresolved,
            excluded_rejected = report.excluded_rejected,
            duplicate_bookings = report.duplicate_bookings,
            workers = self.config.workers,
            duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Aggregation finished"
        );

        report
    }

    /// Builds the index and aggregates in one call.
    #[must_use]
    pub fn aggregate_products(&self, bookings: &[Booking], products: &[Product]) -> AggregationReport {
        self.aggregate(bookings, &ProductIndex::build(products))
    }

    fn fold_parallel(&self, bookings: &[Booking], index: &ProductIndex) -> Partial {
        use rayon::prelude::*;

        let workers = self.config.workers;
        let collect = self.config.collect_booking_ids;
        let chunk = bookings.len().div_ceil(workers).max(1);

        let pool = match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => pool,
            Err(err) => {
                tracing::warn!(error = %err, workers, "Falling back to single-threaded aggregation");
                return fold(bookings, index, collect);
            }
        };

        pool.install(|| {
            bookings
                .par_chunks(chunk)
                .map(|part| fold(part, index, collect))
                .reduce(Partial::default, Partial::merge)
        })
    }
}

fn fold(bookings: &[Booking], index: &ProductIndex, collect: bool) -> Partial {
    let mut partial = Partial::default();
    for booking in bookings {
        match index.resolve(&booking.product_id) {
            Some(key) => {
                partial.resolved += 1;
                let slot = partial.groups.entry(key.clone()).or_default();
                slot.0 += 1;
                if collect {
                    slot.1.push(booking.id.clone());
                }
            }
            None if index.is_rejected(&booking.product_id) => partial.excluded_rejected += 1,
            None => partial.unresolved += 1,
        }
    }
    partial
}

/// Bookings whose product falls in the given cluster.
///
/// Returns nothing for attributes that cannot form a key.
#[must_use]
pub fn bookings_for_cluster<'a>(
    attributes: &ClusterAttributes,
    bookings: &'a [Booking],
    index: &ProductIndex,
) -> Vec<&'a Booking> {
    let Some(target) = attributes.key() else {
        return Vec::new();
    };
    bookings
        .iter()
        .filter(|b| index.resolve(&b.product_id) == Some(&target))
        .collect()
}
