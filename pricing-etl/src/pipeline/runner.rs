//! Run execution: upserts in table order, then aggregation, then output.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use super::{AggregationOutcome, RunReport, RunStatus, SinkError};
use crate::cancellation::CancellationToken;
use crate::cluster::{AggregationEngine, AggregationReport};
use crate::config::EtlConfig;
use crate::engine::{RecordError, TableRunResult, UpsertEngine};
use crate::errors::{EtlError, EtlResult, StoreError};
use crate::events::{EventSink, PipelineEvent};
use crate::model::{Booking, Product, TableBatch, TableName};
use crate::policy::KeyPolicy;
use crate::sink::{CuratedWriter, Sink};
use crate::source::RecordSource;
use crate::store::Store;

/// Where table batches are written.
pub(super) enum Target {
    /// Keyed merges.
    Store(Arc<dyn Store>),
    /// Whole-dataset overwrites.
    Curated(Arc<dyn CuratedWriter>),
}

/// Batches kept for aggregation.
#[derive(Default)]
struct Retained {
    products: Option<Vec<Product>>,
    bookings: Option<Vec<Booking>>,
}

/// A configured run over the four tables.
///
/// Built with [`super::PipelineBuilder`]. Each [`Pipeline::run`] reads every
/// table once, writes it, aggregates bookings per cluster and hands all
/// results to the sink.
pub struct Pipeline {
    pub(super) source: Arc<dyn RecordSource>,
    pub(super) target: Target,
    pub(super) sink: Arc<dyn Sink>,
    pub(super) events: Arc<dyn EventSink>,
    pub(super) config: EtlConfig,
    pub(super) policies: Vec<KeyPolicy>,
    pub(super) cancel: Arc<CancellationToken>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("target", &self.target_name())
            .field("sink", &self.sink.name())
            .field("config", &self.config)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Name of the write target.
    #[must_use]
    pub fn target_name(&self) -> &str {
        match &self.target {
            Target::Store(store) => store.name(),
            Target::Curated(writer) => writer.name(),
        }
    }

    /// The token that cancels this pipeline's runs.
    #[must_use]
    pub fn cancellation_token(&self) -> Arc<CancellationToken> {
        self.cancel.clone()
    }

    /// Requests cancellation of the current run.
    ///
    /// Tokens never reset: every later [`Pipeline::run`] is cancelled too
    /// until [`Pipeline::renew_cancellation`] installs a fresh token.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        self.cancel.cancel(reason)
    }

    /// Replaces the cancellation token with a fresh one and returns it.
    ///
    /// Holders of the previous token can no longer cancel this pipeline.
    pub fn renew_cancellation(&mut self) -> Arc<CancellationToken> {
        self.cancel = Arc::new(CancellationToken::new());
        self.cancel.clone()
    }

    /// Runs every table, then the aggregation.
    ///
    /// Nothing fails the run as a whole: unreadable sources, a store that
    /// cannot be prepared, rejected records and sink errors all end up in
    /// the report and its status.
    pub async fn run(&self) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();

        tracing::info!(%run_id, target = self.target_name(), sink = self.sink.name(), "Run started");
        self.events.emit(&PipelineEvent::RunStarted { run_id });

        let prepare_error = match &self.target {
            Target::Store(store) => match store.prepare(&self.policies).await {
                Ok(()) => None,
                Err(err) => {
                    tracing::error!(%run_id, store = store.name(), error = %err, "Store could not be prepared, no table will be written");
                    Some(err)
                }
            },
            Target::Curated(_) => None,
        };

        let mut retained = Retained::default();
        let mut tables = Vec::with_capacity(self.policies.len());
        let mut sink_errors = Vec::new();

        for policy in &self.policies {
            let table = policy.table;
            let result = if self.cancel.is_cancelled() {
                TableRunResult::not_started(table)
            } else {
                self.events.emit(&PipelineEvent::TableStarted { run_id, table });
                self.run_table(policy, prepare_error.as_ref(), &mut retained)
                    .await
            };

            self.events.emit(&PipelineEvent::TableCompleted {
                run_id,
                table,
                attempted: result.attempted,
                applied: result.applied,
                failed: result.failed,
                skipped: result.skipped,
                source_error: result.source_error.clone(),
            });

            if let Err(err) = self.sink.write_table_result(&result).await {
                tracing::error!(%run_id, %table, error = %err, "Sink rejected table result");
                sink_errors.push(SinkError {
                    target: table.to_string(),
                    message: err.to_string(),
                });
            }
            tables.push(result);
        }

        let aggregation_cancelled = self.cancel.is_cancelled();
        let aggregation = match self.aggregate(retained, aggregation_cancelled).await {
            Ok(report) => {
                self.events.emit(&PipelineEvent::AggregationCompleted {
                    run_id,
                    clusters: report.aggregates.len(),
                    resolved: report.resolved,
                });
                if let Err(err) = self.sink.write_aggregates(&report.sorted_aggregates()).await {
                    tracing::error!(%run_id, error = %err, "Sink rejected aggregates");
                    sink_errors.push(SinkError {
                        target: "aggregates".to_string(),
                        message: err.to_string(),
                    });
                }
                AggregationOutcome::Completed(report.summary())
            }
            Err(reason) => {
                tracing::warn!(%run_id, %reason, "Aggregation skipped");
                self.events.emit(&PipelineEvent::AggregationSkipped {
                    run_id,
                    reason: reason.clone(),
                });
                AggregationOutcome::Skipped { reason }
            }
        };

        // Only a cancel that actually stopped work counts.
        let cancelled = tables.iter().any(|t| t.cancelled) || aggregation_cancelled;
        let unavailable = tables.iter().any(TableRunResult::is_unavailable);
        let degraded = tables.iter().any(TableRunResult::has_failures)
            || !sink_errors.is_empty()
            || aggregation
                .summary()
                .is_some_and(|s| !s.rejected_products.is_empty());
        let status = RunStatus::resolve(cancelled, unavailable, degraded);

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            status,
            tables,
            aggregation,
            sink_errors,
            cancel_reason: if cancelled { self.cancel.reason() } else { None },
        };

        let duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.events.emit(&PipelineEvent::RunCompleted {
            run_id,
            status,
            duration_ms,
        });
        tracing::info!(
            %run_id,
            %status,
            attempted = report.total_attempted(),
            applied = report.total_applied(),
            failed = report.total_failed(),
            sink_errors = report.sink_errors.len(),
            duration_ms,
            "Run finished"
        );

        report
    }

    async fn run_table(
        &self,
        policy: &KeyPolicy,
        prepare_error: Option<&StoreError>,
        retained: &mut Retained,
    ) -> TableRunResult {
        let table = policy.table;
        let started = Instant::now();

        let batch = match self.read(table).await {
            Ok(batch) => batch,
            Err(EtlError::Cancelled(reason)) => {
                tracing::info!(%table, %reason, "Read interrupted by cancellation");
                return TableRunResult::not_started(table);
            }
            Err(err) => {
                tracing::warn!(%table, error = %err, "Table source unavailable");
                return TableRunResult::source_unavailable(table, err.to_string());
            }
        };

        match &batch {
            TableBatch::Products(products) => retained.products = Some(products.clone()),
            TableBatch::Bookings(bookings) => retained.bookings = Some(bookings.clone()),
            TableBatch::Buildings(_) | TableBatch::Prices(_) => {}
        }

        let mut result = match (&self.target, prepare_error) {
            (Target::Store(_), Some(err)) => {
                TableRunResult::target_unavailable(table, batch.len(), err)
            }
            (Target::Store(store), None) => {
                UpsertEngine::new(store.clone())
                    .with_config(self.config.upsert.clone())
                    .with_cancellation(self.cancel.clone())
                    .run(policy, batch.rows())
                    .await
            }
            (Target::Curated(writer), _) => overwrite(writer.as_ref(), &batch).await,
        };
        result.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        result
    }

    async fn read(&self, table: TableName) -> EtlResult<TableBatch> {
        let batch = tokio::select! {
            read = self.source.read(table) => read?,
            () = self.cancel.cancelled() => {
                return Err(EtlError::Cancelled(self.cancel.reason().unwrap_or_default()));
            }
        };
        if batch.table() != table {
            return Err(EtlError::source_unavailable(
                table,
                format!("source returned a '{}' batch", batch.table()),
            ));
        }
        Ok(batch)
    }

    async fn aggregate(
        &self,
        retained: Retained,
        cancelled: bool,
    ) -> Result<AggregationReport, String> {
        if cancelled {
            return Err("run cancelled".to_string());
        }
        let (products, bookings) = match (retained.products, retained.bookings) {
            (Some(products), Some(bookings)) => (products, bookings),
            (None, _) => return Err("products were not read".to_string()),
            (_, None) => return Err("bookings were not read".to_string()),
        };

        let engine = AggregationEngine::new(self.config.aggregation.clone());
        tokio::task::spawn_blocking(move || engine.aggregate_products(&bookings, &products))
            .await
            .map_err(|err| format!("aggregation task failed: {err}"))
    }
}

async fn overwrite(writer: &dyn CuratedWriter, batch: &TableBatch) -> TableRunResult {
    let mut result = TableRunResult::new(batch.table());
    result.attempted = batch.len();
    match writer.overwrite(batch).await {
        Ok(written) => {
            result.applied = written;
            result.inserted = written;
        }
        Err(err) => {
            tracing::error!(table = %batch.table(), error = %err, "Curated overwrite failed");
            result.record_failure(RecordError {
                key: None,
                shard: None,
                kind: err.kind().to_string(),
                message: err.to_string(),
                attempts: 1,
            });
            result.failed = batch.len();
        }
    }
    result
}
