//! End-to-end runs of the pipeline.

#[cfg(test)]
mod tests {
    use crate::cancellation::CancellationToken;
    use crate::config::{AggregationConfig, EtlConfig, UpsertConfig};
    use crate::errors::{EtlError, EtlResult};
    use crate::events::{CollectingEventSink, EventSink, PipelineEvent};
    use crate::model::{RowKey, TableBatch, TableName};
    use crate::pipeline::{AggregationOutcome, PipelineBuilder, RunStatus};
    use crate::policy::KeyPolicy;
    use crate::sink::{JsonLinesCuratedWriter, MemorySink, MockSink};
    use crate::source::{MemorySource, RecordSource};
    use crate::store::{MemoryStore, SqliteConfig, SqliteStore};
    use crate::testing::{
        assert_counts, assert_table_clean, at_hour, booking, price, product, sample_source,
        FaultyStore, ProductBuilder,
    };
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    const SUITE: &str = "2024-06-01|suite|2|5|true";
    const DOUBLE: &str = "2024-06-01|double|1|3|false";

    fn key(id: &str) -> RowKey {
        RowKey::new(vec![("id".to_string(), id.to_string())])
    }

    /// Reads every table normally except one, which never completes.
    struct StallingSource {
        inner: MemorySource,
        stalls_on: TableName,
    }

    #[async_trait]
    impl RecordSource for StallingSource {
        async fn read(&self, table: TableName) -> EtlResult<TableBatch> {
            if table == self.stalls_on {
                futures::future::pending::<()>().await;
            }
            self.inner.read(table).await
        }
    }

    /// Cancels the token once aggregation has completed.
    struct CancelAfterAggregation {
        token: Arc<CancellationToken>,
    }

    impl EventSink for CancelAfterAggregation {
        fn emit(&self, event: &PipelineEvent) {
            if matches!(event, PipelineEvent::AggregationCompleted { .. }) {
                self.token.cancel("too late");
            }
        }
    }

    /// Answers every read with a products batch.
    struct MislabelledSource;

    #[async_trait]
    impl RecordSource for MislabelledSource {
        async fn read(&self, _table: TableName) -> EtlResult<TableBatch> {
            Ok(TableBatch::Products(vec![product("P1")]))
        }
    }

    #[tokio::test]
    async fn test_full_run_against_memory_store() {
        let store = MemoryStore::new();
        let sink = Arc::new(MemorySink::new());
        let events = Arc::new(CollectingEventSink::new());

        let pipeline = PipelineBuilder::new()
            .with_source(Arc::new(sample_source()))
            .with_store(Arc::new(store.clone()))
            .with_sink(sink.clone())
            .with_event_sink(events.clone())
            .build()
            .unwrap();

        let report = pipeline.run().await;

        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.tables.len(), 4);
        assert_counts(report.table(TableName::Buildings).unwrap(), 2, 2, 0, 0);
        assert_counts(report.table(TableName::Products).unwrap(), 3, 3, 0, 0);
        assert_counts(report.table(TableName::Bookings).unwrap(), 4, 4, 0, 0);
        assert_counts(report.table(TableName::Prices).unwrap(), 3, 3, 0, 0);
        for table in &report.tables {
            assert_table_clean(table);
        }
        assert_eq!(store.len(TableName::Products), 3);
        assert_eq!(store.len(TableName::Prices), 3);
        assert!(store.row(TableName::Bookings, &key("K4")).is_some());

        let summary = report.aggregation.summary().unwrap();
        assert_eq!(summary.clusters, 2);
        assert_eq!(summary.total_bookings, 4);
        assert_eq!(summary.resolved, 3);
        assert_eq!(summary.unresolved, 1);

        let aggregates = sink.aggregates().await.unwrap();
        let counts: Vec<(&str, usize)> = aggregates
            .iter()
            .map(|a| (a.cluster_key.as_str(), a.booking_count))
            .collect();
        assert_eq!(counts, vec![(DOUBLE, 1), (SUITE, 2)]);
        assert_eq!(sink.table_results().await.len(), 4);

        assert_eq!(
            events.event_types(),
            vec![
                "run.started",
                "table.started",
                "table.completed",
                "table.started",
                "table.completed",
                "table.started",
                "table.completed",
                "table.started",
                "table.completed",
                "aggregation.completed",
                "run.completed",
            ]
        );
        assert!(events.events().iter().all(|e| e.run_id() == report.run_id));
    }

    #[tokio::test]
    async fn test_tables_run_in_dependency_order() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = PipelineBuilder::new()
            .with_source(Arc::new(sample_source()))
            .with_store(Arc::new(MemoryStore::new()))
            .with_sink(sink.clone())
            .build()
            .unwrap();

        let report = pipeline.run().await;

        let order: Vec<TableName> = report.tables.iter().map(|t| t.table).collect();
        assert_eq!(order, TableName::PIPELINE_ORDER.to_vec());
        let written: Vec<TableName> = sink.table_results().await.iter().map(|t| t.table).collect();
        assert_eq!(written, TableName::PIPELINE_ORDER.to_vec());
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let store = MemoryStore::new();
        let pipeline = PipelineBuilder::new()
            .with_source(Arc::new(sample_source()))
            .with_store(Arc::new(store.clone()))
            .with_sink(Arc::new(MemorySink::new()))
            .build()
            .unwrap();

        let first = pipeline.run().await;
        let snapshot: Vec<_> = TableName::PIPELINE_ORDER
            .iter()
            .map(|t| store.rows(*t))
            .collect();
        let second = pipeline.run().await;

        assert_ne!(first.run_id, second.run_id);
        assert_eq!(second.status, RunStatus::Succeeded);
        let after: Vec<_> = TableName::PIPELINE_ORDER
            .iter()
            .map(|t| store.rows(*t))
            .collect();
        assert_eq!(after, snapshot);

        let products = second.table(TableName::Products).unwrap();
        assert_eq!(products.inserted, 0);
        assert_eq!(products.updated, 3);
        assert_eq!(first.aggregation, second.aggregation);
    }

    #[tokio::test]
    async fn test_full_run_against_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(SqliteConfig::new(dir.path().join("etl.db"))).unwrap());

        let pipeline = PipelineBuilder::new()
            .with_source(Arc::new(sample_source()))
            .with_store(store.clone())
            .with_sink(Arc::new(MemorySink::new()))
            .with_config(EtlConfig::default().with_upsert(UpsertConfig::default().with_shard_count(2)))
            .build()
            .unwrap();

        let report = pipeline.run().await;
        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.total_applied(), 12);

        let prices = KeyPolicy::for_table(TableName::Prices);
        assert_eq!(store.count(&prices).await.unwrap(), 3);
        assert_eq!(
            store
                .count(&KeyPolicy::for_table(TableName::Bookings))
                .await
                .unwrap(),
            4
        );
        let eur = store.fetch(&prices, &["P1", "EUR"]).await.unwrap().unwrap();
        assert_eq!(eur.get("value"), Some(&92.0.into()));

        let again = pipeline.run().await;
        assert_eq!(again.status, RunStatus::Succeeded);
        assert_eq!(store.count(&prices).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_newer_price_wins_over_rerun_of_older_snapshot() {
        let store = MemoryStore::new();
        let newer = MemorySource::new().with_prices(vec![price("P1", "USD", 130.0, at_hour(12))]);
        PipelineBuilder::new()
            .with_source(Arc::new(newer))
            .with_store(Arc::new(store.clone()))
            .with_sink(Arc::new(MemorySink::new()))
            .build()
            .unwrap()
            .run()
            .await;

        let report = PipelineBuilder::new()
            .with_source(Arc::new(sample_source()))
            .with_store(Arc::new(store.clone()))
            .with_sink(Arc::new(MemorySink::new()))
            .build()
            .unwrap()
            .run()
            .await;

        let prices = report.table(TableName::Prices).unwrap();
        assert_eq!(prices.stale, 1);
        assert_eq!(report.status, RunStatus::Succeeded);

        let usd = RowKey::new(vec![
            ("product_id".to_string(), "P1".to_string()),
            ("currency".to_string(), "USD".to_string()),
        ]);
        let stored = store.row(TableName::Prices, &usd).unwrap();
        assert_eq!(stored.get("value"), Some(&130.0.into()));
    }

    #[tokio::test]
    async fn test_record_failure_degrades_run() {
        let faulty = FaultyStore::new(MemoryStore::new()).fail_permanently("id=K2");
        let pipeline = PipelineBuilder::new()
            .with_source(Arc::new(sample_source()))
            .with_store(Arc::new(faulty.clone()))
            .with_sink(Arc::new(MemorySink::new()))
            .build()
            .unwrap();

        let report = pipeline.run().await;

        assert_eq!(report.status, RunStatus::Degraded);
        let bookings = report.table(TableName::Bookings).unwrap();
        assert_counts(bookings, 4, 3, 1, 0);
        assert_eq!(bookings.errors[0].key.as_deref(), Some("id=K2"));
        assert_eq!(bookings.errors[0].kind, "store_permanent");
        assert!(faulty.inner().row(TableName::Bookings, &key("K2")).is_none());

        // Aggregation works from the snapshot, not from what was stored.
        let summary = report.aggregation.summary().unwrap();
        assert_eq!(summary.resolved, 3);
        assert_eq!(faulty.sessions_acquired(), faulty.sessions_released());
    }

    #[tokio::test]
    async fn test_unavailable_source_fails_only_its_table() {
        let source = sample_source();
        source.mark_unavailable(TableName::Buildings);
        let store = MemoryStore::new();
        let sink = Arc::new(MemorySink::new());

        let report = PipelineBuilder::new()
            .with_source(Arc::new(source))
            .with_store(Arc::new(store.clone()))
            .with_sink(sink.clone())
            .build()
            .unwrap()
            .run()
            .await;

        assert_eq!(report.status, RunStatus::Failed);
        let buildings = report.table(TableName::Buildings).unwrap();
        assert!(buildings.is_source_failure());
        assert_eq!(buildings.attempted, 0);
        assert_eq!(store.len(TableName::Buildings), 0);
        assert_eq!(store.len(TableName::Products), 3);
        assert!(matches!(report.aggregation, AggregationOutcome::Completed(_)));
        assert_eq!(sink.table_results().await.len(), 4);
    }

    #[tokio::test]
    async fn test_unreadable_bookings_skip_aggregation() {
        let source = sample_source();
        source.mark_unavailable(TableName::Bookings);
        let sink = Arc::new(MemorySink::new());
        let events = Arc::new(CollectingEventSink::new());

        let report = PipelineBuilder::new()
            .with_source(Arc::new(source))
            .with_store(Arc::new(MemoryStore::new()))
            .with_sink(sink.clone())
            .with_event_sink(events.clone())
            .build()
            .unwrap()
            .run()
            .await;

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(
            report.aggregation,
            AggregationOutcome::Skipped {
                reason: "bookings were not read".to_string()
            }
        );
        assert!(sink.aggregates().await.is_none());
        assert_eq!(events.events_of_type("aggregation.").len(), 1);
        assert_eq!(events.events_of_type("aggregation.")[0].event_type(), "aggregation.skipped");
    }

    #[tokio::test]
    async fn test_mislabelled_batch_is_source_failure() {
        let report = PipelineBuilder::new()
            .with_source(Arc::new(MislabelledSource))
            .with_store(Arc::new(MemoryStore::new()))
            .with_sink(Arc::new(MemorySink::new()))
            .build()
            .unwrap()
            .run()
            .await;

        assert_eq!(report.status, RunStatus::Failed);
        let buildings = report.table(TableName::Buildings).unwrap();
        assert!(buildings.source_error.as_deref().unwrap().contains("'products' batch"));
        assert!(report.table(TableName::Products).unwrap().source_error.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = Arc::new(CancellationToken::new());
        cancel.cancel("operator stop");
        let store = MemoryStore::new();
        let sink = Arc::new(MemorySink::new());

        let report = PipelineBuilder::new()
            .with_source(Arc::new(sample_source()))
            .with_store(Arc::new(store.clone()))
            .with_sink(sink.clone())
            .with_cancellation(cancel)
            .build()
            .unwrap()
            .run()
            .await;

        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(report.cancel_reason.as_deref(), Some("operator stop"));
        assert!(report.tables.iter().all(|t| t.cancelled && t.attempted == 0));
        assert!(store.is_empty());
        assert_eq!(
            report.aggregation,
            AggregationOutcome::Skipped {
                reason: "run cancelled".to_string()
            }
        );
        // Not-started tables are still reported to the sink.
        assert_eq!(sink.table_results().await.len(), 4);
    }

    #[tokio::test]
    async fn test_cancel_during_read_stops_remaining_tables() {
        let store = MemoryStore::new();
        let pipeline = PipelineBuilder::new()
            .with_source(Arc::new(StallingSource {
                inner: sample_source(),
                stalls_on: TableName::Bookings,
            }))
            .with_store(Arc::new(store.clone()))
            .with_sink(Arc::new(MemorySink::new()))
            .build()
            .unwrap();

        let token = pipeline.cancellation_token();
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel("deadline");
        });

        let report = pipeline.run().await;
        canceller.await.unwrap();

        assert_eq!(report.status, RunStatus::Cancelled);
        assert_table_clean(report.table(TableName::Buildings).unwrap());
        assert_table_clean(report.table(TableName::Products).unwrap());
        assert!(report.table(TableName::Bookings).unwrap().cancelled);
        assert!(report.table(TableName::Prices).unwrap().cancelled);
        assert_eq!(store.len(TableName::Products), 3);
        assert_eq!(store.len(TableName::Bookings), 0);
        assert_eq!(report.cancel_reason.as_deref(), Some("deadline"));
    }

    #[tokio::test]
    async fn test_curated_fallback_overwrites_datasets() {
        let dir = tempfile::tempdir().unwrap();
        let writer = JsonLinesCuratedWriter::new(dir.path());
        let pipeline = PipelineBuilder::new()
            .with_source(Arc::new(sample_source()))
            .with_config(EtlConfig::default().with_curated_dir(dir.path()))
            .with_sink(Arc::new(MemorySink::new()))
            .build()
            .unwrap();
        assert_eq!(pipeline.target_name(), "jsonl_curated");

        let report = pipeline.run().await;
        assert_eq!(report.status, RunStatus::Succeeded);
        assert_counts(report.table(TableName::Bookings).unwrap(), 4, 4, 0, 0);

        pipeline.run().await;
        let body = tokio::fs::read_to_string(writer.path_for(TableName::Products))
            .await
            .unwrap();
        assert_eq!(body.lines().count(), 3);
        let first: serde_json::Value = serde_json::from_str(body.lines().next().unwrap()).unwrap();
        assert_eq!(first["id"], "P1");
    }

    #[tokio::test]
    async fn test_sink_failure_degrades_run() {
        let mut sink = MockSink::new();
        sink.expect_name().return_const("mock".to_string());
        sink.expect_write_table_result()
            .times(4)
            .returning(|result| {
                if result.table == TableName::Prices {
                    Err(EtlError::Sink("disk full".to_string()))
                } else {
                    Ok(())
                }
            });
        sink.expect_write_aggregates()
            .times(1)
            .returning(|aggregates| {
                assert_eq!(aggregates.len(), 2);
                Ok(())
            });

        let report = PipelineBuilder::new()
            .with_source(Arc::new(sample_source()))
            .with_store(Arc::new(MemoryStore::new()))
            .with_sink(Arc::new(sink))
            .build()
            .unwrap()
            .run()
            .await;

        assert_eq!(report.status, RunStatus::Degraded);
        assert_eq!(report.sink_errors.len(), 1);
        assert_eq!(report.sink_errors[0].target, "prices");
        assert!(report.sink_errors[0].message.contains("disk full"));
        assert_eq!(report.total_failed(), 0);
    }

    #[tokio::test]
    async fn test_rejected_product_degrades_run() {
        let source = MemorySource::new()
            .with_products(vec![
                product("P1"),
                ProductBuilder::new("P9").room_type("suite|deluxe").build(),
            ])
            .with_bookings(vec![booking("K1", "P1"), booking("K2", "P9")]);
        let store = MemoryStore::new();

        let report = PipelineBuilder::new()
            .with_source(Arc::new(source))
            .with_store(Arc::new(store.clone()))
            .with_sink(Arc::new(MemorySink::new()))
            .build()
            .unwrap()
            .run()
            .await;

        assert_eq!(report.status, RunStatus::Degraded);
        // Rejection only affects clustering; the product itself is stored.
        assert!(store.row(TableName::Products, &key("P9")).is_some());

        let summary = report.aggregation.summary().unwrap();
        assert_eq!(summary.rejected_products.len(), 1);
        assert_eq!(summary.rejected_products[0].product_id, "P9");
        assert_eq!(summary.excluded_rejected, 1);
        assert_eq!(summary.resolved, 1);
    }

    #[tokio::test]
    async fn test_parallel_aggregation_matches_sequential() {
        let mut products = Vec::new();
        let mut bookings = Vec::new();
        for i in 0..60_u32 {
            let id = format!("P{i}");
            products.push(ProductBuilder::new(&id).beds(1 + i % 4).grade(i32::try_from(i % 3).unwrap()).build());
            for j in 0..(i % 5) {
                bookings.push(booking(&format!("K{i}-{j}"), &id));
            }
        }
        let source = || {
            MemorySource::new()
                .with_products(products.clone())
                .with_bookings(bookings.clone())
        };

        let run = |workers: usize| {
            let pipeline = PipelineBuilder::new()
                .with_source(Arc::new(source()))
                .with_store(Arc::new(MemoryStore::new()))
                .with_sink(Arc::new(MemorySink::new()))
                .with_config(
                    EtlConfig::default()
                        .with_aggregation(AggregationConfig::default().with_workers(workers)),
                )
                .build()
                .unwrap();
            async move { pipeline.run().await.aggregation }
        };

        let sequential = run(1).await;
        let parallel = run(4).await;
        assert_eq!(sequential, parallel);
        assert_eq!(sequential.summary().unwrap().resolved, bookings.len());
    }

    #[tokio::test]
    async fn test_refused_connections_fail_records_not_run() {
        let faulty = FaultyStore::new(MemoryStore::new()).refuse_connections();
        let report = PipelineBuilder::new()
            .with_source(Arc::new(sample_source()))
            .with_store(Arc::new(faulty))
            .with_sink(Arc::new(MemorySink::new()))
            .build()
            .unwrap()
            .run()
            .await;

        assert_eq!(report.status, RunStatus::Degraded);
        assert_eq!(report.total_applied(), 0);
        assert_eq!(report.total_failed(), 12);
        assert!(report
            .tables
            .iter()
            .flat_map(|t| &t.errors)
            .all(|e| e.kind == "store_connection"));
    }

    #[tokio::test]
    async fn test_failed_prepare_is_reported_not_returned() {
        let faulty = FaultyStore::new(MemoryStore::new()).fail_prepare("ddl denied");
        let sink = Arc::new(MemorySink::new());

        let report = PipelineBuilder::new()
            .with_source(Arc::new(sample_source()))
            .with_store(Arc::new(faulty.clone()))
            .with_sink(sink.clone())
            .build()
            .unwrap()
            .run()
            .await;

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.total_applied(), 0);
        assert_eq!(report.total_failed(), 12);
        for table in &report.tables {
            assert_eq!(table.failed, table.attempted);
            assert!(table.target_error.as_deref().unwrap().contains("ddl denied"));
            assert_eq!(table.errors.len(), 1);
            assert_eq!(table.errors[0].kind, "store_permanent");
        }
        assert!(faulty.inner().is_empty());
        assert_eq!(faulty.sessions_acquired(), 0);

        assert_eq!(sink.table_results().await.len(), 4);
        assert_eq!(report.aggregation.summary().unwrap().resolved, 3);
        assert!(sink.aggregates().await.is_some());
    }

    #[tokio::test]
    async fn test_cancel_after_all_work_keeps_run_succeeded() {
        let token = Arc::new(CancellationToken::new());
        let report = PipelineBuilder::new()
            .with_source(Arc::new(sample_source()))
            .with_store(Arc::new(MemoryStore::new()))
            .with_sink(Arc::new(MemorySink::new()))
            .with_event_sink(Arc::new(CancelAfterAggregation {
                token: token.clone(),
            }))
            .with_cancellation(token.clone())
            .build()
            .unwrap()
            .run()
            .await;

        assert!(token.is_cancelled());
        assert_eq!(report.status, RunStatus::Succeeded);
        assert!(report.cancel_reason.is_none());
        assert!(matches!(report.aggregation, AggregationOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_renewed_token_allows_next_run() {
        let mut pipeline = PipelineBuilder::new()
            .with_source(Arc::new(sample_source()))
            .with_store(Arc::new(MemoryStore::new()))
            .with_sink(Arc::new(MemorySink::new()))
            .build()
            .unwrap();

        let old = pipeline.cancellation_token();
        assert!(pipeline.cancel("maintenance"));
        assert_eq!(pipeline.run().await.status, RunStatus::Cancelled);
        assert_eq!(pipeline.run().await.status, RunStatus::Cancelled);

        let fresh = pipeline.renew_cancellation();
        assert!(!fresh.is_cancelled());
        assert!(old.is_cancelled());
        assert_eq!(pipeline.run().await.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_repeated_booking_id_counts_every_row() {
        let source = MemorySource::new()
            .with_products(vec![
                product("P1"),
                ProductBuilder::new("P3")
                    .room_type("double")
                    .beds(1)
                    .grade(3)
                    .private_pool(false)
                    .build(),
            ])
            .with_bookings(vec![booking("K1", "P1"), booking("K1", "P3")]);
        let store = MemoryStore::new();
        let sink = Arc::new(MemorySink::new());

        let report = PipelineBuilder::new()
            .with_source(Arc::new(source))
            .with_store(Arc::new(store.clone()))
            .with_sink(sink.clone())
            .build()
            .unwrap()
            .run()
            .await;

        let stored = store.row(TableName::Bookings, &key("K1")).unwrap();
        assert_eq!(stored.get("product_id"), Some(&"P3".into()));

        let summary = report.aggregation.summary().unwrap();
        assert_eq!(summary.resolved, 2);
        assert_eq!(summary.duplicate_bookings, 1);
        let aggregates = sink.aggregates().await.unwrap();
        let counts: Vec<(&str, usize)> = aggregates
            .iter()
            .map(|a| (a.cluster_key.as_str(), a.booking_count))
            .collect();
        assert_eq!(counts, vec![(DOUBLE, 1), (SUITE, 1)]);
    }
}
