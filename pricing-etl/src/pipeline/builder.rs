//! Pipeline builder with validation.

use std::collections::HashMap;
use std::sync::Arc;

use super::runner::{Pipeline, Target};
use crate::cancellation::CancellationToken;
use crate::config::EtlConfig;
use crate::errors::{EtlError, EtlResult};
use crate::events::{EventSink, NoOpEventSink};
use crate::model::TableName;
use crate::policy::KeyPolicy;
use crate::sink::{CuratedWriter, JsonLinesCuratedWriter, LoggingSink, Sink};
use crate::source::RecordSource;
use crate::store::{SqliteStore, Store};

/// Builder for [`Pipeline`].
///
/// A pipeline needs a source and exactly one write target: a [`Store`] for
/// keyed merges or a [`CuratedWriter`] for whole-dataset overwrites. When
/// neither is given, the target comes from [`EtlConfig::sqlite`] or
/// [`EtlConfig::curated_dir`].
pub struct PipelineBuilder {
    source: Option<Arc<dyn RecordSource>>,
    store: Option<Arc<dyn Store>>,
    curated: Option<Arc<dyn CuratedWriter>>,
    sink: Option<Arc<dyn Sink>>,
    events: Arc<dyn EventSink>,
    config: EtlConfig,
    policies: HashMap<TableName, KeyPolicy>,
    cancel: Arc<CancellationToken>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    /// Creates a builder with default policies and configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            source: None,
            store: None,
            curated: None,
            sink: None,
            events: Arc::new(NoOpEventSink),
            config: EtlConfig::default(),
            policies: KeyPolicy::defaults()
                .into_iter()
                .map(|p| (p.table, p))
                .collect(),
            cancel: Arc::new(CancellationToken::new()),
        }
    }

    /// Sets the record source.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn RecordSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Writes through a store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Writes whole datasets through a curated writer.
    #[must_use]
    pub fn with_curated_writer(mut self, writer: Arc<dyn CuratedWriter>) -> Self {
        self.curated = Some(writer);
        self
    }

    /// Sets the output sink. Defaults to [`LoggingSink`].
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sets the lifecycle event sink. Defaults to [`NoOpEventSink`].
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: EtlConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the policy of one table.
    #[must_use]
    pub fn with_policy(mut self, policy: KeyPolicy) -> Self {
        self.policies.insert(policy.table, policy);
        self
    }

    /// Shares a cancellation token with the pipeline.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Validates the setup and builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`EtlError::Config`] for a missing source, an ambiguous or
    /// missing write target, invalid configuration or an invalid policy, and
    /// [`EtlError::Store`] if a configured SQLite store cannot be opened.
    pub fn build(self) -> EtlResult<Pipeline> {
        self.config.validate()?;

        let source = self
            .source
            .ok_or_else(|| EtlError::Config("pipeline has no record source".into()))?;

        let mut policies = Vec::with_capacity(TableName::PIPELINE_ORDER.len());
        for table in TableName::PIPELINE_ORDER {
            let policy = self
                .policies
                .get(&table)
                .cloned()
                .ok_or_else(|| EtlError::Config(format!("no key policy for '{table}'")))?;
            policy.validate()?;
            policies.push(policy);
        }

        let target = match (self.store, self.curated) {
            (Some(_), Some(_)) => {
                return Err(EtlError::Config(
                    "pipeline has both a store and a curated writer".into(),
                ))
            }
            (Some(store), None) => Target::Store(store),
            (None, Some(writer)) => Target::Curated(writer),
            (None, None) => {
                if let Some(sqlite) = &self.config.sqlite {
                    Target::Store(Arc::new(SqliteStore::open(sqlite.clone())?))
                } else if let Some(dir) = &self.config.curated_dir {
                    Target::Curated(Arc::new(JsonLinesCuratedWriter::new(dir)))
                } else {
                    return Err(EtlError::Config(
                        "pipeline has neither a store nor a curated output directory".into(),
                    ));
                }
            }
        };

        Ok(Pipeline {
            source,
            target,
            sink: self.sink.unwrap_or_else(|| Arc::new(LoggingSink)),
            events: self.events,
            config: self.config,
            policies,
            cancel: self.cancel,
        })
    }
}
