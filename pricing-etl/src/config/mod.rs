//! Run configuration.
//!
//! Configuration is passed explicitly into the pipeline; nothing is read
//! from global state except through [`EtlConfig::apply_env_overrides`].
//!
//! ```json
//! {
//!   "upsert": { "shard_count": 8, "retry": { "max_attempts": 5 } },
//!   "aggregation": { "workers": 4, "collect_booking_ids": true },
//!   "sqlite": { "path": "/var/lib/pricing/pricing.db", "pool_size": 8 },
//!   "log": { "filter": "pricing_etl=debug", "format": "json" }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::engine::RetryConfig;
use crate::errors::{EtlError, EtlResult};
use crate::store::SqliteConfig;

/// Overrides `upsert.shard_count`.
pub const ENV_SHARDS: &str = "PRICING_ETL_SHARDS";

/// Overrides `log.filter`.
pub const ENV_LOG: &str = "PRICING_ETL_LOG";

/// Upsert engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpsertConfig {
    /// Number of key-hash shards merged concurrently per table.
    pub shard_count: usize,
    /// Retry policy for transient store errors.
    pub retry: RetryConfig,
}

impl Default for UpsertConfig {
    fn default() -> Self {
        Self {
            shard_count: 4,
            retry: RetryConfig::default(),
        }
    }
}

impl UpsertConfig {
    /// Sets the shard count.
    #[must_use]
    pub fn with_shard_count(mut self, shards: usize) -> Self {
        self.shard_count = shards;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Aggregation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Worker threads; 1 means single-threaded.
    pub workers: usize,
    /// Whether aggregates carry their member booking ids.
    pub collect_booking_ids: bool,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            collect_booking_ids: false,
        }
    }
}

impl AggregationConfig {
    /// Sets the worker count.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Enables or disables booking id collection.
    #[must_use]
    pub fn with_collect_booking_ids(mut self, collect: bool) -> Self {
        self.collect_booking_ids = collect;
        self
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "pricing_etl=info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Complete configuration of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    /// Upsert engine settings.
    pub upsert: UpsertConfig,
    /// Aggregation settings.
    pub aggregation: AggregationConfig,
    /// SQLite store; without it runs need a store handle or a curated directory.
    pub sqlite: Option<SqliteConfig>,
    /// Directory for whole-dataset output when no store is configured.
    pub curated_dir: Option<PathBuf>,
    /// Logging settings.
    pub log: LogConfig,
}

impl EtlConfig {
    /// Creates a default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> EtlResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| EtlError::Config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> EtlResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// Sets the upsert settings.
    #[must_use]
    pub fn with_upsert(mut self, upsert: UpsertConfig) -> Self {
        self.upsert = upsert;
        self
    }

    /// Sets the aggregation settings.
    #[must_use]
    pub fn with_aggregation(mut self, aggregation: AggregationConfig) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Sets the SQLite store.
    #[must_use]
    pub fn with_sqlite(mut self, sqlite: SqliteConfig) -> Self {
        self.sqlite = Some(sqlite);
        self
    }

    /// Sets the curated output directory.
    #[must_use]
    pub fn with_curated_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.curated_dir = Some(dir.into());
        self
    }

    /// Sets the logging settings.
    #[must_use]
    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Applies `PRICING_ETL_SHARDS` and `PRICING_ETL_LOG` from the process
    /// environment.
    pub fn apply_env_overrides(&mut self) -> EtlResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> EtlResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_SHARDS) {
            self.upsert.shard_count = raw.trim().parse().map_err(|_| {
                EtlError::Config(format!("{ENV_SHARDS} must be a positive integer, got {raw:?}"))
            })?;
        }
        if let Some(filter) = lookup(ENV_LOG) {
            self.log.filter = filter;
        }
        self.validate()
    }

    /// Checks value ranges.
    pub fn validate(&self) -> EtlResult<()> {
        if self.upsert.shard_count == 0 {
            return Err(EtlError::Config("upsert.shard_count must be at least 1".into()));
        }
        if self.upsert.retry.max_attempts == 0 {
            return Err(EtlError::Config("upsert.retry.max_attempts must be at least 1".into()));
        }
        if self.upsert.retry.base_delay_ms > self.upsert.retry.max_delay_ms {
            return Err(EtlError::Config(
                "upsert.retry.base_delay_ms must not exceed max_delay_ms".into(),
            ));
        }
        if self.aggregation.workers == 0 {
            return Err(EtlError::Config("aggregation.workers must be at least 1".into()));
        }
        if let Some(sqlite) = &self.sqlite {
            if sqlite.pool_size == 0 {
                return Err(EtlError::Config("sqlite.pool_size must be at least 1".into()));
            }
        }
        Ok(())
    }
}
