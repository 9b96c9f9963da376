//! Relational reference store backed by SQLite.
//!
//! Each merge runs as one `INSERT ... ON CONFLICT ... DO UPDATE` statement
//! inside an immediate transaction, so no other writer can observe or
//! interleave with a half-applied merge. Statements run on tokio's blocking
//! pool; the connection moves into the blocking task and back.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::{MergeOutcome, Store, StoreSession};
use crate::errors::StoreError;
use crate::model::{Row, Value};
use crate::policy::KeyPolicy;

/// Connection settings for [`SqliteStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database file path.
    pub path: PathBuf,
    /// Number of pooled connections (at most one per concurrent shard).
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// How long a connection waits on a locked database, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_pool_size() -> usize {
    4
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl SqliteConfig {
    /// Creates a config for a database file with default pool settings.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }

    /// Sets the pool size.
    #[must_use]
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Sets the busy timeout.
    #[must_use]
    pub fn with_busy_timeout_ms(mut self, ms: u64) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

struct Pool {
    idle: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
    config: SqliteConfig,
}

impl Pool {
    fn checkout(&self) -> Result<Connection, StoreError> {
        match self.idle.lock().pop() {
            Some(conn) => Ok(conn),
            None => open_connection(&self.config),
        }
    }

    fn checkin(&self, conn: Connection) {
        self.idle.lock().push(conn);
    }
}

/// SQLite-backed [`Store`] with a fixed-size connection pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Arc<Pool>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.pool.config.path)
            .field("pool_size", &self.pool.config.pool_size)
            .finish()
    }
}

impl SqliteStore {
    /// Opens the pool, eagerly creating every connection.
    pub fn open(config: SqliteConfig) -> Result<Self, StoreError> {
        let size = config.pool_size.max(1);
        let mut idle = Vec::with_capacity(size);
        for _ in 0..size {
            idle.push(open_connection(&config)?);
        }
        info!(path = %config.path.display(), pool_size = size, "Opened SQLite store");

        Ok(Self {
            pool: Arc::new(Pool {
                idle: Mutex::new(idle),
                permits: Arc::new(Semaphore::new(size)),
                config,
            }),
        })
    }

    /// Creates one table per policy, keyed by its key columns.
    pub async fn ensure_schema(&self, policies: &[KeyPolicy]) -> Result<(), StoreError> {
        let ddl: String = policies.iter().map(create_table_sql).collect();
        self.with_connection(move |conn| {
            conn.execute_batch(&ddl).map_err(classify)?;
            Ok(())
        })
        .await
    }

    /// Number of rows stored for a policy's table.
    pub async fn count(&self, policy: &KeyPolicy) -> Result<usize, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote(policy.table.as_str()));
        self.with_connection(move |conn| {
            let count: i64 = conn.query_row(&sql, [], |r| r.get(0)).map_err(classify)?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
        .await
    }

    /// Fetches one row by its key values (in key-column order).
    ///
    /// Values come back with SQLite's storage types: booleans as integers,
    /// dates and timestamps as their canonical text.
    pub async fn fetch(
        &self,
        policy: &KeyPolicy,
        key_values: &[&str],
    ) -> Result<Option<Row>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            policy.columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", "),
            quote(policy.table.as_str()),
            key_predicate(policy, policy.table.as_str()),
        );
        let columns = policy.columns.clone();
        let params: Vec<SqlValue> = key_values
            .iter()
            .map(|v| SqlValue::Text((*v).to_string()))
            .collect();

        self.with_connection(move |conn| {
            conn.query_row(&sql, rusqlite::params_from_iter(params), |r| {
                let mut row = Row::new();
                for (i, column) in columns.iter().enumerate() {
                    let value: SqlValue = r.get(i)?;
                    if let Some(value) = from_sql(value) {
                        row.set(column.as_str(), value);
                    }
                }
                Ok(row)
            })
            .optional()
            .map_err(classify)
        })
        .await
    }

    async fn with_connection<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let mut session = self.checkout().await?;
        let mut conn = session.take()?;
        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = f(&mut conn);
            (conn, result)
        })
        .await
        .map_err(|e| StoreError::connection(format!("blocking task failed: {e}")))?;
        session.restore(conn, &result);
        result
    }

    async fn checkout(&self) -> Result<SqliteSession, StoreError> {
        let permit = self
            .pool
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StoreError::connection("connection pool closed"))?;
        let conn = self.pool.checkout()?;
        Ok(SqliteSession {
            conn: Some(conn),
            pool: self.pool.clone(),
            _permit: permit,
        })
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn prepare(&self, policies: &[KeyPolicy]) -> Result<(), StoreError> {
        self.ensure_schema(policies).await
    }

    async fn acquire(&self) -> Result<Box<dyn StoreSession>, StoreError> {
        Ok(Box::new(self.checkout().await?))
    }
}

/// A pooled connection; returned to the pool on drop.
struct SqliteSession {
    conn: Option<Connection>,
    pool: Arc<Pool>,
    _permit: OwnedSemaphorePermit,
}

impl SqliteSession {
    fn take(&mut self) -> Result<Connection, StoreError> {
        self.conn
            .take()
            .ok_or_else(|| StoreError::connection("connection was lost by an earlier failure"))
    }

    /// Hands the connection back to the session unless `result` shows it is
    /// unusable, in which case it is closed and never returns to the pool.
    fn restore<T>(&mut self, conn: Connection, result: &Result<T, StoreError>) {
        match result {
            Err(err) if err.is_connection() => {
                warn!(error = %err, "Closing SQLite connection after connection error");
                drop(conn);
            }
            _ => self.conn = Some(conn),
        }
    }
}

impl Drop for SqliteSession {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.checkin(conn);
        } else {
            debug!("Discarding lost SQLite connection");
        }
    }
}

#[async_trait]
impl StoreSession for SqliteSession {
    async fn merge(&mut self, policy: &KeyPolicy, row: &Row) -> Result<MergeOutcome, StoreError> {
        let plan = MergePlan::new(policy, row)?;
        let mut conn = self.take()?;

        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = plan.execute(&mut conn);
            (conn, result)
        })
        .await
        .map_err(|e| StoreError::connection(format!("merge task failed: {e}")))?;

        self.restore(conn, &result);
        result
    }
}

/// A prepared merge: SQL text plus bound parameters.
struct MergePlan {
    exists_sql: String,
    upsert_sql: String,
    key_params: Vec<SqlValue>,
    params: Vec<SqlValue>,
}

impl MergePlan {
    fn new(policy: &KeyPolicy, row: &Row) -> Result<Self, StoreError> {
        let mut params = Vec::with_capacity(policy.columns.len());
        for column in &policy.columns {
            let value = row.get(column).ok_or_else(|| {
                StoreError::permanent(format!("row is missing column '{column}'"))
            })?;
            params.push(to_sql(value));
        }
        let key_params = policy
            .key_columns
            .iter()
            .filter_map(|k| policy.columns.iter().position(|c| c == k))
            .map(|i| params[i].clone())
            .collect();

        let table = policy.table.as_str();
        Ok(Self {
            exists_sql: format!(
                "SELECT 1 FROM {} WHERE {}",
                quote(table),
                key_predicate(policy, table)
            ),
            upsert_sql: upsert_sql(policy),
            key_params,
            params,
        })
    }

    fn execute(&self, conn: &mut Connection) -> Result<MergeOutcome, StoreError> {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(classify)?;

        let existed = tx
            .query_row(
                &self.exists_sql,
                rusqlite::params_from_iter(self.key_params.iter()),
                |_| Ok(()),
            )
            .optional()
            .map_err(classify)?
            .is_some();

        let changed = tx
            .execute(&self.upsert_sql, rusqlite::params_from_iter(self.params.iter()))
            .map_err(classify)?;

        tx.commit().map_err(classify)?;

        Ok(match (existed, changed) {
            (false, _) => MergeOutcome::Inserted,
            (true, 0) => MergeOutcome::Stale,
            (true, _) => MergeOutcome::Updated,
        })
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn key_predicate(policy: &KeyPolicy, table: &str) -> String {
    policy
        .key_columns
        .iter()
        .enumerate()
        .map(|(i, k)| format!("{}.{} = ?{}", quote(table), quote(k), i + 1))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn create_table_sql(policy: &KeyPolicy) -> String {
    let columns: Vec<String> = policy
        .columns
        .iter()
        .map(|c| {
            if policy.is_key_column(c) {
                format!("{} TEXT NOT NULL", quote(c))
            } else {
                quote(c)
            }
        })
        .collect();
    let keys: Vec<String> = policy.key_columns.iter().map(|k| quote(k)).collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}));\n",
        quote(policy.table.as_str()),
        columns.join(", "),
        keys.join(", ")
    )
}

fn upsert_sql(policy: &KeyPolicy) -> String {
    let table = quote(policy.table.as_str());
    let columns: Vec<String> = policy.columns.iter().map(|c| quote(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let keys: Vec<String> = policy.key_columns.iter().map(|k| quote(k)).collect();
    let updates: Vec<String> = policy
        .update_columns()
        .map(|c| format!("{0} = excluded.{0}", quote(c)))
        .collect();

    let mut sql = format!(
        "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT ({}) DO ",
        columns.join(", "),
        placeholders.join(", "),
        keys.join(", ")
    );
    if updates.is_empty() {
        sql.push_str("NOTHING");
    } else {
        sql.push_str("UPDATE SET ");
        sql.push_str(&updates.join(", "));
        if let Some(version) = policy.version_column.as_deref() {
            let version = quote(version);
            sql.push_str(&format!(" WHERE excluded.{version} >= {table}.{version}"));
        }
    }
    sql
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Date(_) | Value::Timestamp(_) => SqlValue::Text(value.to_canonical()),
    }
}

fn from_sql(value: SqlValue) -> Option<Value> {
    match value {
        SqlValue::Null | SqlValue::Blob(_) => None,
        SqlValue::Integer(i) => Some(Value::Int(i)),
        SqlValue::Real(f) => Some(Value::Float(f)),
        SqlValue::Text(s) => Some(Value::Text(s)),
    }
}

/// Maps SQLite failures onto the store error taxonomy.
fn classify(err: rusqlite::Error) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            StoreError::transient(err.to_string())
        }
        Some(
            ErrorCode::CannotOpen
            | ErrorCode::NotADatabase
            | ErrorCode::DatabaseCorrupt
            | ErrorCode::SystemIoFailure
            | ErrorCode::ReadOnly,
        ) => StoreError::connection(err.to_string()),
        _ => StoreError::permanent(err.to_string()),
    }
}

fn open_connection(config: &SqliteConfig) -> Result<Connection, StoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(&config.path, flags)
        .map_err(|e| StoreError::connection(format!("cannot open {}: {e}", config.path.display())))?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(classify)?;
    if let Err(err) = conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;") {
        warn!(error = %err, "Could not enable WAL mode");
    }
    Ok(conn)
}
