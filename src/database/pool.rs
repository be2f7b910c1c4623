//! Connection manager
//!
//! Pools backend connections with `deadpool`, bounds acquisition with a
//! timeout, and retries transient statement failures with exponential
//! backoff. Acquisition is the only point where callers serialize: a pooled
//! connection belongs to one caller until it is released or dropped.

use deadpool::managed::{self, Metrics, Object, Pool, PoolError, RecycleError, RecycleResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::config::{LoaderConfig, RetrySection};
use super::{
    ConnectionFactory, DatabaseError, DatabaseResult, DbConnection, Dialect, QueryResult, SqlValue,
};

/// deadpool manager wrapping a [`ConnectionFactory`]
pub struct FactoryManager {
    factory: Arc<dyn ConnectionFactory>,
}

impl managed::Manager for FactoryManager {
    type Type = Box<dyn DbConnection>;
    type Error = DatabaseError;

    async fn create(&self) -> Result<Box<dyn DbConnection>, DatabaseError> {
        self.factory.connect().await
    }

    async fn recycle(
        &self,
        conn: &mut Box<dyn DbConnection>,
        _: &Metrics,
    ) -> RecycleResult<DatabaseError> {
        match conn.health_check().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(RecycleError::Message("health check returned no row".into())),
            Err(e) => Err(RecycleError::Backend(e)),
        }
    }
}

/// A connection checked out of the pool; dropping it releases it
pub type PooledConnection = Object<FactoryManager>;

/// Result of [`ConnectionManager::execute`]
#[derive(Debug, Clone)]
pub enum StatementResult {
    RowsAffected(u64),
    ResultSet(QueryResult),
}

impl StatementResult {
    pub fn rows_affected(&self) -> u64 {
        match self {
            StatementResult::RowsAffected(n) => *n,
            StatementResult::ResultSet(_) => 0,
        }
    }

    pub fn into_result_set(self) -> Option<QueryResult> {
        match self {
            StatementResult::ResultSet(r) => Some(r),
            StatementResult::RowsAffected(_) => None,
        }
    }
}

/// Pool occupancy snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub max_size: usize,
    pub size: usize,
    pub available: usize,
    pub waiting: usize,
}

/// Pooled, retrying access to one backend
#[derive(Clone)]
pub struct ConnectionManager {
    pool: Pool<FactoryManager>,
    dialect: Dialect,
    target: String,
    config: Arc<LoaderConfig>,
}

impl ConnectionManager {
    /// Create a manager over an existing factory
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        config: Arc<LoaderConfig>,
    ) -> DatabaseResult<Self> {
        config.validate()?;
        let dialect = factory.dialect();
        let target = factory.describe();
        let pool = Pool::builder(FactoryManager { factory })
            .max_size(config.database.pool_size)
            .wait_timeout(Some(config.acquire_timeout()))
            .create_timeout(Some(config.acquire_timeout()))
            .runtime(deadpool::Runtime::Tokio1)
            .build()
            .map_err(|e| DatabaseError::ConfigError(format!("Failed to build pool: {}", e)))?;

        tracing::info!(
            "Connection pool for {} ({}) with {} connections",
            target,
            dialect,
            config.database.pool_size
        );

        Ok(Self {
            pool,
            dialect,
            target,
            config,
        })
    }

    /// Build the factory for the configured backend and wrap it in a pool
    ///
    /// DuckDB paths are resolved relative to `base_dir`.
    #[allow(unused_variables)]
    pub async fn from_config(
        config: Arc<LoaderConfig>,
        base_dir: &std::path::Path,
    ) -> DatabaseResult<Self> {
        use super::config::DatabaseBackendType;

        let factory: Arc<dyn ConnectionFactory> = match config.database.backend {
            #[cfg(feature = "duckdb-backend")]
            DatabaseBackendType::DuckDB => match config.get_duckdb_path(base_dir) {
                Some(path) => Arc::new(super::DuckDbFactory::open(&path)?),
                None => Arc::new(super::DuckDbFactory::in_memory()?),
            },
            #[cfg(feature = "postgres-backend")]
            DatabaseBackendType::Postgres => {
                let url = config.get_postgres_connection_string().ok_or_else(|| {
                    DatabaseError::ConfigError("postgres.connection_string is not set".to_string())
                })?;
                Arc::new(super::PostgresFactory::new(url))
            }
            #[allow(unreachable_patterns)]
            other => {
                return Err(DatabaseError::ConfigError(format!(
                    "Backend {} is not compiled in",
                    other
                )));
            }
        };
        Self::new(factory, config)
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn shared_config(&self) -> Arc<LoaderConfig> {
        Arc::clone(&self.config)
    }

    /// Masked description of the backend
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Check out a connection, waiting at most the configured acquire timeout
    pub async fn acquire(&self) -> DatabaseResult<PooledConnection> {
        self.pool.get().await.map_err(|e| match e {
            PoolError::Timeout(kind) => DatabaseError::ConnectionUnavailable(format!(
                "no connection to {} within {} ms ({:?})",
                self.target, self.config.database.acquire_timeout_ms, kind
            )),
            PoolError::Backend(inner) => DatabaseError::ConnectionUnavailable(format!(
                "failed to open connection to {}: {}",
                self.target, inner
            )),
            other => DatabaseError::ConnectionUnavailable(format!(
                "pool for {} unusable: {}",
                self.target, other
            )),
        })
    }

    /// Return a connection to the pool
    ///
    /// Dropping a [`PooledConnection`] has the same effect.
    pub fn release(&self, conn: PooledConnection) {
        drop(conn);
    }

    /// Execute a statement with bounded retry on transient failures
    ///
    /// Statements whose text starts with `SELECT` or `WITH` return a result
    /// set; anything else returns the affected row count. Only use this for
    /// statements that are safe to repeat, i.e. outside an open transaction.
    pub async fn execute(
        &self,
        conn: &mut dyn DbConnection,
        sql: &str,
        params: &[SqlValue],
    ) -> DatabaseResult<StatementResult> {
        let returns_rows = {
            let head = sql.trim_start().to_uppercase();
            head.starts_with("SELECT") || head.starts_with("WITH")
        };

        let mut retry = RetryState::new(&self.config.retry);
        loop {
            let result = if returns_rows {
                conn.query(sql, params).await.map(StatementResult::ResultSet)
            } else {
                conn.execute(sql, params)
                    .await
                    .map(StatementResult::RowsAffected)
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) => retry.backoff(e, sql).await?,
            }
        }
    }

    /// Acquire, run `execute`, and release
    pub async fn execute_once(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> DatabaseResult<StatementResult> {
        let mut conn = self.acquire().await?;
        self.execute(&mut **conn, sql, params).await
    }

    /// Acquire a connection and check it answers
    pub async fn health_check(&self) -> DatabaseResult<bool> {
        let mut conn = self.acquire().await?;
        conn.health_check().await
    }

    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available as usize,
            waiting: status.waiting,
        }
    }

    /// Close the pool; outstanding connections are dropped when released
    pub fn close(&self) {
        self.pool.close();
    }
}

/// Attempt counter with exponential backoff between attempts
pub(crate) struct RetryState<'a> {
    retry: &'a RetrySection,
    attempts: u32,
    attempt: u32,
}

impl<'a> RetryState<'a> {
    /// Allow `retry.max_attempts` attempts
    pub(crate) fn new(retry: &'a RetrySection) -> Self {
        Self::with_attempts(retry, retry.max_attempts)
    }

    /// Allow `attempts` attempts with the backoff schedule of `retry`
    pub(crate) fn with_attempts(retry: &'a RetrySection, attempts: u32) -> Self {
        Self {
            retry,
            attempts: attempts.max(1),
            attempt: 0,
        }
    }

    /// Attempts made so far
    pub(crate) fn attempts_made(&self) -> u32 {
        self.attempt
    }

    /// Record a failed attempt
    ///
    /// Sleeps and returns `Ok(())` when the error is transient and attempts
    /// remain. Otherwise returns the error to surface; exhausted retries
    /// surface as `TransientFailure` carrying the last error.
    pub(crate) async fn backoff(&mut self, error: DatabaseError, what: &str) -> DatabaseResult<()> {
        self.attempt += 1;
        if !error.is_transient() {
            return Err(error);
        }
        if self.attempt >= self.attempts {
            tracing::warn!("Giving up after {} attempts: {}", self.attempt, error);
            return Err(DatabaseError::TransientFailure(format!(
                "{} (after {} attempts)",
                error, self.attempt
            )));
        }
        let delay = self.retry.delay_for(self.attempt - 1);
        tracing::debug!(
            "Transient failure on attempt {} of {}, retrying in {:?}: {} [{}]",
            self.attempt,
            self.attempts,
            delay,
            error,
            statement_head(what)
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

/// First line of a statement, shortened for logs
fn statement_head(sql: &str) -> String {
    let line = sql.trim().lines().next().unwrap_or_default();
    if line.chars().count() > 80 {
        format!("{}...", line.chars().take(80).collect::<String>())
    } else {
        line.to_string()
    }
}
