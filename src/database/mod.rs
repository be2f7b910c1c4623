//! Database backend abstraction
//!
//! This module provides the connection layer the loader runs on:
//! - DuckDB: embedded database, file-backed or in-memory
//! - PostgreSQL: server deployments
//! - MySQL: SQL rendering only (no driver is linked)
//!
//! Backends implement [`DbConnection`]; a [`ConnectionFactory`] opens them and
//! the [`ConnectionManager`] pools them and retries transient failures.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(feature = "duckdb-backend")]
pub mod duckdb;

#[cfg(feature = "postgres-backend")]
pub mod postgres;

pub mod config;
pub mod dialect;
pub mod pool;
pub mod value;

#[cfg(feature = "duckdb-backend")]
pub use self::duckdb::{DuckDbConnection, DuckDbFactory};

#[cfg(feature = "postgres-backend")]
pub use self::postgres::{PostgresConnection, PostgresFactory};

pub use config::LoaderConfig;
pub use dialect::Dialect;
pub use pool::{ConnectionManager, PoolStatus, PooledConnection, StatementResult};
pub use value::SqlValue;

/// Error type for database operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum DatabaseError {
    /// Pool exhausted past the acquire timeout, or the backend is unreachable
    #[error("Connection unavailable: {0}")]
    ConnectionUnavailable(String),

    /// Lock timeout, deadlock, serialization conflict or network blip
    #[error("Transient failure: {0}")]
    TransientFailure(String),

    /// Constraint violation, syntax error, type mismatch
    #[error("Permanent failure: {0}")]
    PermanentFailure(String),

    /// BEGIN/COMMIT/ROLLBACK failed
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Operation not available for a dialect
    #[error("{operation} is not supported for the {dialect} dialect")]
    Unsupported {
        dialect: &'static str,
        operation: &'static str,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

impl DatabaseError {
    /// Whether retrying the same statement may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, DatabaseError::TransientFailure(_))
    }
}

/// Result type for database operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Query result row as a JSON value
pub type QueryRow = serde_json::Value;

/// Query result set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names
    pub columns: Vec<String>,
    /// Rows of data, one JSON object per row
    pub rows: Vec<QueryRow>,
    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

impl QueryResult {
    /// Create a new query result
    pub fn new(columns: Vec<String>, rows: Vec<QueryRow>) -> Self {
        Self {
            columns,
            rows,
            execution_time_ms: 0,
        }
    }

    /// Create an empty result
    pub fn empty() -> Self {
        Self::default()
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Check if the result is empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Read an integer cell; numeric strings are accepted
    pub fn get_i64(&self, row: usize, column: &str) -> Option<i64> {
        match self.rows.get(row)?.get(column)? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Read a string cell
    pub fn get_str(&self, row: usize, column: &str) -> Option<&str> {
        self.rows.get(row)?.get(column)?.as_str()
    }
}

/// A live connection to one backend
///
/// A connection is owned by exactly one caller at a time; the pool hands it
/// out and takes it back. Every placeholder in `sql` is produced by
/// [`Dialect::placeholder`] so parameters can be bound as text.
#[async_trait]
pub trait DbConnection: Send {
    /// Dialect of the backend behind this connection
    fn dialect(&self) -> Dialect;

    /// Backend type name ("duckdb" or "postgres")
    fn backend_type(&self) -> &'static str;

    /// Execute a statement and return the affected row count
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DatabaseResult<u64>;

    /// Execute a query and return its rows
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> DatabaseResult<QueryResult>;

    /// Execute one or more statements without parameters
    async fn batch_execute(&mut self, sql: &str) -> DatabaseResult<()>;

    /// Bulk-append rows to a table whose columns all hold text, in column
    /// order, through the backend's bulk path; `None` is SQL NULL
    async fn copy_text_rows(
        &mut self,
        _table: &str,
        _rows: &[Vec<Option<String>>],
    ) -> DatabaseResult<u64> {
        Err(DatabaseError::Unsupported {
            dialect: self.dialect().name(),
            operation: "bulk copy",
        })
    }

    async fn begin(&mut self) -> DatabaseResult<()> {
        self.batch_execute("BEGIN TRANSACTION")
            .await
            .map_err(|e| DatabaseError::TransactionFailed(format!("BEGIN: {}", e)))
    }

    async fn commit(&mut self) -> DatabaseResult<()> {
        self.batch_execute("COMMIT").await
    }

    async fn rollback(&mut self) -> DatabaseResult<()> {
        self.batch_execute("ROLLBACK")
            .await
            .map_err(|e| DatabaseError::TransactionFailed(format!("ROLLBACK: {}", e)))
    }

    /// Check the connection is usable
    async fn health_check(&mut self) -> DatabaseResult<bool> {
        self.query("SELECT 1 AS ok", &[]).await.map(|r| r.row_count() == 1)
    }
}

/// Opens new connections for the pool
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Dialect of the connections this factory opens
    fn dialect(&self) -> Dialect;

    /// Open a new connection
    async fn connect(&self) -> DatabaseResult<Box<dyn DbConnection>>;

    /// Description of the target safe to log (credentials masked)
    fn describe(&self) -> String;
}

/// Mask the password in a connection string
///
/// ```
/// use pdbx_db_loader::database::mask_connection_string;
///
/// assert_eq!(
///     mask_connection_string("postgresql://loader:secret@db/pdbx"),
///     "postgresql://loader:****@db/pdbx"
/// );
/// ```
pub fn mask_connection_string(connection_string: &str) -> String {
    if let Some(at_pos) = connection_string.rfind('@')
        && let Some(colon_pos) = connection_string[..at_pos].rfind(':')
        && !connection_string[..colon_pos].ends_with('/')
        && connection_string[..colon_pos].contains("//")
    {
        let prefix = &connection_string[..colon_pos + 1];
        let suffix = &connection_string[at_pos..];
        return format!("{}****{}", prefix, suffix);
    }
    connection_string.to_string()
}
