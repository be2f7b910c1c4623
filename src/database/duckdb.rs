//! DuckDB database backend implementation
//!
//! Provides an embedded backend, file-backed or in-memory. The factory keeps
//! one root connection open for the lifetime of the pool; pooled connections
//! are clones of it and therefore share one database instance.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{
    ConnectionFactory, DatabaseError, DatabaseResult, DbConnection, Dialect, QueryResult, SqlValue,
};

/// Message fragments of DuckDB errors worth retrying
const TRANSIENT_MARKERS: &[&str] = &[
    "write-write conflict",
    "conflict on tuple",
    "could not set lock",
    "database is locked",
    "interrupted",
    "resource temporarily unavailable",
];

/// Classify a DuckDB error by its message
fn classify(e: duckdb::Error, context: &str) -> DatabaseError {
    let message = e.to_string();
    let lower = message.to_lowercase();
    if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        DatabaseError::TransientFailure(format!("{}: {}", context, message))
    } else {
        DatabaseError::PermanentFailure(format!("{}: {}", context, message))
    }
}

/// Opens connections to one DuckDB database
pub struct DuckDbFactory {
    /// Path to the database file (None for in-memory)
    db_path: Option<PathBuf>,
    /// Root connection every pooled connection is cloned from
    root: Mutex<duckdb::Connection>,
}

impl DuckDbFactory {
    /// Open (or create) a file-based database
    pub fn open(db_path: impl AsRef<Path>) -> DatabaseResult<Self> {
        let path = db_path.as_ref().to_path_buf();
        let connection = duckdb::Connection::open(&path).map_err(|e| {
            DatabaseError::ConnectionUnavailable(format!("Failed to open DuckDB: {}", e))
        })?;

        Ok(Self {
            db_path: Some(path),
            root: Mutex::new(connection),
        })
    }

    /// Create an in-memory database
    ///
    /// The database lives as long as the factory.
    pub fn in_memory() -> DatabaseResult<Self> {
        let connection = duckdb::Connection::open_in_memory().map_err(|e| {
            DatabaseError::ConnectionUnavailable(format!(
                "Failed to create in-memory DuckDB: {}",
                e
            ))
        })?;

        Ok(Self {
            db_path: None,
            root: Mutex::new(connection),
        })
    }

    /// Get the database file path (None for in-memory)
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Check if this is an in-memory database
    pub fn is_in_memory(&self) -> bool {
        self.db_path.is_none()
    }

    /// Open a connection without going through a pool
    pub fn connect_direct(&self) -> DatabaseResult<DuckDbConnection> {
        let root = self
            .root
            .lock()
            .map_err(|e| DatabaseError::ConnectionUnavailable(format!("Lock error: {}", e)))?;
        let conn = root.try_clone().map_err(|e| {
            DatabaseError::ConnectionUnavailable(format!("Failed to clone DuckDB connection: {}", e))
        })?;
        Ok(DuckDbConnection { conn })
    }
}

#[async_trait]
impl ConnectionFactory for DuckDbFactory {
    fn dialect(&self) -> Dialect {
        Dialect::DuckDb
    }

    async fn connect(&self) -> DatabaseResult<Box<dyn DbConnection>> {
        Ok(Box::new(self.connect_direct()?))
    }

    fn describe(&self) -> String {
        match &self.db_path {
            Some(path) => format!("duckdb:{}", path.display()),
            None => "duckdb::memory:".to_string(),
        }
    }
}

/// One DuckDB connection
pub struct DuckDbConnection {
    conn: duckdb::Connection,
}

impl DuckDbConnection {
    fn bind(params: &[SqlValue]) -> Vec<Option<String>> {
        params
            .iter()
            .map(|p| p.to_param_text(Dialect::DuckDb))
            .collect()
    }

    /// Convert a DuckDB row to a JSON value
    fn row_to_json(row: &duckdb::Row, columns: &[String]) -> serde_json::Value {
        let mut map = serde_json::Map::new();

        for (i, col_name) in columns.iter().enumerate() {
            let value: serde_json::Value = match row.get_ref(i) {
                Ok(value_ref) => Self::value_ref_to_json(value_ref),
                Err(_) => serde_json::Value::Null,
            };
            map.insert(col_name.clone(), value);
        }

        serde_json::Value::Object(map)
    }

    /// Convert a DuckDB ValueRef to a JSON value
    fn value_ref_to_json(value: duckdb::types::ValueRef) -> serde_json::Value {
        use duckdb::types::{TimeUnit, ValueRef};

        match value {
            ValueRef::Null => serde_json::Value::Null,
            ValueRef::Boolean(b) => serde_json::Value::Bool(b),
            ValueRef::TinyInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::SmallInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::Int(i) => serde_json::Value::Number(i.into()),
            ValueRef::BigInt(i) => serde_json::Value::Number(i.into()),
            // i128 may not fit in a JSON number
            ValueRef::HugeInt(i) => serde_json::Value::String(i.to_string()),
            ValueRef::UTinyInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::USmallInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::UInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::UBigInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::Float(f) => serde_json::Number::from_f64(f as f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ValueRef::Double(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ValueRef::Decimal(d) => serde_json::Value::String(d.to_string()),
            ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned().into(),
            ValueRef::Blob(bytes) => {
                use base64::Engine;
                serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            ValueRef::Timestamp(unit, v) => {
                let micros = match unit {
                    TimeUnit::Second => v.saturating_mul(1_000_000),
                    TimeUnit::Millisecond => v.saturating_mul(1_000),
                    TimeUnit::Microsecond => v,
                    TimeUnit::Nanosecond => v / 1_000,
                };
                chrono::DateTime::from_timestamp_micros(micros)
                    .map(|dt| {
                        serde_json::Value::String(
                            dt.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string(),
                        )
                    })
                    .unwrap_or(serde_json::Value::Null)
            }
            ValueRef::Date32(days) => chrono::NaiveDate::from_num_days_from_ce_opt(days + 719_163)
                .map(|d| serde_json::Value::String(d.format("%Y-%m-%d").to_string()))
                .unwrap_or(serde_json::Value::Null),
            other => serde_json::Value::String(format!("{:?}", other)),
        }
    }

    fn run_query(&self, sql: &str, params: &[SqlValue]) -> DatabaseResult<QueryResult> {
        let start = std::time::Instant::now();
        let bound = Self::bind(params);
        let param_refs: Vec<&dyn duckdb::ToSql> =
            bound.iter().map(|p| p as &dyn duckdb::ToSql).collect();

        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| classify(e, "Prepare failed"))?;

        // The statement must run before its columns are known
        let mut result_rows = stmt
            .query(param_refs.as_slice())
            .map_err(|e| classify(e, "Query failed"))?;

        let column_count = result_rows.as_ref().map(|r| r.column_count()).unwrap_or(0);
        let columns: Vec<String> = (0..column_count)
            .map(|i| {
                result_rows
                    .as_ref()
                    .and_then(|r| r.column_name(i).ok())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("col{}", i))
            })
            .collect();

        let mut rows = Vec::new();
        while let Some(row) = result_rows
            .next()
            .map_err(|e| classify(e, "Row fetch error"))?
        {
            rows.push(Self::row_to_json(row, &columns));
        }

        Ok(QueryResult {
            columns,
            rows,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[async_trait]
impl DbConnection for DuckDbConnection {
    fn dialect(&self) -> Dialect {
        Dialect::DuckDb
    }

    fn backend_type(&self) -> &'static str {
        "duckdb"
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DatabaseResult<u64> {
        let bound = Self::bind(params);
        let param_refs: Vec<&dyn duckdb::ToSql> =
            bound.iter().map(|p| p as &dyn duckdb::ToSql).collect();

        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| classify(e, "Prepare failed"))?;
        let affected = stmt
            .execute(param_refs.as_slice())
            .map_err(|e| classify(e, "Execute failed"))?;
        Ok(affected as u64)
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> DatabaseResult<QueryResult> {
        self.run_query(sql, params)
    }

    async fn batch_execute(&mut self, sql: &str) -> DatabaseResult<()> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| classify(e, "Batch execute failed"))
    }

    async fn copy_text_rows(
        &mut self,
        table: &str,
        rows: &[Vec<Option<String>>],
    ) -> DatabaseResult<u64> {
        let mut appender = self
            .conn
            .appender(table)
            .map_err(|e| classify(e, "Appender failed"))?;
        for row in rows {
            let values: Vec<&dyn duckdb::ToSql> =
                row.iter().map(|v| v as &dyn duckdb::ToSql).collect();
            appender
                .append_row(values.as_slice())
                .map_err(|e| classify(e, "Append failed"))?;
        }
        appender
            .flush()
            .map_err(|e| classify(e, "Appender flush failed"))?;
        Ok(rows.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database() {
        let factory = DuckDbFactory::in_memory().unwrap();
        assert!(factory.is_in_memory());
        assert!(factory.db_path().is_none());
        assert_eq!(factory.describe(), "duckdb::memory:");
    }

    #[tokio::test]
    async fn test_clones_share_database() {
        let factory = DuckDbFactory::in_memory().unwrap();
        let mut a = factory.connect().await.unwrap();
        let mut b = factory.connect().await.unwrap();

        a.batch_execute("CREATE TABLE t (id INTEGER, name VARCHAR)")
            .await
            .unwrap();
        let n = a
            .execute(
                "INSERT INTO t VALUES (CAST(? AS INTEGER), CAST(? AS VARCHAR))",
                &[SqlValue::Int(1), SqlValue::Text("one".into())],
            )
            .await
            .unwrap();
        assert_eq!(n, 1);

        let result = b.query("SELECT id, name FROM t", &[]).await.unwrap();
        assert_eq!(result.columns, vec!["id", "name"]);
        assert_eq!(result.get_i64(0, "id"), Some(1));
        assert_eq!(result.get_str(0, "name"), Some("one"));
    }

    #[tokio::test]
    async fn test_null_and_typed_params() {
        let factory = DuckDbFactory::in_memory().unwrap();
        let mut conn = factory.connect().await.unwrap();
        conn.batch_execute("CREATE TABLE v (d DECIMAL(6,2), ts TIMESTAMP, b BLOB, n INTEGER)")
            .await
            .unwrap();
        let ts = chrono::NaiveDate::from_ymd_opt(2020, 5, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        conn.execute(
            "INSERT INTO v VALUES (CAST(? AS DECIMAL(6,2)), CAST(? AS TIMESTAMP), CAST(? AS BLOB), CAST(? AS INTEGER))",
            &[
                SqlValue::Decimal("12.50".into()),
                SqlValue::DateTime(ts),
                SqlValue::Bytes(vec![0xde, 0xad]),
                SqlValue::Null,
            ],
        )
        .await
        .unwrap();

        let result = conn
            .query(
                "SELECT CAST(d AS VARCHAR) AS d, ts, octet_length(b) AS len, n FROM v",
                &[],
            )
            .await
            .unwrap();
        assert_eq!(result.get_str(0, "d"), Some("12.50"));
        assert_eq!(result.get_str(0, "ts"), Some("2020-05-01 08:30:00"));
        assert_eq!(result.get_i64(0, "len"), Some(2));
        assert!(result.rows[0]["n"].is_null());
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let factory = DuckDbFactory::in_memory().unwrap();
        let mut conn = factory.connect().await.unwrap();
        conn.batch_execute("CREATE TABLE t (id INTEGER)").await.unwrap();
        conn.begin().await.unwrap();
        conn.batch_execute("INSERT INTO t VALUES (1)").await.unwrap();
        conn.rollback().await.unwrap();
        let result = conn.query("SELECT COUNT(*) AS n FROM t", &[]).await.unwrap();
        assert_eq!(result.get_i64(0, "n"), Some(0));
    }

    #[tokio::test]
    async fn test_constraint_violation_is_permanent() {
        let factory = DuckDbFactory::in_memory().unwrap();
        let mut conn = factory.connect().await.unwrap();
        conn.batch_execute("CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t VALUES (1)")
            .await
            .unwrap();
        let err = conn
            .execute("INSERT INTO t VALUES (1)", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::PermanentFailure(_)));
    }

    #[tokio::test]
    async fn test_copy_text_rows() {
        let factory = DuckDbFactory::in_memory().unwrap();
        let mut conn = factory.connect().await.unwrap();
        conn.batch_execute("CREATE TABLE stage (id VARCHAR, name VARCHAR)")
            .await
            .unwrap();
        let rows = vec![
            vec![Some("1".to_string()), Some("one".to_string())],
            vec![Some("2".to_string()), None],
        ];
        assert_eq!(conn.copy_text_rows("stage", &rows).await.unwrap(), 2);

        let result = conn
            .query("SELECT id, name FROM stage ORDER BY id", &[])
            .await
            .unwrap();
        assert_eq!(result.get_str(0, "name"), Some("one"));
        assert!(result.rows[1]["name"].is_null());
    }

    #[tokio::test]
    async fn test_health_check() {
        let factory = DuckDbFactory::in_memory().unwrap();
        let mut conn = factory.connect().await.unwrap();
        assert!(conn.health_check().await.unwrap());
        assert_eq!(conn.backend_type(), "duckdb");
    }
}
