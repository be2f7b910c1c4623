//! PostgreSQL database backend implementation
//!
//! Each pooled connection is its own `tokio_postgres::Client` with the
//! connection task spawned onto the runtime.

use async_trait::async_trait;
use bytes::Bytes;
use futures::SinkExt;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;

use super::{
    ConnectionFactory, DatabaseError, DatabaseResult, DbConnection, Dialect, QueryResult, SqlValue,
    mask_connection_string,
};

/// SQLSTATE codes worth retrying
const TRANSIENT_STATES: &[SqlState] = &[
    SqlState::T_R_SERIALIZATION_FAILURE,
    SqlState::T_R_DEADLOCK_DETECTED,
    SqlState::LOCK_NOT_AVAILABLE,
    SqlState::TOO_MANY_CONNECTIONS,
    SqlState::ADMIN_SHUTDOWN,
];

/// Classify a driver error by SQLSTATE; connection class `08` and closed
/// connections are transient too
fn classify(e: tokio_postgres::Error, context: &str) -> DatabaseError {
    let transient = e.is_closed()
        || e.code().is_some_and(|code| {
            TRANSIENT_STATES.contains(code) || code.code().starts_with("08")
        })
        || (e.code().is_none() && e.to_string().to_lowercase().contains("connection"));
    if transient {
        DatabaseError::TransientFailure(format!("{}: {}", context, e))
    } else {
        DatabaseError::PermanentFailure(format!("{}: {}", context, e))
    }
}

/// Encode rows in the text format of `COPY ... FROM STDIN`
fn copy_payload(rows: &[Vec<Option<String>>]) -> String {
    let mut out = String::new();
    for row in rows {
        let fields: Vec<String> = row
            .iter()
            .map(|value| match value {
                None => "\\N".to_string(),
                Some(text) => text
                    .replace('\\', "\\\\")
                    .replace('\t', "\\t")
                    .replace('\n', "\\n")
                    .replace('\r', "\\r"),
            })
            .collect();
        out.push_str(&fields.join("\t"));
        out.push('\n');
    }
    out
}

/// Opens PostgreSQL connections
pub struct PostgresFactory {
    connection_string: String,
}

impl PostgresFactory {
    pub fn new(connection_string: &str) -> Self {
        Self {
            connection_string: connection_string.to_string(),
        }
    }

    /// Get the connection string (masked for security)
    pub fn connection_string_masked(&self) -> String {
        mask_connection_string(&self.connection_string)
    }
}

#[async_trait]
impl ConnectionFactory for PostgresFactory {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn connect(&self) -> DatabaseResult<Box<dyn DbConnection>> {
        let (client, connection) =
            tokio_postgres::connect(&self.connection_string, tokio_postgres::NoTls)
                .await
                .map_err(|e| {
                    DatabaseError::ConnectionUnavailable(format!(
                        "Failed to connect to PostgreSQL at {}: {}",
                        self.connection_string_masked(),
                        e
                    ))
                })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!("PostgreSQL connection error: {}", e);
            }
        });

        Ok(Box::new(PostgresConnection { client }))
    }

    fn describe(&self) -> String {
        self.connection_string_masked()
    }
}

/// One PostgreSQL connection
pub struct PostgresConnection {
    client: tokio_postgres::Client,
}

impl PostgresConnection {
    fn bind(params: &[SqlValue]) -> Vec<Option<String>> {
        params
            .iter()
            .map(|p| p.to_param_text(Dialect::Postgres))
            .collect()
    }

    /// Convert a PostgreSQL row to a JSON value
    fn row_to_json(row: &tokio_postgres::Row, columns: &[String]) -> serde_json::Value {
        let mut map = serde_json::Map::new();

        for (i, col_name) in columns.iter().enumerate() {
            let value = Self::get_column_value(row, i);
            map.insert(col_name.clone(), value);
        }

        serde_json::Value::Object(map)
    }

    /// Get a column value as JSON
    fn get_column_value(row: &tokio_postgres::Row, idx: usize) -> serde_json::Value {
        if let Ok(v) = row.try_get::<_, Option<String>>(idx) {
            return v
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<i64>>(idx) {
            return v
                .map(|n| serde_json::Value::Number(n.into()))
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<i32>>(idx) {
            return v
                .map(|n| serde_json::Value::Number(n.into()))
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<i16>>(idx) {
            return v
                .map(|n| serde_json::Value::Number(n.into()))
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<bool>>(idx) {
            return v
                .map(serde_json::Value::Bool)
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<f64>>(idx) {
            return v
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<Vec<u8>>>(idx) {
            use base64::Engine;
            return v
                .map(|b| {
                    serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b))
                })
                .unwrap_or(serde_json::Value::Null);
        }

        // Remaining types (numeric, timestamp, ...) must be cast to text in SQL
        serde_json::Value::Null
    }
}

#[async_trait]
impl DbConnection for PostgresConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DatabaseResult<u64> {
        let bound = Self::bind(params);
        let param_refs: Vec<&(dyn ToSql + Sync)> =
            bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        self.client
            .execute(sql, &param_refs)
            .await
            .map_err(|e| classify(e, "Execute failed"))
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> DatabaseResult<QueryResult> {
        let start = std::time::Instant::now();
        let bound = Self::bind(params);
        let param_refs: Vec<&(dyn ToSql + Sync)> =
            bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        let statement = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| classify(e, "Prepare failed"))?;
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let rows = self
            .client
            .query(&statement, &param_refs)
            .await
            .map_err(|e| classify(e, "Query failed"))?;

        Ok(QueryResult {
            rows: rows
                .iter()
                .map(|row| Self::row_to_json(row, &columns))
                .collect(),
            columns,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn batch_execute(&mut self, sql: &str) -> DatabaseResult<()> {
        self.client
            .batch_execute(sql)
            .await
            .map_err(|e| classify(e, "Batch execute failed"))
    }

    async fn copy_text_rows(
        &mut self,
        table: &str,
        rows: &[Vec<Option<String>>],
    ) -> DatabaseResult<u64> {
        let sql = format!("COPY {} FROM STDIN", Dialect::Postgres.quote(table));
        let sink = self
            .client
            .copy_in::<_, Bytes>(&sql)
            .await
            .map_err(|e| classify(e, "COPY failed"))?;
        let mut sink = std::pin::pin!(sink);
        sink.send(Bytes::from(copy_payload(rows)))
            .await
            .map_err(|e| classify(e, "COPY send failed"))?;
        sink.as_mut()
            .finish()
            .await
            .map_err(|e| classify(e, "COPY failed"))
    }

    async fn health_check(&mut self) -> DatabaseResult<bool> {
        if self.client.is_closed() {
            return Ok(false);
        }
        self.query("SELECT 1 AS ok", &[])
            .await
            .map(|r| r.row_count() == 1)
    }
}
