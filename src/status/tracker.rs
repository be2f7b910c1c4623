//! Persistent status history

use chrono::{NaiveDateTime, SubsecRound, Utc};
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::{BatchAck, RunStatus, StatusError, StatusRecord};
use crate::database::pool::RetryState;
use crate::database::{
    ConnectionManager, DatabaseResult, DbConnection, Dialect, QueryResult, SqlValue,
};
use crate::definitions::{batch_ack_table, load_tracking_schema, status_history_table};
use crate::models::TableDefinition;
use crate::reconcile::Reconciler;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

fn now() -> NaiveDateTime {
    Utc::now().naive_utc().trunc_subsecs(6)
}

fn parse_timestamp(row: usize, result: &QueryResult, column: &str) -> Result<NaiveDateTime, StatusError> {
    let text = result
        .get_str(row, column)
        .ok_or_else(|| StatusError::Malformed(format!("missing {}", column)))?;
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .map_err(|e| StatusError::Malformed(format!("{} '{}': {}", column, text, e)))
}

/// Records and queries run status history
///
/// The tables are created through the reconciler the first time any method
/// needs them. Writers for distinct runs never conflict; a single run is
/// expected to have a single writer.
#[derive(Clone)]
pub struct StatusTracker {
    manager: ConnectionManager,
    history: Arc<TableDefinition>,
    acks: Arc<TableDefinition>,
    bootstrapped: Arc<OnceCell<()>>,
}

impl StatusTracker {
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            history: Arc::new(status_history_table()),
            acks: Arc::new(batch_ack_table()),
            bootstrapped: Arc::new(OnceCell::new()),
        }
    }

    fn dialect(&self) -> Dialect {
        self.manager.dialect()
    }

    fn run_filter(&self) -> String {
        format!(
            "{} = {}",
            self.dialect().quote("run_id"),
            self.dialect().placeholder(1, "VARCHAR")
        )
    }

    /// Create or converge the tracker tables; runs once per tracker
    pub async fn bootstrap(&self) -> Result<(), StatusError> {
        self.bootstrapped
            .get_or_try_init(|| async {
                let outcome = Reconciler::new(self.manager.clone())
                    .run(Arc::new(load_tracking_schema()))
                    .await?;
                if !outcome.reconciliation.operations.is_empty() {
                    tracing::info!(
                        "Status tables bootstrapped with {} operations",
                        outcome.report.applied.len()
                    );
                }
                Ok::<(), StatusError>(())
            })
            .await?;
        Ok(())
    }

    /// Append a status for a run
    ///
    /// Fails with `InvalidTransition` unless the run's current status may be
    /// followed by `status`. Transient failures are retried; the check and
    /// the append share one transaction.
    pub async fn record(
        &self,
        run_id: &str,
        status: RunStatus,
        detail: Option<&str>,
    ) -> Result<StatusRecord, StatusError> {
        self.bootstrap().await?;
        let mut conn = self.manager.acquire().await?;
        let mut retry = RetryState::new(&self.manager.config().retry);
        loop {
            match self.append(&mut **conn, run_id, status, detail).await {
                Ok(record) => {
                    tracing::debug!("Run {} is now {}", run_id, status);
                    return Ok(record);
                }
                Err(StatusError::Database(e)) => retry.backoff(e, "status append").await?,
                Err(other) => return Err(other),
            }
        }
    }

    async fn append(
        &self,
        conn: &mut dyn DbConnection,
        run_id: &str,
        status: RunStatus,
        detail: Option<&str>,
    ) -> Result<StatusRecord, StatusError> {
        conn.begin().await?;
        match self.append_in_transaction(conn, run_id, status, detail).await {
            Ok(record) => {
                conn.commit().await?;
                Ok(record)
            }
            Err(e) => {
                if let Err(rollback) = conn.rollback().await {
                    tracing::warn!("Rollback after failed status append: {}", rollback);
                }
                Err(e)
            }
        }
    }

    async fn append_in_transaction(
        &self,
        conn: &mut dyn DbConnection,
        run_id: &str,
        status: RunStatus,
        detail: Option<&str>,
    ) -> Result<StatusRecord, StatusError> {
        let dialect = self.dialect();
        let sql = format!(
            "SELECT {ord} AS ordinal, {status} AS status FROM {table} WHERE {filter} \
             ORDER BY {ord} DESC LIMIT 1",
            ord = dialect.quote("ordinal"),
            status = dialect.quote("status"),
            table = dialect.quote(&self.history.name),
            filter = self.run_filter()
        );
        let current = conn.query(&sql, &[SqlValue::Text(run_id.to_string())]).await?;

        let ordinal = match current.get_i64(0, "ordinal") {
            Some(last) => {
                let from = current
                    .get_str(0, "status")
                    .unwrap_or_default()
                    .parse::<RunStatus>()
                    .map_err(StatusError::Malformed)?;
                if !from.can_transition_to(status) {
                    return Err(StatusError::InvalidTransition {
                        run_id: run_id.to_string(),
                        from,
                        to: status,
                    });
                }
                last + 1
            }
            None => 1,
        };

        let record = StatusRecord {
            run_id: run_id.to_string(),
            ordinal,
            status,
            recorded_at: now(),
            detail: detail.map(|d| d.to_string()),
        };
        let columns: Vec<_> = self.history.columns.iter().collect();
        let insert = dialect.insert_sql(&self.history.name, &columns, 1);
        conn.execute(
            &insert,
            &[
                SqlValue::Text(record.run_id.clone()),
                SqlValue::Int(record.ordinal),
                SqlValue::Text(status.as_str().to_string()),
                SqlValue::DateTime(record.recorded_at),
                record.detail.clone().map_or(SqlValue::Null, SqlValue::Text),
            ],
        )
        .await?;
        Ok(record)
    }

    async fn select(&self, sql: &str, run_id: &str) -> Result<QueryResult, StatusError> {
        self.bootstrap().await?;
        Ok(self
            .manager
            .execute_once(sql, &[SqlValue::Text(run_id.to_string())])
            .await?
            .into_result_set()
            .unwrap_or_default())
    }

    /// Full history of a run, oldest first
    pub async fn history(&self, run_id: &str) -> Result<Vec<StatusRecord>, StatusError> {
        let dialect = self.dialect();
        let sql = format!(
            "SELECT {ord} AS ordinal, {status} AS status, {at} AS recorded_at, {detail} AS detail \
             FROM {table} WHERE {filter} ORDER BY {ord}",
            ord = dialect.quote("ordinal"),
            status = dialect.quote("status"),
            at = dialect.text_cast(&dialect.quote("recorded_at")),
            detail = dialect.quote("detail"),
            table = dialect.quote(&self.history.name),
            filter = self.run_filter()
        );
        let result = self.select(&sql, run_id).await?;

        (0..result.row_count())
            .map(|row| {
                Ok(StatusRecord {
                    run_id: run_id.to_string(),
                    ordinal: result
                        .get_i64(row, "ordinal")
                        .ok_or_else(|| StatusError::Malformed("missing ordinal".to_string()))?,
                    status: result
                        .get_str(row, "status")
                        .unwrap_or_default()
                        .parse()
                        .map_err(StatusError::Malformed)?,
                    recorded_at: parse_timestamp(row, &result, "recorded_at")?,
                    detail: result.get_str(row, "detail").map(|d| d.to_string()),
                })
            })
            .collect()
    }

    /// Most recent status of a run
    pub async fn latest(&self, run_id: &str) -> Result<StatusRecord, StatusError> {
        self.history(run_id)
            .await?
            .pop()
            .ok_or_else(|| StatusError::NotFound(run_id.to_string()))
    }

    /// Acknowledged batches of a run in sequence order
    pub async fn acknowledged(&self, run_id: &str) -> Result<Vec<BatchAck>, StatusError> {
        let dialect = self.dialect();
        let sql = format!(
            "SELECT {seq} AS batch_seq, {table_name} AS table_name, {ins} AS rows_inserted, \
             {skip} AS rows_skipped, {at} AS acked_at FROM {table} WHERE {filter} ORDER BY {seq}",
            seq = dialect.quote("batch_seq"),
            table_name = dialect.quote("table_name"),
            ins = dialect.quote("rows_inserted"),
            skip = dialect.quote("rows_skipped"),
            at = dialect.text_cast(&dialect.quote("acked_at")),
            table = dialect.quote(&self.acks.name),
            filter = self.run_filter()
        );
        let result = self.select(&sql, run_id).await?;

        (0..result.row_count())
            .map(|row| {
                let count = |column: &str| {
                    result
                        .get_i64(row, column)
                        .map(|n| n as u64)
                        .ok_or_else(|| StatusError::Malformed(format!("missing {}", column)))
                };
                Ok(BatchAck {
                    run_id: run_id.to_string(),
                    batch_seq: count("batch_seq")?,
                    table_name: result.get_str(row, "table_name").unwrap_or_default().to_string(),
                    rows_inserted: count("rows_inserted")?,
                    rows_skipped: count("rows_skipped")?,
                    acked_at: parse_timestamp(row, &result, "acked_at")?,
                })
            })
            .collect()
    }

    /// Highest acknowledged batch sequence number of a run
    pub async fn last_acknowledged(&self, run_id: &str) -> Result<Option<u64>, StatusError> {
        let dialect = self.dialect();
        let sql = format!(
            "SELECT MAX({seq}) AS last_seq FROM {table} WHERE {filter}",
            seq = dialect.quote("batch_seq"),
            table = dialect.quote(&self.acks.name),
            filter = self.run_filter()
        );
        let result = self.select(&sql, run_id).await?;
        Ok(result.get_i64(0, "last_seq").map(|n| n as u64))
    }

    /// Write a batch acknowledgement on a connection inside the caller's
    /// transaction
    pub(crate) async fn write_ack(
        &self,
        conn: &mut dyn DbConnection,
        ack: &BatchAck,
    ) -> DatabaseResult<()> {
        let columns: Vec<_> = self.acks.columns.iter().collect();
        let insert = self.dialect().insert_sql(&self.acks.name, &columns, 1);
        conn.execute(
            &insert,
            &[
                SqlValue::Text(ack.run_id.clone()),
                SqlValue::Int(ack.batch_seq as i64),
                SqlValue::Text(ack.table_name.clone()),
                SqlValue::Int(ack.rows_inserted as i64),
                SqlValue::Int(ack.rows_skipped as i64),
                SqlValue::DateTime(ack.acked_at),
            ],
        )
        .await?;
        Ok(())
    }

    /// Timestamp for a new acknowledgement
    pub(crate) fn ack_time() -> NaiveDateTime {
        now()
    }

    /// Delete every status and acknowledgement of a run
    ///
    /// Returns the number of rows removed.
    pub async fn purge(&self, run_id: &str) -> Result<u64, StatusError> {
        self.bootstrap().await?;
        let dialect = self.dialect();
        let params = [SqlValue::Text(run_id.to_string())];
        let mut conn = self.manager.acquire().await?;

        conn.begin().await?;
        let mut removed = 0;
        for table in [&self.history.name, &self.acks.name] {
            let sql = format!(
                "DELETE FROM {} WHERE {}",
                dialect.quote(table),
                self.run_filter()
            );
            match conn.execute(&sql, &params).await {
                Ok(n) => removed += n,
                Err(e) => {
                    if let Err(rollback) = conn.rollback().await {
                        tracing::warn!("Rollback after failed purge: {}", rollback);
                    }
                    return Err(e.into());
                }
            }
        }
        conn.commit().await?;

        tracing::info!("Purged {} status rows for run {}", removed, run_id);
        Ok(removed)
    }
}

#[cfg(all(test, feature = "duckdb-backend"))]
mod tests {
    use super::*;
    use crate::database::{DuckDbFactory, LoaderConfig};

    fn tracker() -> StatusTracker {
        let manager = ConnectionManager::new(
            Arc::new(DuckDbFactory::in_memory().unwrap()),
            Arc::new(LoaderConfig::in_memory()),
        )
        .unwrap();
        StatusTracker::new(manager)
    }

    #[tokio::test]
    async fn test_record_and_latest() {
        let tracker = tracker();
        tracker.record("run-1", RunStatus::Submitted, None).await.unwrap();
        tracker.record("run-1", RunStatus::Running, None).await.unwrap();
        let done = tracker
            .record("run-1", RunStatus::Completed, Some("3 batches"))
            .await
            .unwrap();
        assert_eq!(done.ordinal, 3);

        let latest = tracker.latest("run-1").await.unwrap();
        assert_eq!(latest.status, RunStatus::Completed);
        assert_eq!(latest.detail.as_deref(), Some("3 batches"));
        assert_eq!(latest.recorded_at, done.recorded_at);

        let statuses: Vec<_> = tracker
            .history("run-1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.status)
            .collect();
        assert_eq!(
            statuses,
            vec![RunStatus::Submitted, RunStatus::Running, RunStatus::Completed]
        );
    }

    #[tokio::test]
    async fn test_nothing_follows_terminal() {
        let tracker = tracker();
        tracker.record("run-2", RunStatus::Running, None).await.unwrap();
        tracker.record("run-2", RunStatus::Failed, None).await.unwrap();

        let err = tracker
            .record("run-2", RunStatus::Running, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StatusError::InvalidTransition { from: RunStatus::Failed, to: RunStatus::Running, .. }
        ));
        assert_eq!(tracker.history("run-2").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let tracker = tracker();
        assert!(matches!(
            tracker.latest("missing").await,
            Err(StatusError::NotFound(id)) if id == "missing"
        ));
        assert_eq!(tracker.last_acknowledged("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_acks_and_purge() {
        let tracker = tracker();
        tracker.bootstrap().await.unwrap();
        tracker.record("run-3", RunStatus::Submitted, None).await.unwrap();

        let mut conn = tracker.manager.acquire().await.unwrap();
        for seq in [1u64, 2] {
            let ack = BatchAck {
                run_id: "run-3".to_string(),
                batch_seq: seq,
                table_name: "entry".to_string(),
                rows_inserted: 10,
                rows_skipped: seq,
                acked_at: StatusTracker::ack_time(),
            };
            tracker.write_ack(&mut **conn, &ack).await.unwrap();
        }
        drop(conn);

        let acks = tracker.acknowledged("run-3").await.unwrap();
        assert_eq!(acks.len(), 2);
        assert_eq!(acks[1].rows_skipped, 2);
        assert_eq!(tracker.last_acknowledged("run-3").await.unwrap(), Some(2));

        assert_eq!(tracker.purge("run-3").await.unwrap(), 3);
        assert!(tracker.history("run-3").await.unwrap().is_empty());
    }
}
