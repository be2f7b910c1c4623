//! The batch loader

use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use super::batch::{BatchFailure, CoercionFailure, DeleteMode, LoadBatch, LoadOutcome, LoadRun};
use super::coerce::{coerce_row, coerce_value};
use super::file::{LoadFile, LoadMode, TextRow};
use super::source::RecordSource;
use super::LoadError;
use crate::database::config::TextOverflow;
use crate::database::pool::RetryState;
use crate::database::{
    ConnectionManager, DatabaseResult, DbConnection, LoaderConfig, QueryResult, SqlValue,
};
use crate::models::{ColumnDefinition, SchemaModel, TableDefinition};
use crate::status::{BatchAck, RunStatus, StatusError, StatusTracker};

const KEY_SEPARATOR: &str = "\u{1f}";

/// Comparable key of a coerced row's primary key values
fn row_key(values: &[SqlValue], key_positions: &[usize]) -> String {
    key_positions
        .iter()
        .map(|&p| values[p].key_text())
        .collect::<Vec<_>>()
        .join(KEY_SEPARATOR)
}

/// Comparable key of a row returned by the existence check
///
/// Key columns come back as text and are coerced again so that both sides
/// share one canonical form.
fn live_key(result: &QueryResult, row: usize, key_columns: &[&ColumnDefinition]) -> String {
    key_columns
        .iter()
        .map(|column| match result.get_str(row, &column.name) {
            Some(text) => coerce_value(column, &Value::String(text.to_string()), TextOverflow::Truncate)
                .map(|(value, _)| value.key_text())
                .unwrap_or_else(|_| text.to_string()),
            None => SqlValue::Null.key_text(),
        })
        .collect::<Vec<_>>()
        .join(KEY_SEPARATOR)
}

/// Rows of one batch that survived coercion and intra-batch deduplication
struct PreparedBatch<'a> {
    table: &'a TableDefinition,
    key_positions: Vec<usize>,
    rows: Vec<Vec<SqlValue>>,
    duplicates: u64,
}

/// Loads batches for runs against one schema model
///
/// Batches of a run are processed one at a time in the order supplied; a
/// batch's rows are committed before the next batch starts. Independent runs
/// may share one loader from several tasks.
#[derive(Clone)]
pub struct BatchLoader {
    manager: ConnectionManager,
    model: Arc<SchemaModel>,
    tracker: StatusTracker,
}

impl BatchLoader {
    pub fn new(manager: ConnectionManager, model: Arc<SchemaModel>) -> Self {
        let tracker = StatusTracker::new(manager.clone());
        Self::with_tracker(manager, model, tracker)
    }

    pub fn with_tracker(
        manager: ConnectionManager,
        model: Arc<SchemaModel>,
        tracker: StatusTracker,
    ) -> Self {
        Self {
            manager,
            model,
            tracker,
        }
    }

    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    pub fn model(&self) -> &SchemaModel {
        &self.model
    }

    fn config(&self) -> &LoaderConfig {
        self.manager.config()
    }

    /// Load batches for a run
    ///
    /// Never fails: every problem ends up in the returned outcome, and the
    /// run's terminal status is recorded with the tracker. A run that already
    /// reached a terminal status is left untouched. Batches acknowledged by an
    /// earlier attempt of the same run are skipped.
    pub async fn load<I>(&self, run: &mut LoadRun, batches: I) -> LoadOutcome
    where
        I: IntoIterator<Item = LoadBatch>,
        I::IntoIter: Send,
    {
        let started = Instant::now();
        let mut outcome = LoadOutcome::new(&run.run_id);

        let (mut acked, mut running) = match self.open_run(run).await {
            Ok(state) => state,
            Err(error @ LoadError::AlreadyFinished { status, .. }) => {
                tracing::warn!("{}", error);
                let outcome = LoadOutcome::aborted(&run.run_id, status, error.to_string());
                return Self::settle(run, outcome, started);
            }
            Err(e) => {
                tracing::error!("Run {} could not start: {}", run.run_id, e);
                let outcome =
                    LoadOutcome::aborted(&run.run_id, RunStatus::Failed, e.to_string());
                return Self::settle(run, outcome, started);
            }
        };

        let mut fatal = false;
        if run.delete_mode != DeleteMode::None && acked.is_empty() && !run.is_cancelled() {
            let prepared = match self.mark_running(run, &mut running).await {
                Ok(()) => self.delete_before_load(run).await,
                Err(e) => Err(e),
            };
            if let Err(e) = prepared {
                tracing::error!("Pre-load delete for run {} failed: {}", run.run_id, e);
                outcome.last_error = Some(e.to_string());
                fatal = true;
            }
        }

        let mut batches = batches.into_iter();
        while !fatal {
            if run.is_cancelled() {
                tracing::info!("Run {} cancelled", run.run_id);
                outcome.cancelled = true;
                outcome.last_error = Some(LoadError::RunCancelled.to_string());
                break;
            }
            let Some(batch) = batches.next() else {
                break;
            };
            if acked.contains(&batch.seq) {
                tracing::debug!("Skipping acknowledged batch {}", batch.seq);
                outcome.batches_skipped += 1;
                continue;
            }
            if let Err(e) = self.mark_running(run, &mut running).await {
                outcome.last_error = Some(e.to_string());
                fatal = true;
                break;
            }

            outcome.batches_attempted += 1;
            match self.load_batch(run, &batch, &mut outcome).await {
                Ok(()) => {
                    outcome.batches_succeeded += 1;
                    acked.insert(batch.seq);
                }
                Err(failure) => {
                    tracing::error!(
                        "Batch {} of run {} failed after {} attempts: {}",
                        failure.batch_seq,
                        run.run_id,
                        failure.attempts,
                        failure.error
                    );
                    outcome.batches_failed += 1;
                    outcome.last_error = Some(failure.error.clone());
                    outcome.batch_failures.push(failure);
                }
            }
            run.tally = outcome.tally();
        }

        outcome.status = if fatal {
            RunStatus::Failed
        } else {
            outcome.terminal_status()
        };
        self.finish(run, outcome, started).await
    }

    /// Restart a run from the batch after its last acknowledged one
    pub async fn resume<S>(&self, run: &mut LoadRun, source: &S) -> LoadOutcome
    where
        S: RecordSource + ?Sized,
    {
        let from = match self.tracker.last_acknowledged(&run.run_id).await {
            Ok(last) => last.map_or(0, |seq| seq + 1),
            Err(e) => {
                tracing::warn!(
                    "Could not read acknowledgements of run {}, starting from 0: {}",
                    run.run_id,
                    e
                );
                0
            }
        };
        tracing::info!("Resuming run {} from batch {}", run.run_id, from);
        self.load(run, source.batches_from(from)).await
    }

    /// Check the run can start and return its acknowledged batches and
    /// whether it is already running
    async fn open_run(&self, run: &LoadRun) -> Result<(HashSet<u64>, bool), LoadError> {
        self.model.validate()?;
        if let Some(unknown) = run.tables.iter().find(|t| self.model.table(t).is_none()) {
            return Err(LoadError::UnknownTable(unknown.clone()));
        }

        let running = match self.tracker.latest(&run.run_id).await {
            Ok(record) if record.status.is_terminal() => {
                return Err(LoadError::AlreadyFinished {
                    run_id: run.run_id.clone(),
                    status: record.status,
                });
            }
            Ok(record) => record.status == RunStatus::Running,
            Err(StatusError::NotFound(_)) => {
                self.tracker
                    .record(&run.run_id, RunStatus::Submitted, None)
                    .await?;
                false
            }
            Err(e) => return Err(e.into()),
        };

        let acked = self
            .tracker
            .acknowledged(&run.run_id)
            .await?
            .into_iter()
            .map(|ack| ack.batch_seq)
            .collect();
        Ok((acked, running))
    }

    async fn mark_running(&self, run: &LoadRun, running: &mut bool) -> Result<(), LoadError> {
        if !*running {
            self.tracker
                .record(&run.run_id, RunStatus::Running, None)
                .await?;
            *running = true;
        }
        Ok(())
    }

    /// Record the terminal status and copy the outcome into the run
    async fn finish(&self, run: &mut LoadRun, mut outcome: LoadOutcome, started: Instant) -> LoadOutcome {
        let detail = format!(
            "{} of {} batches committed, {} skipped, {} rows inserted, {} existing, {} rows rejected",
            outcome.batches_succeeded,
            outcome.batches_attempted,
            outcome.batches_skipped,
            outcome.rows_inserted,
            outcome.rows_existing,
            outcome.coercion_failures.len()
        );
        if let Err(e) = self
            .tracker
            .record(&run.run_id, outcome.status, Some(&detail))
            .await
        {
            tracing::error!("Could not record final status of run {}: {}", run.run_id, e);
            outcome.last_error.get_or_insert_with(|| e.to_string());
        }

        tracing::info!("Run {} finished {}: {}", run.run_id, outcome.status, detail);
        Self::settle(run, outcome, started)
    }

    fn settle(run: &mut LoadRun, mut outcome: LoadOutcome, started: Instant) -> LoadOutcome {
        outcome.elapsed_ms = started.elapsed().as_millis() as u64;
        run.tally = outcome.tally();
        run.status = Some(outcome.status);
        run.last_error = outcome.last_error.clone();
        outcome
    }

    /// Coerce a batch's rows, dropping rejected rows and repeated keys
    fn prepare<'a>(
        &'a self,
        batch: &LoadBatch,
        outcome: &mut LoadOutcome,
        file: Option<&LoadFile>,
    ) -> Result<PreparedBatch<'a>, LoadError> {
        let table = self
            .model
            .table(&batch.table)
            .ok_or_else(|| LoadError::UnknownTable(batch.table.clone()))?;
        let key_positions: Vec<usize> = table
            .primary_key
            .iter()
            .filter_map(|key| table.columns.iter().position(|c| &c.name == key))
            .collect();
        let overflow = self.config().loader.text_overflow;

        let mut prepared = PreparedBatch {
            table,
            key_positions,
            rows: Vec::with_capacity(batch.len()),
            duplicates: 0,
        };
        let mut seen = HashSet::new();
        for (index, row) in batch.rows.iter().enumerate() {
            match coerce_row(table, row, overflow) {
                Ok(coerced) => {
                    if let Some(column) = file.and_then(|f| {
                        f.unrepresentable(table, &coerced.values, self.manager.dialect())
                    }) {
                        tracing::warn!(
                            "Rejected row {} of batch {} ({}): {} contains a load file separator",
                            index,
                            batch.seq,
                            batch.table,
                            column.name
                        );
                        outcome.coercion_failures.push(CoercionFailure {
                            table: batch.table.clone(),
                            column: Some(column.name.clone()),
                            row_index: index,
                            batch_seq: batch.seq,
                            message: format!("{} contains a load file separator", column.name),
                        });
                        continue;
                    }
                    outcome.truncated_values += coerced.truncated.len() as u64;
                    if !prepared.key_positions.is_empty()
                        && !seen.insert(row_key(&coerced.values, &prepared.key_positions))
                    {
                        prepared.duplicates += 1;
                        continue;
                    }
                    prepared.rows.push(coerced.values);
                }
                Err(e) => {
                    tracing::warn!(
                        "Rejected row {} of batch {} ({}): {}",
                        index,
                        batch.seq,
                        batch.table,
                        e
                    );
                    outcome.coercion_failures.push(CoercionFailure {
                        table: batch.table.clone(),
                        column: Some(e.column().to_string()),
                        row_index: index,
                        batch_seq: batch.seq,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(prepared)
    }

    /// Commit one batch in a single transaction, retrying the whole batch
    /// after transient failures
    async fn load_batch(
        &self,
        run: &LoadRun,
        batch: &LoadBatch,
        outcome: &mut LoadOutcome,
    ) -> Result<(), BatchFailure> {
        let failure = |attempts: u32, error: String| BatchFailure {
            batch_seq: batch.seq,
            table: batch.table.clone(),
            attempts,
            error,
        };
        let file = run
            .load_mode
            .uses_file()
            .then(|| LoadFile::for_table(&self.config().loader, &batch.table, &run.run_id));
        let prepared = self
            .prepare(batch, outcome, file.as_ref())
            .map_err(|e| failure(0, e.to_string()))?;
        let staged = match &file {
            Some(file) => Some(
                self.export(file, run.load_mode, &prepared)
                    .map_err(|e| failure(0, e.to_string()))?,
            ),
            None => None,
        };

        let mut retry = RetryState::with_attempts(
            &self.config().retry,
            self.config().loader.batch_retries + 1,
        );
        let what = format!("batch {} of run {}", batch.seq, run.run_id);
        let (inserted, existing) = loop {
            match self
                .commit_batch(&run.run_id, batch, &prepared, staged.as_deref())
                .await
            {
                Ok(counts) => break counts,
                Err(e) => {
                    if let Err(e) = retry.backoff(e, &what).await {
                        return Err(failure(retry.attempts_made(), e.to_string()));
                    }
                    tracing::info!("Retrying {}", what);
                }
            }
        };

        if let Some(file) = &file
            && run.load_mode == LoadMode::BatchFile
            && !self.config().loader.keep_load_files
        {
            file.remove();
        }

        let existing = existing + prepared.duplicates;
        outcome.rows_inserted += inserted;
        outcome.rows_existing += existing;
        tracing::debug!(
            "Committed {}: {} inserted, {} existing",
            what,
            inserted,
            existing
        );
        Ok(())
    }

    /// Write a batch's rows to its load file and read them back as staged
    fn export(
        &self,
        file: &LoadFile,
        mode: LoadMode,
        prepared: &PreparedBatch<'_>,
    ) -> Result<Vec<TextRow>, LoadError> {
        let dialect = self.manager.dialect();
        let rows: Vec<TextRow> = prepared
            .rows
            .iter()
            .map(|row| row.iter().map(|v| v.to_param_text(dialect)).collect())
            .collect();
        let segment = file.write(&rows, mode == LoadMode::BatchFileAppend)?;
        file.read(segment, prepared.table.columns.len())
    }

    /// Write every chunk of a batch and its acknowledgement in one
    /// transaction; nothing of the batch is visible unless all of it commits
    async fn commit_batch(
        &self,
        run_id: &str,
        batch: &LoadBatch,
        prepared: &PreparedBatch<'_>,
        staged: Option<&[TextRow]>,
    ) -> DatabaseResult<(u64, u64)> {
        let mut conn = self.manager.acquire().await?;
        conn.begin().await?;
        match self
            .write_batch(&mut **conn, run_id, batch, prepared, staged)
            .await
        {
            Ok(counts) => {
                conn.commit().await?;
                Ok(counts)
            }
            Err(e) => {
                if let Err(rollback) = conn.rollback().await {
                    tracing::warn!("Rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    async fn write_batch(
        &self,
        conn: &mut dyn DbConnection,
        run_id: &str,
        batch: &LoadBatch,
        prepared: &PreparedBatch<'_>,
        staged: Option<&[TextRow]>,
    ) -> DatabaseResult<(u64, u64)> {
        let (inserted, existing) = match staged {
            Some(rows) => self.copy_staged(conn, prepared, rows).await?,
            None => {
                let chunk_size = self.config().loader.max_rows_per_statement.max(1);
                let (mut inserted, mut existing) = (0, 0);
                for rows in prepared.rows.chunks(chunk_size) {
                    let (i, e) = self.write_chunk(conn, prepared, rows).await?;
                    inserted += i;
                    existing += e;
                }
                (inserted, existing)
            }
        };

        let ack = BatchAck {
            run_id: run_id.to_string(),
            batch_seq: batch.seq,
            table_name: batch.table.clone(),
            rows_inserted: inserted,
            rows_skipped: existing + prepared.duplicates,
            acked_at: StatusTracker::ack_time(),
        };
        self.tracker.write_ack(conn, &ack).await?;
        Ok((inserted, existing))
    }

    /// Bulk path: copy load file rows into a stage table, then move the
    /// absent ones into the target; runs inside the caller's transaction
    async fn copy_staged(
        &self,
        conn: &mut dyn DbConnection,
        prepared: &PreparedBatch<'_>,
        rows: &[TextRow],
    ) -> DatabaseResult<(u64, u64)> {
        if rows.is_empty() {
            return Ok((0, 0));
        }
        let dialect = self.manager.dialect();
        let table = prepared.table;
        let columns: Vec<&ColumnDefinition> = table.columns.iter().collect();
        let stage = format!("pdbx_stage_{}", Uuid::new_v4().simple());

        conn.batch_execute(&dialect.create_stage_sql(&stage, &columns))
            .await?;
        let copied = conn.copy_text_rows(&stage, rows).await?;
        let sql = dialect.insert_from_stage_sql(
            &table.name,
            &columns,
            &table.primary_key_columns(),
            &stage,
        );
        let inserted = conn.execute(&sql, &[]).await?;
        conn.batch_execute(&dialect.drop_table_sql(&stage)).await?;

        tracing::debug!(
            "Bulk loaded {} of {} staged rows into {}",
            inserted,
            copied,
            table.name
        );
        Ok((inserted, copied.saturating_sub(inserted)))
    }

    /// Existence check and insert of absent rows for one chunk of a batch;
    /// runs inside the caller's transaction
    async fn write_chunk(
        &self,
        conn: &mut dyn DbConnection,
        prepared: &PreparedBatch<'_>,
        rows: &[Vec<SqlValue>],
    ) -> DatabaseResult<(u64, u64)> {
        let dialect = self.manager.dialect();
        let table = prepared.table;

        let existing: HashSet<String> = if prepared.key_positions.is_empty() {
            HashSet::new()
        } else {
            let key_columns = table.primary_key_columns();
            let sql = dialect.select_existing_sql(&table.name, &key_columns, rows.len());
            let params: Vec<SqlValue> = rows
                .iter()
                .flat_map(|row| prepared.key_positions.iter().map(|&p| row[p].clone()))
                .collect();
            let found = conn.query(&sql, &params).await?;
            (0..found.row_count())
                .map(|i| live_key(&found, i, &key_columns))
                .collect()
        };

        let fresh: Vec<&Vec<SqlValue>> = rows
            .iter()
            .filter(|row| {
                existing.is_empty() || !existing.contains(&row_key(row, &prepared.key_positions))
            })
            .collect();
        let skipped = (rows.len() - fresh.len()) as u64;

        let mut inserted = 0;
        if !fresh.is_empty() {
            let columns: Vec<&ColumnDefinition> = table.columns.iter().collect();
            let sql = dialect.insert_sql(&table.name, &columns, fresh.len());
            let params: Vec<SqlValue> = fresh.into_iter().flatten().cloned().collect();
            inserted = conn.execute(&sql, &params).await?;
        }
        Ok((inserted, skipped))
    }

    /// Apply the run's delete mode in one transaction
    async fn delete_before_load(&self, run: &LoadRun) -> Result<u64, LoadError> {
        let dialect = self.manager.dialect();
        let chunk_size = self.config().loader.max_rows_per_statement.max(1);

        let mut statements: Vec<(String, Vec<SqlValue>)> = Vec::new();
        for name in &run.tables {
            let table = self
                .model
                .table(name)
                .ok_or_else(|| LoadError::UnknownTable(name.clone()))?;
            match &run.delete_mode {
                DeleteMode::None => {}
                DeleteMode::Truncate => {
                    statements.push((dialect.delete_all_sql(&table.name), Vec::new()));
                }
                DeleteMode::Selected(values) => {
                    let Some(column) = table.delete_column.as_deref().and_then(|c| table.column(c))
                    else {
                        tracing::warn!("Table {} has no delete column, nothing deleted", table.name);
                        continue;
                    };
                    let keys: Vec<SqlValue> = values
                        .iter()
                        .filter_map(|raw| match coerce_value(column, raw, TextOverflow::Reject) {
                            Ok((SqlValue::Null, _)) => None,
                            Ok((value, _)) => Some(value),
                            Err(e) => {
                                tracing::warn!("Ignoring delete value: {}", e);
                                None
                            }
                        })
                        .collect();
                    for chunk in keys.chunks(chunk_size) {
                        statements.push((
                            dialect.delete_in_sql(&table.name, column, chunk.len()),
                            chunk.to_vec(),
                        ));
                    }
                }
            }
        }
        if statements.is_empty() {
            return Ok(0);
        }

        let mut retry = RetryState::new(&self.config().retry);
        loop {
            match self.execute_in_transaction(&statements).await {
                Ok(deleted) => {
                    tracing::info!("Deleted {} rows before run {}", deleted, run.run_id);
                    return Ok(deleted);
                }
                Err(e) => retry.backoff(e, "pre-load delete").await?,
            }
        }
    }

    async fn execute_in_transaction(
        &self,
        statements: &[(String, Vec<SqlValue>)],
    ) -> DatabaseResult<u64> {
        let mut conn = self.manager.acquire().await?;
        conn.begin().await?;
        let mut affected = 0;
        for (sql, params) in statements {
            match conn.execute(sql, params).await {
                Ok(n) => affected += n,
                Err(e) => {
                    if let Err(rollback) = conn.rollback().await {
                        tracing::warn!("Rollback failed: {}", rollback);
                    }
                    return Err(e);
                }
            }
        }
        conn.commit().await?;
        Ok(affected)
    }
}

#[cfg(all(test, feature = "duckdb-backend"))]
mod tests {
    use super::*;
    use crate::database::DuckDbFactory;
    use crate::models::LogicalType;
    use crate::reconcile::Reconciler;
    use serde_json::json;

    async fn loader(max_rows: usize) -> BatchLoader {
        let mut config = LoaderConfig::in_memory();
        config.loader.max_rows_per_statement = max_rows;
        let manager = ConnectionManager::new(
            Arc::new(DuckDbFactory::in_memory().unwrap()),
            Arc::new(config),
        )
        .unwrap();
        let model = Arc::new(
            SchemaModel::new("pdbx").with_table(
                TableDefinition::new("atom")
                    .with_column(ColumnDefinition::new("entry_id", LogicalType::char(4)).not_null())
                    .with_column(ColumnDefinition::new("serial", LogicalType::INTEGER).not_null())
                    .with_column(ColumnDefinition::new("b_factor", LogicalType::decimal(6, 2)))
                    .with_primary_key(&["entry_id", "serial"])
                    .with_delete_column("entry_id"),
            ),
        );
        Reconciler::new(manager.clone())
            .run(Arc::clone(&model))
            .await
            .unwrap();
        BatchLoader::new(manager, model)
    }

    fn atoms(seq: u64, entry: &str, serials: std::ops::Range<i64>) -> LoadBatch {
        let mut batch = LoadBatch::new("atom", seq);
        for serial in serials {
            batch = batch.with_row(json!({"entry_id": entry, "serial": serial, "b_factor": "12.50"}));
        }
        batch
    }

    async fn count(loader: &BatchLoader) -> i64 {
        loader
            .manager
            .execute_once("SELECT COUNT(*) AS n FROM \"atom\"", &[])
            .await
            .unwrap()
            .into_result_set()
            .unwrap()
            .get_i64(0, "n")
            .unwrap()
    }

    #[tokio::test]
    async fn test_chunked_batch_with_composite_key() {
        let loader = loader(3).await;
        let mut run = LoadRun::new(&["atom"]);
        let outcome = loader.load(&mut run, vec![atoms(1, "1ABC", 0..10)]).await;

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.rows_inserted, 10);
        assert_eq!(count(&loader).await, 10);

        let acks = loader.tracker.acknowledged(&run.run_id).await.unwrap();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].rows_inserted, 10);
        assert_eq!(run.status, Some(RunStatus::Completed));
    }

    #[tokio::test]
    async fn test_existing_and_repeated_keys_are_no_ops() {
        let loader = loader(100).await;
        let mut first = LoadRun::new(&["atom"]);
        loader.load(&mut first, vec![atoms(1, "1ABC", 0..5)]).await;

        let mut batch = atoms(1, "1ABC", 3..8);
        batch = batch.with_row(json!({"entry_id": "1ABC", "serial": "7", "b_factor": "1.5"}));
        let mut second = LoadRun::new(&["atom"]);
        let outcome = loader.load(&mut second, vec![batch]).await;

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.rows_inserted, 3);
        assert_eq!(outcome.rows_existing, 3);
        assert_eq!(count(&loader).await, 8);
    }

    #[tokio::test]
    async fn test_selected_delete_replaces_entry() {
        let loader = loader(100).await;
        let mut seed = LoadRun::new(&["atom"]);
        loader
            .load(&mut seed, vec![atoms(1, "1ABC", 0..4), atoms(2, "2XYZ", 0..4)])
            .await;

        let mut reload = LoadRun::new(&["atom"])
            .with_delete_mode(DeleteMode::Selected(vec![json!("1ABC")]));
        let outcome = loader.load(&mut reload, vec![atoms(1, "1ABC", 0..2)]).await;

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.rows_inserted, 2);
        assert_eq!(count(&loader).await, 6);
    }

    #[tokio::test]
    async fn test_truncate_delete() {
        let loader = loader(100).await;
        let mut seed = LoadRun::new(&["atom"]);
        loader.load(&mut seed, vec![atoms(1, "1ABC", 0..4)]).await;

        let mut reload = LoadRun::new(&["atom"]).with_delete_mode(DeleteMode::Truncate);
        loader.load(&mut reload, vec![atoms(1, "2XYZ", 0..1)]).await;
        assert_eq!(count(&loader).await, 1);
    }

    #[tokio::test]
    async fn test_unknown_table_fails_run() {
        let loader = loader(100).await;
        let mut run = LoadRun::new(&["nope"]);
        let outcome = loader.load(&mut run, vec![atoms(1, "1ABC", 0..1)]).await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome.last_error.unwrap().contains("nope"));
        assert_eq!(outcome.batches_attempted, 0);
    }

    #[tokio::test]
    async fn test_batch_for_unknown_table_fails_batch_only() {
        let loader = loader(100).await;
        let mut run = LoadRun::new(&["atom"]);
        let mut stray = atoms(2, "1ABC", 0..1);
        stray.table = "nope".to_string();
        let outcome = loader
            .load(&mut run, vec![atoms(1, "1ABC", 0..2), stray])
            .await;

        assert_eq!(outcome.status, RunStatus::Partial);
        assert_eq!(outcome.batch_failures.len(), 1);
        assert_eq!(outcome.batch_failures[0].batch_seq, 2);
        assert_eq!(outcome.batch_failures[0].attempts, 0);
    }
}
