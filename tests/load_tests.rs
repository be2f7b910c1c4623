//! End-to-end load tests against in-memory DuckDB
#![cfg(feature = "duckdb-backend")]

use async_trait::async_trait;
use pdbx_db_loader::database::{ConnectionFactory, QueryResult};
use pdbx_db_loader::definitions::status_history_schema;
use pdbx_db_loader::load::RecordSource;
use pdbx_db_loader::{
    BatchLoader, ColumnDefinition, ConnectionManager, DatabaseError, DatabaseResult, DbConnection,
    DeleteMode, Dialect, DuckDbFactory, LoadBatch, LoadEngine, LoadJob, LoadMode, LoadRun, LoaderConfig,
    LogicalType, Reconciler, RunStatus, SchemaModel, SqlValue, TableDefinition,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

const STATUS_HISTORY_TABLE_NAME: &str = "pdbx_database_status_history";

fn entry_model() -> SchemaModel {
    SchemaModel::new("pdbx").with_table(
        TableDefinition::new("entry")
            .with_column(ColumnDefinition::new("id", LogicalType::INTEGER).not_null())
            .with_column(ColumnDefinition::new("title", LogicalType::varchar(80)))
            .with_primary_key(&["id"]),
    )
}

async fn setup(model: SchemaModel, config: LoaderConfig) -> (ConnectionManager, BatchLoader) {
    let manager = ConnectionManager::new(
        Arc::new(DuckDbFactory::in_memory().unwrap()),
        Arc::new(config),
    )
    .unwrap();
    let model = Arc::new(model);
    Reconciler::new(manager.clone())
        .run(Arc::clone(&model))
        .await
        .unwrap();
    let loader = BatchLoader::new(manager.clone(), model);
    (manager, loader)
}

async fn entry_loader() -> (ConnectionManager, BatchLoader) {
    setup(entry_model(), LoaderConfig::in_memory()).await
}

async fn titles(manager: &ConnectionManager) -> Vec<(i64, Option<String>)> {
    let result = manager
        .execute_once(
            "SELECT \"id\", \"title\" FROM \"entry\" ORDER BY \"id\"",
            &[],
        )
        .await
        .unwrap()
        .into_result_set()
        .unwrap();
    (0..result.row_count())
        .map(|i| {
            (
                result.get_i64(i, "id").unwrap(),
                result.get_str(i, "title").map(str::to_string),
            )
        })
        .collect()
}

fn entries(seq: u64, ids: std::ops::Range<i64>) -> LoadBatch {
    let mut batch = LoadBatch::new("entry", seq);
    for id in ids {
        batch = batch.with_row(json!({"id": id, "title": format!("entry {}", id)}));
    }
    batch
}

#[tokio::test]
async fn test_entry_end_to_end() {
    let (manager, loader) = entry_loader().await;
    let mut run = LoadRun::new(&["entry"]);
    let batch = LoadBatch::new("entry", 0)
        .with_row(json!({"id": 1, "title": "Lysozyme"}))
        .with_row(json!({"id": "2", "title": "?"}));

    let outcome = loader.load(&mut run, vec![batch]).await;

    assert!(outcome.is_clean(), "{:?}", outcome);
    assert_eq!(outcome.rows_inserted, 2);
    assert_eq!(
        titles(&manager).await,
        vec![(1, Some("Lysozyme".to_string())), (2, None)]
    );

    let history = loader.tracker().history(&run.run_id).await.unwrap();
    let statuses: Vec<RunStatus> = history.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![RunStatus::Submitted, RunStatus::Running, RunStatus::Completed]
    );
    assert!(history.last().unwrap().detail.is_some());
}

#[tokio::test]
async fn test_reload_is_idempotent() {
    let (manager, loader) = entry_loader().await;
    let batches = vec![entries(0, 0..5), entries(1, 5..10)];

    let mut first = LoadRun::new(&["entry"]);
    let outcome = loader.load(&mut first, batches.clone()).await;
    assert_eq!(outcome.rows_inserted, 10);
    let before = titles(&manager).await;

    let mut second = LoadRun::new(&["entry"]);
    let outcome = loader.load(&mut second, batches).await;
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.rows_inserted, 0);
    assert_eq!(outcome.rows_existing, 10);
    assert_eq!(titles(&manager).await, before);
}

#[tokio::test]
async fn test_batches_commit_in_order() {
    let (manager, loader) = entry_loader().await;
    let mut run = LoadRun::new(&["entry"]);
    let first = LoadBatch::new("entry", 0).with_row(json!({"id": 1, "title": "first"}));
    let second = LoadBatch::new("entry", 1).with_row(json!({"id": 1, "title": "second"}));
    let third = LoadBatch::new("entry", 2).with_row(json!({"id": 2, "title": "third"}));

    let outcome = loader.load(&mut run, vec![first, second, third]).await;

    assert_eq!(outcome.rows_inserted, 2);
    assert_eq!(outcome.rows_existing, 1);
    assert_eq!(
        titles(&manager).await,
        vec![(1, Some("first".to_string())), (2, Some("third".to_string()))]
    );

    let acks = loader.tracker().acknowledged(&run.run_id).await.unwrap();
    let seqs: Vec<u64> = acks.iter().map(|a| a.batch_seq).collect();
    assert_eq!(seqs, vec![0, 1, 2]);
    assert!(acks.windows(2).all(|w| w[0].acked_at <= w[1].acked_at));
}

#[tokio::test]
async fn test_bad_row_does_not_cost_its_batch() {
    let (manager, loader) = entry_loader().await;
    let mut batch = LoadBatch::new("entry", 0);
    for id in 0..100 {
        let value = if id == 57 { json!("fifty-seven") } else { json!(id) };
        batch = batch.with_row(json!({"id": value, "title": "x"}));
    }

    let mut run = LoadRun::new(&["entry"]);
    let outcome = loader.load(&mut run, vec![batch]).await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(!outcome.is_clean());
    assert_eq!(outcome.rows_inserted, 99);
    assert_eq!(outcome.coercion_failures.len(), 1);
    let failure = &outcome.coercion_failures[0];
    assert_eq!(failure.row_index, 57);
    assert_eq!(failure.column.as_deref(), Some("id"));
    assert_eq!(titles(&manager).await.len(), 99);
}

#[tokio::test]
async fn test_text_overflow_truncates_when_configured() {
    let mut config = LoaderConfig::in_memory();
    config.loader.text_overflow = pdbx_db_loader::database::config::TextOverflow::Truncate;
    let (manager, loader) = setup(entry_model(), config).await;

    let long = "x".repeat(100);
    let mut run = LoadRun::new(&["entry"]);
    let outcome = loader
        .load(
            &mut run,
            vec![LoadBatch::new("entry", 0).with_row(json!({"id": 1, "title": long}))],
        )
        .await;

    assert_eq!(outcome.truncated_values, 1);
    assert_eq!(titles(&manager).await[0].1.as_ref().unwrap().len(), 80);
}

#[tokio::test]
async fn test_text_overflow_rejects_by_default() {
    let (manager, loader) = entry_loader().await;
    let mut run = LoadRun::new(&["entry"]);
    let outcome = loader
        .load(
            &mut run,
            vec![LoadBatch::new("entry", 0).with_row(json!({"id": 1, "title": "x".repeat(81)}))],
        )
        .await;

    assert_eq!(outcome.coercion_failures.len(), 1);
    assert!(titles(&manager).await.is_empty());
}

#[tokio::test]
async fn test_finished_run_is_not_reloaded() {
    let (_, loader) = entry_loader().await;
    let mut run = LoadRun::with_id("run-1", &["entry"]);
    loader.load(&mut run, vec![entries(0, 0..2)]).await;

    let mut again = LoadRun::with_id("run-1", &["entry"]);
    let outcome = loader.load(&mut again, vec![entries(1, 2..4)]).await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.batches_attempted, 0);
    assert!(outcome.last_error.unwrap().contains("already finished"));
    assert_eq!(loader.tracker().history("run-1").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_cancellation_between_batches() {
    let (manager, loader) = entry_loader().await;
    let mut run = LoadRun::new(&["entry"]);
    let token = run.cancellation_token();
    let batches = (0..4u64).map(move |seq| {
        if seq == 1 {
            token.cancel();
        }
        entries(seq, (seq as i64) * 10..(seq as i64) * 10 + 3)
    });

    let outcome = loader.load(&mut run, batches).await;

    assert!(outcome.cancelled);
    assert_eq!(outcome.batches_succeeded, 2);
    assert_eq!(outcome.status, RunStatus::Partial);
    assert_eq!(outcome.last_error.as_deref(), Some("Run cancelled"));
    assert_eq!(titles(&manager).await.len(), 6);
    assert_eq!(
        loader.tracker().latest(&run.run_id).await.unwrap().status,
        RunStatus::Partial
    );
}

#[tokio::test]
async fn test_cancelled_before_start_fails() {
    let (_, loader) = entry_loader().await;
    let mut run = LoadRun::new(&["entry"]);
    run.cancel();
    let outcome = loader.load(&mut run, vec![entries(0, 0..3)]).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.batches_attempted, 0);
    assert_eq!(run.status, Some(RunStatus::Failed));
}

/// Yields batches until `crash_at`, then panics like a dying process
struct CrashingSource {
    batches: Vec<LoadBatch>,
    crash_at: u64,
}

impl RecordSource for CrashingSource {
    fn batches_from(&self, from_seq: u64) -> Box<dyn Iterator<Item = LoadBatch> + Send + '_> {
        let crash_at = self.crash_at;
        Box::new(self.batches.batches_from(from_seq).inspect(move |batch| {
            if batch.seq == crash_at {
                panic!("source crashed at batch {}", crash_at);
            }
        }))
    }
}

#[tokio::test]
async fn test_resume_after_crash() {
    let (manager, loader) = entry_loader().await;
    let batches: Vec<LoadBatch> = (0..4u64)
        .map(|seq| entries(seq, (seq as i64) * 10..(seq as i64) * 10 + 5))
        .collect();
    let engine = LoadEngine::new(loader.clone());

    let run = LoadRun::with_id("crashing", &["entry"]);
    let crashed = engine
        .run_concurrently(vec![LoadJob::new(
            run,
            CrashingSource {
                batches: batches.clone(),
                crash_at: 2,
            },
        )])
        .await;
    assert_eq!(crashed[0].status, RunStatus::Failed);
    assert_eq!(crashed[0].run_id, "crashing");
    assert_eq!(
        loader.tracker().latest("crashing").await.unwrap().status,
        RunStatus::Running
    );
    assert_eq!(loader.tracker().last_acknowledged("crashing").await.unwrap(), Some(1));

    let mut resumed = LoadRun::with_id("crashing", &["entry"]);
    let outcome = loader.resume(&mut resumed, &batches).await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.batches_attempted, 2);
    assert_eq!(outcome.rows_inserted, 10);
    assert_eq!(titles(&manager).await.len(), 20);

    let statuses: Vec<RunStatus> = loader
        .tracker()
        .history("crashing")
        .await
        .unwrap()
        .iter()
        .map(|r| r.status)
        .collect();
    assert_eq!(
        statuses,
        vec![RunStatus::Submitted, RunStatus::Running, RunStatus::Completed]
    );
}

#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let (manager, loader) = entry_loader().await;
    let engine = LoadEngine::new(loader);

    let jobs: Vec<LoadJob> = (0..3i64)
        .map(|n| {
            let batches: Vec<LoadBatch> = (0..3u64)
                .map(|seq| {
                    let start = n * 100 + (seq as i64) * 10;
                    entries(seq, start..start + 4)
                })
                .collect();
            LoadJob::new(LoadRun::new(&["entry"]), batches)
        })
        .collect();
    let run_ids: Vec<String> = jobs.iter().map(|j| j.run.run_id.clone()).collect();

    let outcomes = engine.run_concurrently(jobs).await;

    assert_eq!(outcomes.len(), 3);
    for (outcome, run_id) in outcomes.iter().zip(&run_ids) {
        assert_eq!(&outcome.run_id, run_id);
        assert_eq!(outcome.status, RunStatus::Completed, "{:?}", outcome);
        assert_eq!(outcome.rows_inserted, 12);
    }
    assert_eq!(titles(&manager).await.len(), 36);
}

#[tokio::test]
async fn test_status_history_reload_by_entry() {
    let (manager, loader) = setup(status_history_schema(), LoaderConfig::in_memory()).await;
    let row = |ordinal: i64, entry: &str| {
        json!({
            "ordinal": ordinal,
            "entry_id": entry,
            "pdb_id": "1abc",
            "date_begin": "2024-01-02 03:04:05",
            "date_end": "2024-01-05 03:04:05",
            "status_code_begin": "PROC",
            "status_code_end": "HPUB",
            "annotator": "JY",
            "details": "none",
            "delta_days": 3.0
        })
    };
    let seed = LoadBatch::new(STATUS_HISTORY_TABLE_NAME, 0)
        .with_row(row(1, "D_1000000001"))
        .with_row(row(2, "D_1000000001"))
        .with_row(row(1, "D_1000000002"));
    let mut run = LoadRun::new(&[STATUS_HISTORY_TABLE_NAME]);
    let outcome = loader.load(&mut run, vec![seed]).await;
    assert_eq!(outcome.rows_inserted, 3, "{:?}", outcome);

    let replacement = LoadBatch::new(STATUS_HISTORY_TABLE_NAME, 0).with_row(row(1, "D_1000000001"));
    let mut reload = LoadRun::new(&[STATUS_HISTORY_TABLE_NAME])
        .with_delete_mode(DeleteMode::Selected(vec![json!("D_1000000001")]));
    let outcome = loader.load(&mut reload, vec![replacement]).await;
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.rows_inserted, 1);

    let count = manager
        .execute_once(
            &format!("SELECT COUNT(*) AS n FROM \"{}\"", STATUS_HISTORY_TABLE_NAME),
            &[],
        )
        .await
        .unwrap()
        .into_result_set()
        .unwrap()
        .get_i64(0, "n");
    assert_eq!(count, Some(2));
}

#[tokio::test]
async fn test_failed_batch_leaves_no_rows_behind() {
    let mut config = LoaderConfig::in_memory();
    config.loader.max_rows_per_statement = 2;
    let manager = ConnectionManager::new(
        Arc::new(DuckDbFactory::in_memory().unwrap()),
        Arc::new(config),
    )
    .unwrap();
    manager
        .execute_once(
            "CREATE TABLE \"entry\" (\"id\" INTEGER NOT NULL CHECK (\"id\" < 3), \
             \"title\" VARCHAR, PRIMARY KEY (\"id\"))",
            &[],
        )
        .await
        .unwrap();
    let loader = BatchLoader::new(manager.clone(), Arc::new(entry_model()));

    let mut run = LoadRun::new(&["entry"]);
    let outcome = loader.load(&mut run, vec![entries(0, 1..5)]).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.batches_failed, 1);
    assert_eq!(outcome.rows_inserted, 0);
    assert!(titles(&manager).await.is_empty());
    assert!(loader.tracker().acknowledged(&run.run_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_model_fails_run() {
    let (manager, _) = entry_loader().await;
    let broken = SchemaModel::new("pdbx").with_table(
        TableDefinition::new("entry")
            .with_column(ColumnDefinition::new("id", LogicalType::decimal(2, 4))),
    );
    let loader = BatchLoader::new(manager, Arc::new(broken));

    let mut run = LoadRun::new(&["entry"]);
    let outcome = loader
        .load(&mut run, vec![LoadBatch::new("entry", 0).with_row(json!({"id": "1"}))])
        .await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.batches_attempted, 0);
    assert!(outcome.last_error.unwrap().contains("Invalid schema model"));
}

/// Fails INSERTs into `entry` with a transient error while `failures` is
/// above zero
struct FlakyFactory {
    inner: DuckDbFactory,
    failures: Arc<AtomicU32>,
    inserts: Arc<AtomicU32>,
}

struct FlakyConnection {
    inner: Box<dyn DbConnection>,
    failures: Arc<AtomicU32>,
    inserts: Arc<AtomicU32>,
}

#[async_trait]
impl ConnectionFactory for FlakyFactory {
    fn dialect(&self) -> Dialect {
        Dialect::DuckDb
    }

    async fn connect(&self) -> DatabaseResult<Box<dyn DbConnection>> {
        Ok(Box::new(FlakyConnection {
            inner: self.inner.connect().await?,
            failures: Arc::clone(&self.failures),
            inserts: Arc::clone(&self.inserts),
        }))
    }

    fn describe(&self) -> String {
        "flaky duckdb".to_string()
    }
}

#[async_trait]
impl DbConnection for FlakyConnection {
    fn dialect(&self) -> Dialect {
        Dialect::DuckDb
    }

    fn backend_type(&self) -> &'static str {
        "duckdb"
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DatabaseResult<u64> {
        if sql.starts_with("INSERT INTO \"entry\"") {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(DatabaseError::TransientFailure("deadlock detected".to_string()));
            }
        }
        self.inner.execute(sql, params).await
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> DatabaseResult<QueryResult> {
        self.inner.query(sql, params).await
    }

    async fn batch_execute(&mut self, sql: &str) -> DatabaseResult<()> {
        self.inner.batch_execute(sql).await
    }
}

type Counter = Arc<AtomicU32>;

async fn flaky_loader(failures: u32) -> (ConnectionManager, BatchLoader, Counter, Counter) {
    let failures = Arc::new(AtomicU32::new(failures));
    let inserts = Arc::new(AtomicU32::new(0));
    let factory = FlakyFactory {
        inner: DuckDbFactory::in_memory().unwrap(),
        failures: Arc::clone(&failures),
        inserts: Arc::clone(&inserts),
    };
    let mut config = LoaderConfig::in_memory();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config.loader.batch_retries = 2;
    let manager = ConnectionManager::new(Arc::new(factory), Arc::new(config)).unwrap();
    let model = Arc::new(entry_model());
    Reconciler::new(manager.clone())
        .run(Arc::clone(&model))
        .await
        .unwrap();
    let loader = BatchLoader::new(manager.clone(), model);
    (manager, loader, failures, inserts)
}

#[tokio::test]
async fn test_transient_failure_retries_batch() {
    let (manager, loader, _, inserts) = flaky_loader(1).await;
    let mut run = LoadRun::new(&["entry"]);
    let outcome = loader.load(&mut run, vec![entries(0, 0..3)]).await;

    assert_eq!(outcome.status, RunStatus::Completed, "{:?}", outcome);
    assert_eq!(inserts.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.rows_inserted, 3);
    assert_eq!(titles(&manager).await.len(), 3);
    assert_eq!(loader.tracker().last_acknowledged(&run.run_id).await.unwrap(), Some(0));
}

#[tokio::test]
async fn test_exhausted_retries_leave_batch_unacknowledged() {
    let (manager, loader, failures, inserts) = flaky_loader(0).await;
    let mut run = LoadRun::new(&["entry"]);
    let batches = (0..2u64).map(move |seq| {
        if seq == 1 {
            failures.store(u32::MAX, Ordering::SeqCst);
        }
        entries(seq, (seq as i64) * 10..(seq as i64) * 10 + 3)
    });

    let outcome = loader.load(&mut run, batches).await;

    assert_eq!(outcome.status, RunStatus::Partial);
    assert_eq!(outcome.batch_failures.len(), 1);
    let failure = &outcome.batch_failures[0];
    assert_eq!(failure.batch_seq, 1);
    assert_eq!(failure.attempts, 3);
    assert!(failure.error.contains("after 3 attempts"), "{}", failure.error);
    assert_eq!(inserts.load(Ordering::SeqCst), 4);
    assert_eq!(titles(&manager).await.len(), 3);
    assert_eq!(loader.tracker().last_acknowledged(&run.run_id).await.unwrap(), Some(0));
}

async fn file_loader(dir: &std::path::Path, keep: bool) -> (ConnectionManager, BatchLoader) {
    let mut config = LoaderConfig::in_memory();
    config.loader.work_dir = dir.to_string_lossy().into_owned();
    config.loader.keep_load_files = keep;
    setup(entry_model(), config).await
}

#[tokio::test]
async fn test_batch_file_mode_loads_through_load_file() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, loader) = file_loader(dir.path(), true).await;
    let batch = entries(0, 1..3).with_row(json!({"id": 3, "title": null}));

    let mut run = LoadRun::new(&["entry"]).with_load_mode(LoadMode::BatchFile);
    let outcome = loader.load(&mut run, vec![batch.clone()]).await;

    assert!(outcome.is_clean(), "{:?}", outcome);
    assert_eq!(outcome.rows_inserted, 3);
    assert_eq!(
        titles(&manager).await,
        vec![
            (1, Some("entry 1".to_string())),
            (2, Some("entry 2".to_string())),
            (3, None)
        ]
    );

    let path = dir.path().join(format!("entry-loadable-{}.tdd", run.run_id));
    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.starts_with("1&##&\tentry 1$##$\n"));
    assert!(content.ends_with("3&##&\t\\N$##$\n"));

    let mut again = LoadRun::new(&["entry"]).with_load_mode(LoadMode::BatchFile);
    let outcome = loader.load(&mut again, vec![batch]).await;
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.rows_inserted, 0);
    assert_eq!(outcome.rows_existing, 3);
}

#[tokio::test]
async fn test_batch_file_append_keeps_earlier_batches() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, loader) = file_loader(dir.path(), false).await;

    let mut run = LoadRun::new(&["entry"]).with_load_mode(LoadMode::BatchFileAppend);
    let outcome = loader
        .load(&mut run, vec![entries(0, 0..2), entries(1, 2..5)])
        .await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.rows_inserted, 5);
    assert_eq!(titles(&manager).await.len(), 5);

    let path = dir.path().join(format!("entry-loadable-{}.tdd", run.run_id));
    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.matches("$##$\n").count(), 5);
}

#[tokio::test]
async fn test_batch_file_removed_unless_kept() {
    let dir = tempfile::tempdir().unwrap();
    let (_, loader) = file_loader(dir.path(), false).await;

    let mut run = LoadRun::new(&["entry"]).with_load_mode(LoadMode::BatchFile);
    let outcome = loader.load(&mut run, vec![entries(0, 0..2)]).await;

    assert_eq!(outcome.rows_inserted, 2);
    assert!(
        !dir.path()
            .join(format!("entry-loadable-{}.tdd", run.run_id))
            .exists()
    );
}

#[tokio::test]
async fn test_value_containing_separator_is_rejected_in_file_mode() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, loader) = file_loader(dir.path(), true).await;
    let batch = LoadBatch::new("entry", 0)
        .with_row(json!({"id": 1, "title": "plain"}))
        .with_row(json!({"id": 2, "title": "split&##&\there"}));

    let mut run = LoadRun::new(&["entry"]).with_load_mode(LoadMode::BatchFile);
    let outcome = loader.load(&mut run, vec![batch]).await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.rows_inserted, 1);
    assert_eq!(outcome.coercion_failures.len(), 1);
    assert_eq!(outcome.coercion_failures[0].column.as_deref(), Some("title"));
    assert_eq!(titles(&manager).await, vec![(1, Some("plain".to_string()))]);
}
