//! Load runs, batches and outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::file::LoadMode;
use crate::status::RunStatus;

/// One record: column name to raw value
pub type Row = BTreeMap<String, serde_json::Value>;

/// Rows for one table, loaded in one go
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBatch {
    pub table: String,
    /// Sequence number, unique within a run; used for acknowledgement
    pub seq: u64,
    pub rows: Vec<Row>,
}

impl LoadBatch {
    pub fn new(table: impl Into<String>, seq: u64) -> Self {
        Self {
            table: table.into(),
            seq,
            rows: Vec::new(),
        }
    }

    /// Add a row given as a JSON object; other JSON values are ignored
    pub fn with_row(mut self, row: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = row {
            self.rows.push(map.into_iter().collect());
        }
        self
    }

    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Rows removed before the first batch of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "values", rename_all = "snake_case")]
pub enum DeleteMode {
    #[default]
    None,
    /// Every row of every target table
    Truncate,
    /// Rows whose `delete_column` equals any of the values
    Selected(Vec<serde_json::Value>),
}

/// Per-batch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTally {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Already acknowledged by an earlier attempt of the run
    pub skipped: u64,
}

/// One end-to-end load, tracked as a single status history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadRun {
    pub run_id: String,
    /// Target tables; pre-load deletion applies to these
    pub tables: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub tally: BatchTally,
    pub last_error: Option<String>,
    /// Terminal status once the run has finished
    pub status: Option<RunStatus>,
    #[serde(default)]
    pub delete_mode: DeleteMode,
    #[serde(default)]
    pub load_mode: LoadMode,
    #[serde(skip)]
    cancel: CancellationToken,
}

impl LoadRun {
    /// New run with a random identifier
    pub fn new(tables: &[&str]) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), tables)
    }

    /// New run with a caller-chosen identifier, e.g. to resume a run
    pub fn with_id(run_id: impl Into<String>, tables: &[&str]) -> Self {
        Self {
            run_id: run_id.into(),
            tables: tables.iter().map(|t| t.to_string()).collect(),
            started_at: Utc::now(),
            tally: BatchTally::default(),
            last_error: None,
            status: None,
            delete_mode: DeleteMode::None,
            load_mode: LoadMode::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_delete_mode(mut self, mode: DeleteMode) -> Self {
        self.delete_mode = mode;
        self
    }

    pub fn with_load_mode(mut self, mode: LoadMode) -> Self {
        self.load_mode = mode;
        self
    }

    /// Token that cancels the run between batches; clone it to another task
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A row rejected during coercion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoercionFailure {
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    /// Index of the row within its batch
    pub row_index: usize,
    pub batch_seq: u64,
    pub message: String,
}

/// A batch that could not be committed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub batch_seq: u64,
    pub table: String,
    pub attempts: u32,
    pub error: String,
}

/// Summary of a load call; always produced, even when everything failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub batches_attempted: u64,
    pub batches_succeeded: u64,
    pub batches_failed: u64,
    pub batches_skipped: u64,
    pub rows_inserted: u64,
    /// Rows already present (or repeated within a batch) and left alone
    pub rows_existing: u64,
    pub coercion_failures: Vec<CoercionFailure>,
    pub batch_failures: Vec<BatchFailure>,
    /// Text values shortened to fit their column
    pub truncated_values: u64,
    pub cancelled: bool,
    pub last_error: Option<String>,
    pub elapsed_ms: u64,
}

impl LoadOutcome {
    pub(crate) fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            status: RunStatus::Running,
            batches_attempted: 0,
            batches_succeeded: 0,
            batches_failed: 0,
            batches_skipped: 0,
            rows_inserted: 0,
            rows_existing: 0,
            coercion_failures: Vec::new(),
            batch_failures: Vec::new(),
            truncated_values: 0,
            cancelled: false,
            last_error: None,
            elapsed_ms: 0,
        }
    }

    /// Outcome for a run that never got to its batches
    pub(crate) fn aborted(run_id: &str, status: RunStatus, error: String) -> Self {
        let mut outcome = Self::new(run_id);
        outcome.status = status;
        outcome.last_error = Some(error);
        outcome
    }

    /// Completed with no rejected rows
    pub fn is_clean(&self) -> bool {
        self.status == RunStatus::Completed && self.coercion_failures.is_empty()
    }

    pub fn tally(&self) -> BatchTally {
        BatchTally {
            attempted: self.batches_attempted,
            succeeded: self.batches_succeeded,
            failed: self.batches_failed,
            skipped: self.batches_skipped,
        }
    }

    /// Terminal status implied by the counters
    ///
    /// `completed` when no batch failed and the run was not cancelled,
    /// `partial` when at least one batch committed (now or earlier),
    /// `failed` otherwise.
    pub(crate) fn terminal_status(&self) -> RunStatus {
        if self.batches_failed == 0 && !self.cancelled {
            RunStatus::Completed
        } else if self.batches_succeeded + self.batches_skipped > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Failed
        }
    }
}
