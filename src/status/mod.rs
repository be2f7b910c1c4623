//! Load run status history
//!
//! Every run moves through `submitted -> running -> {completed, failed,
//! partial}`. Transitions are appended to a history table and never updated;
//! the latest entry is the run's current status.

pub mod tracker;

pub use tracker::StatusTracker;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::database::DatabaseError;
use crate::reconcile::ReconcileError;

/// Lifecycle state of a load run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Submitted,
    Running,
    Completed,
    Failed,
    Partial,
}

impl RunStatus {
    fn rank(self) -> u8 {
        match self {
            RunStatus::Submitted => 0,
            RunStatus::Running => 1,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Partial => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    /// Whether `next` may be recorded after `self`
    ///
    /// Recorded sequences are subsequences of
    /// `submitted -> running -> terminal`: a status may be skipped, never
    /// repeated or revisited, and nothing follows a terminal status.
    ///
    /// ```
    /// use pdbx_db_loader::status::RunStatus;
    ///
    /// assert!(RunStatus::Submitted.can_transition_to(RunStatus::Running));
    /// assert!(RunStatus::Running.can_transition_to(RunStatus::Partial));
    /// assert!(!RunStatus::Running.can_transition_to(RunStatus::Submitted));
    /// assert!(!RunStatus::Completed.can_transition_to(RunStatus::Failed));
    /// ```
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Submitted => "submitted",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Partial => "partial",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "submitted" => Ok(RunStatus::Submitted),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "partial" => Ok(RunStatus::Partial),
            other => Err(format!("Unknown run status: {}", other)),
        }
    }
}

/// One entry of a run's status history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub run_id: String,
    /// Position in the run's history, starting at 1
    pub ordinal: i64,
    pub status: RunStatus,
    pub recorded_at: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Acknowledgement of a committed batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchAck {
    pub run_id: String,
    pub batch_seq: u64,
    pub table_name: String,
    pub rows_inserted: u64,
    pub rows_skipped: u64,
    pub acked_at: NaiveDateTime,
}

/// Errors raised by the status tracker
#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("No status recorded for run {0}")]
    NotFound(String),

    #[error("Run {run_id} cannot move from {from} to {to}")]
    InvalidTransition {
        run_id: String,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("Failed to create status tables: {0}")]
    Bootstrap(String),

    #[error("Malformed status row: {0}")]
    Malformed(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<ReconcileError> for StatusError {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::Database(inner) => StatusError::Database(inner),
            other => StatusError::Bootstrap(other.to_string()),
        }
    }
}
