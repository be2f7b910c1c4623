//! Batch loading
//!
//! Streams record batches into reconciled tables. Rows are coerced one by
//! one so a bad row never costs its batch; each batch commits in one
//! transaction together with its acknowledgement, and batches
//! run strictly in the order they are supplied.

pub mod batch;
pub mod coerce;
pub mod file;
pub mod loader;
pub mod source;

pub use batch::{
    BatchFailure, BatchTally, CoercionFailure, DeleteMode, LoadBatch, LoadOutcome, LoadRun, Row,
};
pub use coerce::{CoercedRow, CoercionError, coerce_row, coerce_value, is_null_marker};
pub use file::{LoadFile, LoadMode};
pub use loader::BatchLoader;
pub use source::{LoadEngine, LoadJob, RecordSource};

use std::path::PathBuf;

use crate::database::DatabaseError;
use crate::status::{RunStatus, StatusError};
use crate::validation::SchemaError;

/// Errors that end a run before or between batches
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Run cancelled")]
    RunCancelled,

    #[error("Run {run_id} has already finished as {status}")]
    AlreadyFinished { run_id: String, status: RunStatus },

    #[error("Table {0} is not in the schema model")]
    UnknownTable(String),

    #[error("Load file {path:?}: {message}")]
    LoadFile { path: PathBuf, message: String },

    #[error("Invalid schema model: {0}")]
    InvalidModel(#[from] SchemaError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Status(#[from] StatusError),
}
