//! PDBx database loader - schema-driven relational loading for structural
//! biology data
//!
//! Provides:
//! - Schema models: dialect-neutral table definitions with logical types
//! - Connection management: pooled, retrying access to DuckDB or PostgreSQL
//! - Schema reconciliation: additive and widening DDL, drift warnings
//! - Batch loading: per-row coercion, idempotent inserts, resumable runs
//! - Status history: append-only run lifecycle and batch acknowledgements
//!
//! # Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "duckdb-backend")]
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use pdbx_db_loader::{BatchLoader, ConnectionManager, LoadBatch, LoadRun, LoaderConfig, Reconciler, SchemaModel};
//!
//! let model = Arc::new(SchemaModel::from_yaml(&std::fs::read_to_string("schema.yaml")?)?);
//! let manager = ConnectionManager::from_config(Arc::new(LoaderConfig::in_memory()), std::path::Path::new(".")).await?;
//! Reconciler::new(manager.clone()).run(Arc::clone(&model)).await?;
//!
//! let loader = BatchLoader::new(manager, model);
//! let mut run = LoadRun::new(&["entry"]);
//! let batch = LoadBatch::new("entry", 0).with_row(serde_json::json!({"id": "1ABC", "title": "Lysozyme"}));
//! let outcome = loader.load(&mut run, vec![batch]).await;
//! println!("{}: {} rows inserted", outcome.status, outcome.rows_inserted);
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod definitions;
pub mod import;
pub mod load;
pub mod models;
pub mod reconcile;
pub mod status;
pub mod validation;

// Re-export commonly used types
pub use database::{
    ConnectionManager, DatabaseError, DatabaseResult, DbConnection, Dialect, LoaderConfig,
    SqlValue,
};
#[cfg(feature = "duckdb-backend")]
pub use database::DuckDbFactory;
#[cfg(feature = "postgres-backend")]
pub use database::PostgresFactory;

pub use import::{ImportError, ImportResult, MysqlDescribeImporter};
pub use load::{
    BatchLoader, DeleteMode, LoadBatch, LoadEngine, LoadError, LoadJob, LoadMode, LoadOutcome,
    LoadRun, RecordSource,
};
pub use models::{ColumnDefinition, DefaultValue, IndexDefinition, LogicalType, SchemaModel, TableDefinition};
pub use reconcile::{
    DdlOperation, ReconcileError, ReconcileOutcome, Reconciler, Reconciliation,
    SchemaDriftWarning,
};
pub use status::{BatchAck, RunStatus, StatusError, StatusRecord, StatusTracker};
pub use validation::{SchemaError, ValidationError};
