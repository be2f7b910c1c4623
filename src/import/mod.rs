//! Import functionality
//!
//! Builds table definitions from schema descriptions produced by other
//! tools. The result is a skeleton: review it before adding it to a model.
//!
//! - MySQL `DESCRIBE` output ([`MysqlDescribeImporter`])
//!
//! Introspected databases are imported through
//! [`crate::reconcile::LiveSchema::to_model`].

pub mod mysql;

pub use mysql::MysqlDescribeImporter;

use crate::models::TableDefinition;

/// Result of an import operation.
///
/// Contains the extracted table and any lines that could not be used.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[must_use = "import results should be processed or errors checked"]
pub struct ImportResult {
    /// Table extracted from the import
    pub table: TableDefinition,
    /// Parse errors/warnings for skipped lines
    pub errors: Vec<ImportError>,
}

/// Error during import
#[derive(Debug, Clone, PartialEq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum ImportError {
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}
