//! Table definition validation
//!
//! Structural checks on a [`TableDefinition`]: identifiers, duplicate columns
//! and indices, key and index column references, type parameters and defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::input::{validate_column_name, validate_index_name, validate_table_name};
use crate::models::TableDefinition;

/// Error raised when a schema model is structurally invalid
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum SchemaError {
    #[error("Duplicate table: {0}")]
    DuplicateTable(String),

    #[error("Duplicate column {column} in table {table}")]
    DuplicateColumn { table: String, column: String },

    #[error("Duplicate index {index} on table {table}")]
    DuplicateIndex { table: String, index: String },

    #[error("Invalid key on table {table}: {reason}")]
    InvalidKey { table: String, reason: String },

    #[error("Index {index} on table {table} references unknown column {column}")]
    UnknownIndexColumn {
        table: String,
        index: String,
        column: String,
    },

    #[error("Table {0} has no columns")]
    EmptyTable(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid type for {table}.{column}: {reason}")]
    InvalidType {
        table: String,
        column: String,
        reason: String,
    },

    #[error("Default for {table}.{column} does not fit its type")]
    InvalidDefault { table: String, column: String },

    #[error("Delete column {column} is not a column of table {table}")]
    UnknownDeleteColumn { table: String, column: String },

    #[error("Table name mismatch: expected {expected}, got {actual}")]
    TableNameMismatch { expected: String, actual: String },

    #[error("Failed to parse schema model: {0}")]
    Parse(String),
}

/// Table validator
#[derive(Default)]
pub struct TableValidator;

impl TableValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate one table definition
    ///
    /// # Example
    ///
    /// ```rust
    /// use pdbx_db_loader::models::{ColumnDefinition, LogicalType, TableDefinition};
    /// use pdbx_db_loader::validation::tables::{SchemaError, TableValidator};
    ///
    /// let table = TableDefinition::new("entry")
    ///     .with_column(ColumnDefinition::new("id", LogicalType::INTEGER))
    ///     .with_primary_key(&["id"]);
    ///
    /// // primary key columns must be NOT NULL
    /// assert!(matches!(
    ///     TableValidator::new().validate_table(&table),
    ///     Err(SchemaError::InvalidKey { .. })
    /// ));
    /// ```
    pub fn validate_table(&self, table: &TableDefinition) -> Result<(), SchemaError> {
        validate_table_name(&table.name)
            .map_err(|e| SchemaError::InvalidIdentifier(format!("{}: {}", table.name, e)))?;

        if table.columns.is_empty() {
            return Err(SchemaError::EmptyTable(table.name.clone()));
        }

        let mut names = HashSet::new();
        for column in &table.columns {
            validate_column_name(&column.name).map_err(|e| {
                SchemaError::InvalidIdentifier(format!("{}.{}: {}", table.name, column.name, e))
            })?;
            if !names.insert(column.name.as_str()) {
                return Err(SchemaError::DuplicateColumn {
                    table: table.name.clone(),
                    column: column.name.clone(),
                });
            }
            column
                .logical_type
                .check()
                .map_err(|reason| SchemaError::InvalidType {
                    table: table.name.clone(),
                    column: column.name.clone(),
                    reason,
                })?;
            if let Some(default) = &column.default
                && !default.fits(&column.logical_type)
            {
                return Err(SchemaError::InvalidDefault {
                    table: table.name.clone(),
                    column: column.name.clone(),
                });
            }
        }

        self.validate_primary_key(table)?;
        self.validate_indices(table, &names)?;

        if let Some(column) = &table.delete_column
            && !names.contains(column.as_str())
        {
            return Err(SchemaError::UnknownDeleteColumn {
                table: table.name.clone(),
                column: column.clone(),
            });
        }

        Ok(())
    }

    fn validate_primary_key(&self, table: &TableDefinition) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        for key in &table.primary_key {
            let Some(column) = table.column(key) else {
                return Err(SchemaError::InvalidKey {
                    table: table.name.clone(),
                    reason: format!("primary key column {} does not exist", key),
                });
            };
            if column.nullable {
                return Err(SchemaError::InvalidKey {
                    table: table.name.clone(),
                    reason: format!("primary key column {} is nullable", key),
                });
            }
            if !seen.insert(key.as_str()) {
                return Err(SchemaError::InvalidKey {
                    table: table.name.clone(),
                    reason: format!("primary key column {} listed twice", key),
                });
            }
        }
        Ok(())
    }

    fn validate_indices(
        &self,
        table: &TableDefinition,
        columns: &HashSet<&str>,
    ) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        for index in &table.indices {
            validate_index_name(&index.name).map_err(|e| {
                SchemaError::InvalidIdentifier(format!("{}.{}: {}", table.name, index.name, e))
            })?;
            if !seen.insert(index.name.as_str()) {
                return Err(SchemaError::DuplicateIndex {
                    table: table.name.clone(),
                    index: index.name.clone(),
                });
            }
            if index.columns.is_empty() {
                return Err(SchemaError::InvalidKey {
                    table: table.name.clone(),
                    reason: format!("index {} has no columns", index.name),
                });
            }
            if let Some(missing) = index.columns.iter().find(|c| !columns.contains(c.as_str())) {
                return Err(SchemaError::UnknownIndexColumn {
                    table: table.name.clone(),
                    index: index.name.clone(),
                    column: missing.clone(),
                });
            }
        }
        Ok(())
    }

    /// Check a table definition was built for the expected table
    pub fn expect_name(&self, table: &TableDefinition, expected: &str) -> Result<(), SchemaError> {
        if table.name != expected {
            return Err(SchemaError::TableNameMismatch {
                expected: expected.to_string(),
                actual: table.name.clone(),
            });
        }
        Ok(())
    }
}
