//! DDL operations produced by the reconciler

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::database::Dialect;
use crate::models::{ColumnDefinition, DefaultValue};

/// Column as it is written into DDL: name plus the concrete native type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub native_type: String,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
}

impl ColumnSpec {
    /// Resolve a column definition against a dialect
    pub fn from_definition(column: &ColumnDefinition, dialect: Dialect) -> Self {
        Self {
            name: column.name.clone(),
            native_type: dialect.native_type(&column.logical_type),
            nullable: column.nullable,
            default: column.default.clone(),
        }
    }
}

/// A single schema change
///
/// Only additive and widening changes are ever produced by
/// [`crate::reconcile::reconcile`]; `DropIndex` exists so callers can render
/// manual fixes for reported drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DdlOperation {
    CreateTable {
        table: String,
        columns: Vec<ColumnSpec>,
        primary_key: Vec<String>,
    },
    AddColumn {
        table: String,
        column: ColumnSpec,
    },
    AddIndex {
        table: String,
        index: String,
        columns: Vec<String>,
        unique: bool,
    },
    AlterColumnType {
        table: String,
        column: String,
        /// Live native type being widened
        from: String,
        native_type: String,
        nullable: bool,
    },
    DropIndex {
        table: String,
        index: String,
    },
}

impl DdlOperation {
    /// Table the operation targets
    pub fn table(&self) -> &str {
        match self {
            DdlOperation::CreateTable { table, .. }
            | DdlOperation::AddColumn { table, .. }
            | DdlOperation::AddIndex { table, .. }
            | DdlOperation::AlterColumnType { table, .. }
            | DdlOperation::DropIndex { table, .. } => table,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DdlOperation::CreateTable { .. } => "create_table",
            DdlOperation::AddColumn { .. } => "add_column",
            DdlOperation::AddIndex { .. } => "add_index",
            DdlOperation::AlterColumnType { .. } => "alter_column_type",
            DdlOperation::DropIndex { .. } => "drop_index",
        }
    }

    pub fn is_destructive(&self) -> bool {
        matches!(self, DdlOperation::DropIndex { .. })
    }
}

impl fmt::Display for DdlOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DdlOperation::CreateTable {
                table,
                columns,
                primary_key,
            } => write!(
                f,
                "CreateTable({}, [{}], pk=[{}])",
                table,
                columns
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                primary_key.join(", ")
            ),
            DdlOperation::AddColumn { table, column } => write!(
                f,
                "AddColumn({}.{} {})",
                table, column.name, column.native_type
            ),
            DdlOperation::AddIndex {
                table,
                index,
                columns,
                unique,
            } => write!(
                f,
                "AddIndex({}{} on {} [{}])",
                if *unique { "unique " } else { "" },
                index,
                table,
                columns.join(", ")
            ),
            DdlOperation::AlterColumnType {
                table,
                column,
                from,
                native_type,
                ..
            } => write!(
                f,
                "AlterColumnType({}.{}: {} -> {})",
                table, column, from, native_type
            ),
            DdlOperation::DropIndex { table, index } => {
                write!(f, "DropIndex({} on {})", index, table)
            }
        }
    }
}
