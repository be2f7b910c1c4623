//! Table definitions: ordered columns, primary key and secondary indices

use serde::{Deserialize, Serialize};

use super::column::ColumnDefinition;

/// Secondary index on a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Index name, unique within the table
    pub name: String,
    /// Indexed columns in key order
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness
    #[serde(default)]
    pub unique: bool,
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Table definition
///
/// Columns keep their declared order; it is the order used by `CREATE TABLE`
/// and by multi-row inserts.
///
/// # Example
///
/// ```rust
/// use pdbx_db_loader::models::{ColumnDefinition, IndexDefinition, LogicalType, TableDefinition};
///
/// let table = TableDefinition::new("entry")
///     .with_column(ColumnDefinition::new("id", LogicalType::INTEGER).not_null())
///     .with_column(ColumnDefinition::new("title", LogicalType::text()))
///     .with_primary_key(&["id"])
///     .with_index(IndexDefinition::new("entry_title", &["title"]));
///
/// assert_eq!(table.column_names(), vec!["id", "title"]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Table name
    pub name: String,
    /// Columns in declared order
    pub columns: Vec<ColumnDefinition>,
    /// Primary key columns in key order (may be empty)
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Secondary indices
    #[serde(default)]
    pub indices: Vec<IndexDefinition>,
    /// Column used for selective pre-load deletion (e.g. `entry_id`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TableDefinition {
    /// Create an empty table definition
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            indices: Vec::new(),
            delete_column: None,
            description: None,
        }
    }

    pub fn with_column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_index(mut self, index: IndexDefinition) -> Self {
        self.indices.push(index);
        self
    }

    pub fn with_delete_column(mut self, column: impl Into<String>) -> Self {
        self.delete_column = Some(column.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Look up a column by name
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names in declared order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Primary key columns resolved to their definitions
    ///
    /// Names that do not resolve are skipped; `validate` reports them.
    pub fn primary_key_columns(&self) -> Vec<&ColumnDefinition> {
        self.primary_key
            .iter()
            .filter_map(|name| self.column(name))
            .collect()
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }
}
