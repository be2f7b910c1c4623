//! Schema model: the set of tables a load targets

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::table::TableDefinition;
use crate::validation::tables::{SchemaError, TableValidator};

/// Dialect-neutral schema model
///
/// Tables keep their declaration order, which is also the order in which the
/// reconciler creates missing tables. A model is treated as immutable once it
/// is handed to the reconciler; share it behind an `Arc` across runs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SchemaModel {
    /// Logical database name (informational)
    #[serde(default)]
    pub database: String,
    /// Tables in declaration order
    #[serde(default)]
    pub tables: Vec<TableDefinition>,
}

impl SchemaModel {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            tables: Vec::new(),
        }
    }

    /// Add a table, replacing any existing table with the same name
    pub fn with_table(mut self, table: TableDefinition) -> Self {
        self.insert(table);
        self
    }

    pub fn insert(&mut self, table: TableDefinition) {
        match self.tables.iter_mut().find(|t| t.name == table.name) {
            Some(existing) => *existing = table,
            None => self.tables.push(table),
        }
    }

    /// Look up a table by name
    pub fn table(&self, name: &str) -> Option<&TableDefinition> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Merge another model's tables into this one
    pub fn extend(&mut self, other: SchemaModel) {
        for table in other.tables {
            self.insert(table);
        }
    }

    /// Validate every table
    ///
    /// Stops at the first problem found.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let validator = TableValidator::new();
        let mut seen = std::collections::HashSet::new();
        for table in &self.tables {
            if !seen.insert(table.name.as_str()) {
                return Err(SchemaError::DuplicateTable(table.name.clone()));
            }
            validator.validate_table(table)?;
        }
        Ok(())
    }

    /// Parse a model from YAML
    pub fn from_yaml(content: &str) -> Result<Self, SchemaError> {
        serde_yaml::from_str(content).map_err(|e| SchemaError::Parse(e.to_string()))
    }

    /// Parse a model from JSON
    pub fn from_json(content: &str) -> Result<Self, SchemaError> {
        serde_json::from_str(content).map_err(|e| SchemaError::Parse(e.to_string()))
    }

    /// Load and validate a model file; `.json` files are read as JSON, anything else as YAML
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SchemaError::Parse(format!("Failed to read {}: {}", path.display(), e)))?;
        let model = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content)?,
            _ => Self::from_yaml(&content)?,
        };
        model.validate()?;
        Ok(model)
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String, SchemaError> {
        serde_yaml::to_string(self).map_err(|e| SchemaError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnDefinition, LogicalType};

    const ENTRY_YAML: &str = r#"
database: structures
tables:
  - name: entry
    columns:
      - name: id
        type: integer
        nullable: false
      - name: title
        type: text
    primary_key: [id]
"#;

    #[test]
    fn test_from_yaml_keeps_declared_order() {
        let model = SchemaModel::from_yaml(ENTRY_YAML).unwrap();
        assert_eq!(model.database, "structures");
        let entry = model.table("entry").unwrap();
        assert_eq!(entry.column_names(), vec!["id", "title"]);
        assert_eq!(entry.primary_key, vec!["id".to_string()]);
        assert!(model.validate().is_ok());
    }

    #[test]
    fn test_insert_replaces_same_name() {
        let mut model = SchemaModel::new("db")
            .with_table(TableDefinition::new("a").with_column(ColumnDefinition::new(
                "x",
                LogicalType::INTEGER,
            )));
        model.insert(
            TableDefinition::new("a")
                .with_column(ColumnDefinition::new("y", LogicalType::INTEGER)),
        );
        assert_eq!(model.tables.len(), 1);
        assert!(model.table("a").unwrap().column("y").is_some());
    }

    #[test]
    fn test_load_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let model = SchemaModel::from_yaml(ENTRY_YAML).unwrap();
        std::fs::write(&path, serde_json::to_string(&model).unwrap()).unwrap();
        assert_eq!(SchemaModel::load(&path).unwrap(), model);
    }
}
