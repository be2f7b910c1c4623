//! Snapshot of the live database schema

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::database::{DatabaseResult, DbConnection, Dialect, SqlValue};
use crate::models::{ColumnDefinition, IndexDefinition, SchemaModel, TableDefinition};

static RE_INDEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*CREATE\s+(UNIQUE\s+)?INDEX\s.*?\sON\s[^(]*\((.*)\)").expect("Invalid regex")
});

/// Column as reported by the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveColumn {
    pub name: String,
    /// Native type normalized to the dialect's rendering
    pub native_type: String,
    pub nullable: bool,
}

/// Index as reported by the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveIndex {
    pub name: String,
    /// Indexed columns; empty when the catalog statement could not be parsed
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveTable {
    pub name: String,
    pub columns: Vec<LiveColumn>,
    pub indices: Vec<LiveIndex>,
    /// Primary key columns; `None` when the backend does not report them
    pub primary_key: Option<Vec<String>>,
}

impl LiveTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indices: Vec::new(),
            primary_key: None,
        }
    }

    pub fn with_column(mut self, name: &str, native_type: &str, nullable: bool) -> Self {
        self.columns.push(LiveColumn {
            name: name.to_string(),
            native_type: native_type.to_string(),
            nullable,
        });
        self
    }

    pub fn with_index(mut self, name: &str, columns: &[&str], unique: bool) -> Self {
        self.indices.push(LiveIndex {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique,
        });
        self
    }

    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn column(&self, name: &str) -> Option<&LiveColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&LiveIndex> {
        self.indices.iter().find(|i| i.name == name)
    }
}

/// Introspected tables by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveSchema {
    pub tables: BTreeMap<String, LiveTable>,
}

impl LiveSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: LiveTable) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    pub fn table(&self, name: &str) -> Option<&LiveTable> {
        self.tables.get(name)
    }

    /// Skeleton model of the live tables
    ///
    /// Native types outside the logical type system are skipped with a
    /// warning. Without a reported primary key the model has none.
    pub fn to_model(&self, database: &str, dialect: Dialect) -> SchemaModel {
        let mut model = SchemaModel::new(database);
        for live in self.tables.values() {
            let mut table = TableDefinition::new(&live.name);
            for column in &live.columns {
                match dialect.parse_native(&column.native_type) {
                    Some(ty) => {
                        let mut def = ColumnDefinition::new(&column.name, ty);
                        def.nullable = column.nullable;
                        table.columns.push(def);
                    }
                    None => tracing::warn!(
                        "Skipping {}.{}: unrecognised type {}",
                        live.name,
                        column.name,
                        column.native_type
                    ),
                }
            }
            if let Some(pk) = &live.primary_key {
                table.primary_key = pk.clone();
            }
            for index in live.indices.iter().filter(|i| !i.columns.is_empty()) {
                table.indices.push(IndexDefinition {
                    name: index.name.clone(),
                    columns: index.columns.clone(),
                    unique: index.unique,
                });
            }
            model.insert(table);
        }
        model
    }
}

/// Pull the column list out of a `CREATE [UNIQUE] INDEX ... ON t (...)` statement
pub(crate) fn parse_index_statement(sql: &str) -> (Vec<String>, bool) {
    let Some(caps) = RE_INDEX.captures(sql) else {
        return (Vec::new(), false);
    };
    let columns = caps[2]
        .split(',')
        .map(|c| c.trim().trim_matches(|ch| ch == '"' || ch == '`').to_string())
        .filter(|c| !c.is_empty())
        .collect();
    (columns, caps.get(1).is_some())
}

fn as_opt_i64(value: Option<&serde_json::Value>) -> Option<i64> {
    match value? {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Read the live definition of the named tables
///
/// Tables that do not exist are absent from the result.
pub async fn introspect(
    conn: &mut dyn DbConnection,
    tables: &[&str],
) -> DatabaseResult<LiveSchema> {
    let dialect = conn.dialect();
    if dialect == Dialect::MySql {
        return Err(crate::database::DatabaseError::Unsupported {
            dialect: dialect.name(),
            operation: "introspection",
        });
    }

    let mut schema = LiveSchema::new();
    for &name in tables {
        let params = [SqlValue::Text(name.to_string())];
        let columns = conn.query(&dialect.columns_query(), &params).await?;
        if columns.is_empty() {
            continue;
        }

        let mut table = LiveTable::new(name);
        for row in &columns.rows {
            let column_name = row
                .get("column_name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let data_type = row
                .get("data_type")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let native_type = dialect.normalize_introspected(
                data_type,
                as_opt_i64(row.get("character_maximum_length")),
                as_opt_i64(row.get("numeric_precision")),
                as_opt_i64(row.get("numeric_scale")),
            );
            let nullable = row
                .get("is_nullable")
                .and_then(|v| v.as_str())
                .is_none_or(|v| v.eq_ignore_ascii_case("YES"));
            table.columns.push(LiveColumn {
                name: column_name,
                native_type,
                nullable,
            });
        }

        if let Some(sql) = dialect.indexes_query() {
            let indexes = conn.query(&sql, &params).await?;
            let pkey_name = format!("{}_pkey", name);
            for row in &indexes.rows {
                let index_name = row
                    .get("index_name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                if index_name.is_empty() || index_name == pkey_name {
                    continue;
                }
                let (columns, unique) = row
                    .get("sql")
                    .and_then(|v| v.as_str())
                    .map(parse_index_statement)
                    .unwrap_or_default();
                table.indices.push(LiveIndex {
                    name: index_name.to_string(),
                    columns,
                    unique,
                });
            }
        }

        if let Some(sql) = dialect.primary_key_query() {
            let keys = conn.query(&sql, &params).await?;
            table.primary_key = Some(
                keys.rows
                    .iter()
                    .filter_map(|r| r.get("column_name").and_then(|v| v.as_str()))
                    .map(|s| s.to_string())
                    .collect(),
            );
        }

        tracing::debug!(
            "Introspected {}: {} columns, {} indices",
            name,
            table.columns.len(),
            table.indices.len()
        );
        schema.tables.insert(name.to_string(), table);
    }

    Ok(schema)
}
