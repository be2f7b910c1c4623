//! Dialect-specific SQL generation
//!
//! Everything backend-specific about SQL text lives here: identifier quoting,
//! native type names, placeholders, DDL rendering and catalog queries.

use serde::{Deserialize, Serialize};

use crate::models::{ColumnDefinition, LogicalType};
use crate::reconcile::ops::{ColumnSpec, DdlOperation};
use crate::validation::input::sanitize_sql_identifier;

/// SQL dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Dialect {
    /// DuckDB (default)
    #[default]
    #[serde(rename = "duckdb")]
    DuckDb,
    /// PostgreSQL
    #[serde(rename = "postgres")]
    Postgres,
    /// MySQL / MariaDB, rendering only
    #[serde(rename = "mysql")]
    MySql,
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "duckdb" => Ok(Dialect::DuckDb),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            _ => Err(format!(
                "Unknown dialect: {}. Use 'duckdb', 'postgres' or 'mysql'.",
                s
            )),
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::DuckDb => "duckdb",
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
        }
    }

    /// Whether DDL statements can be rolled back inside a transaction
    pub fn supports_transactional_ddl(&self) -> bool {
        !matches!(self, Dialect::MySql)
    }

    /// Quote an identifier
    pub fn quote(&self, identifier: &str) -> String {
        sanitize_sql_identifier(identifier, *self)
    }

    /// Native type for a logical type
    ///
    /// | Logical         | DuckDB       | PostgreSQL       | MySQL        |
    /// |-----------------|--------------|------------------|--------------|
    /// | Integer{2,4,8}  | SMALLINT/INTEGER/BIGINT | same  | SMALLINT/INT/BIGINT |
    /// | Decimal{p,s}    | DECIMAL(p,s) | NUMERIC(p,s)     | DECIMAL(p,s) |
    /// | Float           | DOUBLE       | DOUBLE PRECISION | DOUBLE       |
    /// | Real            | REAL         | REAL             | FLOAT        |
    /// | Text{n}         | VARCHAR      | VARCHAR(n)/TEXT  | VARCHAR(n)/LONGTEXT |
    /// | FixedText{n}    | VARCHAR      | CHAR(n)          | CHAR(n)      |
    /// | Date            | DATE         | DATE             | DATE         |
    /// | DateTime        | TIMESTAMP    | TIMESTAMP        | DATETIME     |
    /// | Binary{n}       | BLOB         | BYTEA            | VARBINARY(n)/LONGBLOB |
    pub fn native_type(&self, ty: &LogicalType) -> String {
        match (self, ty) {
            (_, LogicalType::Integer { bytes: 2 }) => "SMALLINT".to_string(),
            (_, LogicalType::Integer { bytes: 8 }) => "BIGINT".to_string(),
            (Dialect::MySql, LogicalType::Integer { .. }) => "INT".to_string(),
            (_, LogicalType::Integer { .. }) => "INTEGER".to_string(),
            (Dialect::Postgres, LogicalType::Decimal { precision, scale }) => {
                format!("NUMERIC({},{})", precision, scale)
            }
            (_, LogicalType::Decimal { precision, scale }) => {
                format!("DECIMAL({},{})", precision, scale)
            }
            (Dialect::Postgres, LogicalType::Float) => "DOUBLE PRECISION".to_string(),
            (_, LogicalType::Float) => "DOUBLE".to_string(),
            (Dialect::MySql, LogicalType::Real) => "FLOAT".to_string(),
            (_, LogicalType::Real) => "REAL".to_string(),
            (Dialect::DuckDb, LogicalType::Text { .. } | LogicalType::FixedText { .. }) => {
                "VARCHAR".to_string()
            }
            (Dialect::Postgres, LogicalType::Text { max_length: None }) => "TEXT".to_string(),
            (Dialect::MySql, LogicalType::Text { max_length: None }) => "LONGTEXT".to_string(),
            (
                _,
                LogicalType::Text {
                    max_length: Some(n),
                },
            ) => format!("VARCHAR({})", n),
            (_, LogicalType::FixedText { length }) => format!("CHAR({})", length),
            (_, LogicalType::Date) => "DATE".to_string(),
            (Dialect::MySql, LogicalType::DateTime) => "DATETIME".to_string(),
            (_, LogicalType::DateTime) => "TIMESTAMP".to_string(),
            (Dialect::DuckDb, LogicalType::Binary { .. }) => "BLOB".to_string(),
            (Dialect::Postgres, LogicalType::Binary { .. }) => "BYTEA".to_string(),
            (
                Dialect::MySql,
                LogicalType::Binary {
                    max_length: Some(n),
                },
            ) => format!("VARBINARY({})", n),
            (Dialect::MySql, LogicalType::Binary { max_length: None }) => "LONGBLOB".to_string(),
        }
    }

    /// Parse a native type string back into a logical type
    ///
    /// Returns `None` for native types outside the logical type system.
    /// A bare `FLOAT` is single precision on DuckDB and MySQL.
    pub fn parse_native(&self, native: &str) -> Option<LogicalType> {
        match self {
            Dialect::DuckDb | Dialect::MySql if native.trim().eq_ignore_ascii_case("FLOAT") => {
                Some(LogicalType::Real)
            }
            _ => native.parse::<LogicalType>().ok(),
        }
    }

    /// Whether a live native type and a logical type render identically
    pub fn same_native(&self, live_native: &str, ty: &LogicalType) -> bool {
        let expected = self.native_type(ty);
        if live_native.eq_ignore_ascii_case(&expected) {
            return true;
        }
        self.parse_native(live_native)
            .is_some_and(|live| self.native_type(&live) == expected)
    }

    /// Build a native type string from catalog columns
    /// (`information_schema.columns.data_type` and its length/precision columns)
    pub fn normalize_introspected(
        &self,
        data_type: &str,
        char_length: Option<i64>,
        numeric_precision: Option<i64>,
        numeric_scale: Option<i64>,
    ) -> String {
        let upper = data_type.trim().to_uppercase();
        match upper.as_str() {
            "CHARACTER VARYING" | "VARCHAR" => match char_length {
                Some(n) if *self != Dialect::DuckDb => format!("VARCHAR({})", n),
                _ => "VARCHAR".to_string(),
            },
            "CHARACTER" | "CHAR" | "BPCHAR" => match char_length {
                Some(n) => format!("CHAR({})", n),
                None => "CHAR(1)".to_string(),
            },
            "NUMERIC" | "DECIMAL" => match (numeric_precision, numeric_scale) {
                (Some(p), scale) => self.native_type(&LogicalType::decimal(
                    p as u32,
                    scale.unwrap_or(0) as u32,
                )),
                (None, _) => upper,
            },
            "TIMESTAMP WITHOUT TIME ZONE" => "TIMESTAMP".to_string(),
            "INT" | "INT4" => "INTEGER".to_string(),
            "INT2" => "SMALLINT".to_string(),
            "INT8" => "BIGINT".to_string(),
            "FLOAT8" => "DOUBLE PRECISION".to_string(),
            "FLOAT4" => "REAL".to_string(),
            _ => upper,
        }
    }

    /// Placeholder for the `index`-th (1-based) parameter, cast to `native`
    ///
    /// Parameters are always bound as text.
    pub fn placeholder(&self, index: usize, native: &str) -> String {
        match self {
            Dialect::DuckDb => format!("CAST(? AS {})", native),
            Dialect::Postgres => format!("CAST(${}::TEXT AS {})", index, native),
            Dialect::MySql => "?".to_string(),
        }
    }

    /// Cast expression turning a column into text
    pub fn text_cast(&self, expr: &str) -> String {
        match self {
            Dialect::MySql => format!("CAST({} AS CHAR)", expr),
            _ => format!("CAST({} AS VARCHAR)", expr),
        }
    }

    fn column_clause(&self, column: &ColumnSpec) -> String {
        let mut clause = format!("{} {}", self.quote(&column.name), column.native_type);
        if !column.nullable {
            clause.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            clause.push_str(" DEFAULT ");
            clause.push_str(&default.to_sql_literal());
        }
        clause
    }

    fn column_list(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.quote(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Render one DDL operation as a single statement
    pub fn render(&self, op: &DdlOperation) -> String {
        match op {
            DdlOperation::CreateTable {
                table,
                columns,
                primary_key,
            } => {
                let mut parts: Vec<String> = columns.iter().map(|c| self.column_clause(c)).collect();
                if !primary_key.is_empty() {
                    parts.push(format!("PRIMARY KEY ({})", self.column_list(primary_key)));
                }
                format!(
                    "CREATE TABLE IF NOT EXISTS {} ({})",
                    self.quote(table),
                    parts.join(", ")
                )
            }
            DdlOperation::AddColumn { table, column } => format!(
                "ALTER TABLE {} ADD COLUMN {}",
                self.quote(table),
                self.column_clause(column)
            ),
            DdlOperation::AddIndex {
                table,
                index,
                columns,
                unique,
            } => {
                let if_not_exists = match self {
                    Dialect::MySql => "",
                    _ => "IF NOT EXISTS ",
                };
                format!(
                    "CREATE {}INDEX {}{} ON {} ({})",
                    if *unique { "UNIQUE " } else { "" },
                    if_not_exists,
                    self.quote(index),
                    self.quote(table),
                    self.column_list(columns)
                )
            }
            DdlOperation::AlterColumnType {
                table,
                column,
                native_type,
                nullable,
                ..
            } => match self {
                Dialect::MySql => format!(
                    "ALTER TABLE {} MODIFY COLUMN {} {}{}",
                    self.quote(table),
                    self.quote(column),
                    native_type,
                    if *nullable { "" } else { " NOT NULL" }
                ),
                _ => format!(
                    "ALTER TABLE {} ALTER COLUMN {} TYPE {}",
                    self.quote(table),
                    self.quote(column),
                    native_type
                ),
            },
            DdlOperation::DropIndex { table, index } => match self {
                Dialect::MySql => format!(
                    "DROP INDEX {} ON {}",
                    self.quote(index),
                    self.quote(table)
                ),
                _ => format!("DROP INDEX IF EXISTS {}", self.quote(index)),
            },
        }
    }

    /// Multi-row INSERT for `row_count` rows of `columns`
    pub fn insert_sql(
        &self,
        table: &str,
        columns: &[&ColumnDefinition],
        row_count: usize,
    ) -> String {
        let natives: Vec<String> = columns
            .iter()
            .map(|c| self.native_type(&c.logical_type))
            .collect();
        let mut index = 0;
        let rows: Vec<String> = (0..row_count)
            .map(|_| {
                let values: Vec<String> = natives
                    .iter()
                    .map(|native| {
                        index += 1;
                        self.placeholder(index, native)
                    })
                    .collect();
                format!("({})", values.join(", "))
            })
            .collect();
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.quote(table),
            columns
                .iter()
                .map(|c| self.quote(&c.name))
                .collect::<Vec<_>>()
                .join(", "),
            rows.join(", ")
        )
    }

    /// Query returning, as text, the key columns of rows matching any of
    /// `key_count` primary key tuples
    pub fn select_existing_sql(
        &self,
        table: &str,
        key_columns: &[&ColumnDefinition],
        key_count: usize,
    ) -> String {
        let projection: Vec<String> = key_columns
            .iter()
            .map(|c| {
                format!(
                    "{} AS {}",
                    self.text_cast(&self.quote(&c.name)),
                    self.quote(&c.name)
                )
            })
            .collect();
        let mut index = 0;
        let predicates: Vec<String> = (0..key_count)
            .map(|_| {
                let terms: Vec<String> = key_columns
                    .iter()
                    .map(|c| {
                        index += 1;
                        format!(
                            "{} = {}",
                            self.quote(&c.name),
                            self.placeholder(index, &self.native_type(&c.logical_type))
                        )
                    })
                    .collect();
                format!("({})", terms.join(" AND "))
            })
            .collect();
        format!(
            "SELECT {} FROM {} WHERE {}",
            projection.join(", "),
            self.quote(table),
            predicates.join(" OR ")
        )
    }

    /// DELETE rows whose `column` matches any of `value_count` values
    pub fn delete_in_sql(&self, table: &str, column: &ColumnDefinition, value_count: usize) -> String {
        let native = self.native_type(&column.logical_type);
        let values: Vec<String> = (1..=value_count)
            .map(|i| self.placeholder(i, &native))
            .collect();
        format!(
            "DELETE FROM {} WHERE {} IN ({})",
            self.quote(table),
            self.quote(&column.name),
            values.join(", ")
        )
    }

    /// Table receiving a bulk copy, one text column per target column
    ///
    /// PostgreSQL stages in a temporary table; DuckDB's appender needs a
    /// regular one, which the loader drops inside the same transaction.
    pub fn create_stage_sql(&self, stage: &str, columns: &[&ColumnDefinition]) -> String {
        let text = match self {
            Dialect::DuckDb => "VARCHAR",
            _ => "TEXT",
        };
        let columns: Vec<String> = columns
            .iter()
            .map(|c| format!("{} {}", self.quote(&c.name), text))
            .collect();
        let temporary = match self {
            Dialect::DuckDb => "",
            _ => "TEMPORARY ",
        };
        format!(
            "CREATE {}TABLE {} ({})",
            temporary,
            self.quote(stage),
            columns.join(", ")
        )
    }

    pub fn drop_table_sql(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quote(table))
    }

    /// Move staged rows into `table`, casting each text column to its native
    /// type and skipping rows whose primary key is already present
    pub fn insert_from_stage_sql(
        &self,
        table: &str,
        columns: &[&ColumnDefinition],
        key_columns: &[&ColumnDefinition],
        stage: &str,
    ) -> String {
        let cast = |c: &ColumnDefinition| {
            format!(
                "CAST(s.{} AS {})",
                self.quote(&c.name),
                self.native_type(&c.logical_type)
            )
        };
        let mut sql = format!(
            "INSERT INTO {} ({}) SELECT {} FROM {} AS s",
            self.quote(table),
            columns
                .iter()
                .map(|c| self.quote(&c.name))
                .collect::<Vec<_>>()
                .join(", "),
            columns.iter().map(|c| cast(*c)).collect::<Vec<_>>().join(", "),
            self.quote(stage)
        );
        if !key_columns.is_empty() {
            let matches: Vec<String> = key_columns
                .iter()
                .map(|c| format!("x.{} = {}", self.quote(&c.name), cast(*c)))
                .collect();
            sql.push_str(&format!(
                " WHERE NOT EXISTS (SELECT 1 FROM {} AS x WHERE {})",
                self.quote(table),
                matches.join(" AND ")
            ));
        }
        sql
    }

    /// DELETE every row of a table
    pub fn delete_all_sql(&self, table: &str) -> String {
        format!("DELETE FROM {}", self.quote(table))
    }

    /// Catalog query listing a table's columns in ordinal order
    ///
    /// Returned columns: `column_name`, `data_type`, `is_nullable`,
    /// `character_maximum_length`, `numeric_precision`, `numeric_scale`.
    pub fn columns_query(&self) -> String {
        format!(
            "SELECT column_name, data_type, is_nullable, character_maximum_length, \
             numeric_precision, numeric_scale FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = {} \
             ORDER BY ordinal_position",
            self.placeholder(1, "VARCHAR")
        )
    }

    /// Catalog query listing a table's indices with their creating statement
    ///
    /// Returned columns: `index_name`, `sql`.
    pub fn indexes_query(&self) -> Option<String> {
        match self {
            Dialect::DuckDb => Some(format!(
                "SELECT index_name, sql FROM duckdb_indexes() \
                 WHERE schema_name = current_schema() AND table_name = {}",
                self.placeholder(1, "VARCHAR")
            )),
            Dialect::Postgres => Some(format!(
                "SELECT indexname AS index_name, indexdef AS sql FROM pg_indexes \
                 WHERE schemaname = current_schema() AND tablename = {}",
                self.placeholder(1, "VARCHAR")
            )),
            Dialect::MySql => None,
        }
    }

    /// Catalog query listing a table's primary key columns in key order
    ///
    /// Returned column: `column_name`. DuckDB does not expose key column
    /// order through `information_schema`, so its primary key is not read.
    pub fn primary_key_query(&self) -> Option<String> {
        match self {
            Dialect::Postgres => Some(format!(
                "SELECT kcu.column_name FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                 ON tc.constraint_name = kcu.constraint_name \
                 AND tc.table_schema = kcu.table_schema \
                 WHERE tc.constraint_type = 'PRIMARY KEY' \
                 AND tc.table_schema = current_schema() AND tc.table_name = {} \
                 ORDER BY kcu.ordinal_position",
                self.placeholder(1, "VARCHAR")
            )),
            Dialect::DuckDb | Dialect::MySql => None,
        }
    }
}
