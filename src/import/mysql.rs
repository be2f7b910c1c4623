//! MySQL `DESCRIBE` import
//!
//! Reads the tab-separated output of `mysql -B -e 'DESCRIBE <table>'`:
//! one header line (`Field Type Null Key Default Extra`) followed by one line
//! per column.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{ImportError, ImportResult};
use crate::models::{ColumnDefinition, DefaultValue, LogicalType, TableDefinition};
use crate::validation::input::{validate_column_name, validate_table_name};

static RE_MYSQL_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*([a-z]+)\s*(?:\(([^)]*)\))?\s*(unsigned)?\s*(zerofill)?\s*$")
        .expect("Invalid regex")
});

/// MySQL `DESCRIBE` importer
#[derive(Debug, Default)]
pub struct MysqlDescribeImporter;

impl MysqlDescribeImporter {
    pub fn new() -> Self {
        Self
    }

    /// Build a table definition from `DESCRIBE` output
    ///
    /// Lines with the wrong number of fields, unknown types or invalid names
    /// are skipped and reported in `errors`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use pdbx_db_loader::import::MysqlDescribeImporter;
    ///
    /// let describe = "Field\tType\tNull\tKey\tDefault\tExtra\n\
    ///                 entry_id\tvarchar(15)\tNO\tPRI\tNULL\t\n\
    ///                 title\ttext\tYES\t\tNULL\t\n";
    /// let result = MysqlDescribeImporter::new().import("entry", describe).unwrap();
    /// assert_eq!(result.table.primary_key, vec!["entry_id"]);
    /// assert!(result.errors.is_empty());
    /// ```
    pub fn import(&self, table_name: &str, describe: &str) -> Result<ImportResult, ImportError> {
        validate_table_name(table_name)
            .map_err(|e| ImportError::ValidationError(format!("{}: {}", table_name, e)))?;

        let mut table = TableDefinition::new(table_name);
        let mut errors = Vec::new();
        let mut primary_key = Vec::new();

        for (number, line) in describe.lines().enumerate() {
            if line.trim().is_empty() || Self::is_header(line) {
                continue;
            }
            match Self::parse_line(line) {
                Ok((column, is_key)) => {
                    if table.column(&column.name).is_some() {
                        let error = ImportError::ValidationError(format!(
                            "line {}: duplicate column {}",
                            number + 1,
                            column.name
                        ));
                        tracing::warn!("{}", error);
                        errors.push(error);
                        continue;
                    }
                    if is_key {
                        primary_key.push(column.name.clone());
                    }
                    table.columns.push(column);
                }
                Err(e) => {
                    let error = ImportError::ParseError(format!("line {}: {}", number + 1, e));
                    tracing::warn!("Skipping DESCRIBE line for {}: {}", table_name, error);
                    errors.push(error);
                }
            }
        }

        if table.columns.is_empty() {
            return Err(ImportError::ParseError(format!(
                "No columns found for {}",
                table_name
            )));
        }
        table.primary_key = primary_key;
        Ok(ImportResult { table, errors })
    }

    fn is_header(line: &str) -> bool {
        line.split('\t')
            .next()
            .is_some_and(|first| first.trim().eq_ignore_ascii_case("field"))
    }

    fn parse_line(line: &str) -> Result<(ColumnDefinition, bool), String> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 6 {
            return Err(format!("expected 6 fields, found {}", fields.len()));
        }
        let name = fields[0].trim();
        validate_column_name(name).map_err(|e| format!("{}: {}", name, e))?;

        let logical_type = map_mysql_type(fields[1])?;
        let is_key = fields[3].trim().eq_ignore_ascii_case("PRI");

        let mut column = ColumnDefinition::new(name, logical_type);
        match fields[2].trim().to_uppercase().as_str() {
            "YES" => {}
            "NO" => column = column.not_null(),
            other => return Err(format!("{}: unexpected Null value {:?}", name, other)),
        }
        // MySQL reports key columns as NOT NULL even when declared otherwise
        if is_key && column.nullable {
            column = column.not_null();
        }
        if let Some(default) = parse_default(fields[4], &logical_type) {
            column = column.with_default(default);
        }
        Ok((column, is_key))
    }
}

/// Map a MySQL column type to a logical type
///
/// Integer display widths and `zerofill` are ignored. Unsigned integers move
/// to the next wider signed type so every value still fits.
pub fn map_mysql_type(mysql_type: &str) -> Result<LogicalType, String> {
    let caps = RE_MYSQL_TYPE
        .captures(mysql_type)
        .ok_or_else(|| format!("unrecognised type {:?}", mysql_type))?;
    let base = caps[1].to_lowercase();
    let args: Vec<u32> = caps
        .get(2)
        .map(|m| {
            m.as_str()
                .split(',')
                .filter_map(|a| a.trim().parse::<u32>().ok())
                .collect()
        })
        .unwrap_or_default();
    let unsigned = caps.get(3).is_some();

    let mapped = match (base.as_str(), unsigned) {
        ("tinyint", _) => LogicalType::SMALLINT,
        ("smallint", false) => LogicalType::SMALLINT,
        ("smallint", true) | ("mediumint", _) | ("int" | "integer", false) => LogicalType::INTEGER,
        ("int" | "integer", true) | ("bigint", false) => LogicalType::BIGINT,
        ("bigint", true) => LogicalType::decimal(20, 0),
        ("decimal" | "numeric", _) => match args.as_slice() {
            [p] => LogicalType::decimal(*p, 0),
            [p, s] => LogicalType::decimal(*p, *s),
            _ => LogicalType::decimal(10, 0),
        },
        // REAL is a synonym for DOUBLE unless REAL_AS_FLOAT is set
        ("float", _) => LogicalType::Real,
        ("double" | "real", _) => LogicalType::Float,
        ("varchar", _) => match args.as_slice() {
            [n] => LogicalType::varchar(*n),
            _ => return Err(format!("varchar without length: {:?}", mysql_type)),
        },
        ("char", _) => LogicalType::char(args.first().copied().unwrap_or(1)),
        ("tinytext" | "text" | "mediumtext" | "longtext", _) => LogicalType::text(),
        ("date", _) => LogicalType::Date,
        ("datetime" | "timestamp", _) => LogicalType::DateTime,
        ("binary" | "varbinary", _) => LogicalType::Binary {
            max_length: args.first().copied(),
        },
        ("tinyblob" | "blob" | "mediumblob" | "longblob", _) => {
            LogicalType::Binary { max_length: None }
        }
        ("enum" | "set", _) => enum_type(mysql_type),
        _ => return Err(format!("unsupported type {:?}", mysql_type)),
    };
    Ok(mapped)
}

/// `enum('a','bb')` becomes text bounded by its longest member
fn enum_type(mysql_type: &str) -> LogicalType {
    let longest = mysql_type
        .split('\'')
        .skip(1)
        .step_by(2)
        .map(|member| member.chars().count() as u32)
        .max();
    match longest {
        Some(_) if mysql_type.trim().to_lowercase().starts_with("set") => LogicalType::text(),
        Some(n) => LogicalType::varchar(n.max(1)),
        None => LogicalType::text(),
    }
}

fn parse_default(raw: &str, ty: &LogicalType) -> Option<DefaultValue> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("NULL") {
        return None;
    }
    let default = match ty {
        LogicalType::Integer { .. } => DefaultValue::Integer(raw.parse().ok()?),
        LogicalType::Decimal { .. } | LogicalType::Float | LogicalType::Real => match raw.parse::<i64>() {
            Ok(v) => DefaultValue::Integer(v),
            Err(_) => DefaultValue::Float(raw.parse().ok()?),
        },
        LogicalType::DateTime if raw.to_uppercase().starts_with("CURRENT_TIMESTAMP") => {
            DefaultValue::Text("CURRENT_TIMESTAMP".to_string())
        }
        _ => DefaultValue::Text(raw.to_string()),
    };
    default.fits(ty).then_some(default)
}
