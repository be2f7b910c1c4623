//! Column definitions

use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::LogicalType;

/// Default value attached to a column
///
/// Serialized untagged so schema files can write `default: 0`,
/// `default: "?"` or `default: null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl DefaultValue {
    /// Check the default can be stored in a column of the given type
    pub fn fits(&self, ty: &LogicalType) -> bool {
        match (self, ty) {
            (DefaultValue::Integer(v), LogicalType::Integer { bytes }) => match bytes {
                2 => i16::try_from(*v).is_ok(),
                4 => i32::try_from(*v).is_ok(),
                _ => true,
            },
            (
                DefaultValue::Integer(_) | DefaultValue::Float(_),
                LogicalType::Decimal { .. } | LogicalType::Float | LogicalType::Real,
            ) => true,
            (DefaultValue::Text(s), LogicalType::Text { max_length }) => {
                max_length.is_none_or(|n| s.chars().count() <= n as usize)
            }
            (DefaultValue::Text(s), LogicalType::FixedText { length }) => {
                s.chars().count() <= *length as usize
            }
            (DefaultValue::Text(s), LogicalType::Date) => {
                chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
            }
            (DefaultValue::Text(s), LogicalType::DateTime) => {
                s.eq_ignore_ascii_case("CURRENT_TIMESTAMP")
                    || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok()
            }
            _ => false,
        }
    }

    /// Render as a SQL literal
    pub fn to_sql_literal(&self) -> String {
        match self {
            DefaultValue::Integer(v) => v.to_string(),
            DefaultValue::Float(v) => v.to_string(),
            DefaultValue::Text(s) if s.eq_ignore_ascii_case("CURRENT_TIMESTAMP") => {
                "CURRENT_TIMESTAMP".to_string()
            }
            DefaultValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }
}

impl fmt::Display for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_sql_literal())
    }
}

/// A single column of a table definition
///
/// # Example
///
/// ```rust
/// use pdbx_db_loader::models::{ColumnDefinition, LogicalType};
///
/// let col = ColumnDefinition::new("entry_id", LogicalType::char(15)).not_null();
/// assert!(!col.nullable);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Column name, unique within its table
    pub name: String,
    /// Logical type
    #[serde(rename = "type")]
    pub logical_type: LogicalType,
    /// Whether NULL is allowed (default: true)
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Default value applied by the database when the column is omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    /// Free-form documentation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ColumnDefinition {
    /// Create a nullable column with no default
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            nullable: true,
            default: None,
            description: None,
        }
    }

    /// Mark the column NOT NULL
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// A NOT NULL column without default must be supplied by every row
    pub fn is_required(&self) -> bool {
        !self.nullable && self.default.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_from_yaml() {
        let yaml = r#"
name: details
type: varchar(80)
default: "?"
"#;
        let col: ColumnDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(col.logical_type, LogicalType::varchar(80));
        assert!(col.nullable);
        assert_eq!(col.default, Some(DefaultValue::Text("?".to_string())));
    }

    #[test]
    fn test_default_fits() {
        assert!(DefaultValue::Integer(40_000).fits(&LogicalType::INTEGER));
        assert!(!DefaultValue::Integer(40_000).fits(&LogicalType::SMALLINT));
        assert!(!DefaultValue::Text("toolong".into()).fits(&LogicalType::char(3)));
        assert!(DefaultValue::Text("CURRENT_TIMESTAMP".into()).fits(&LogicalType::DateTime));
        assert!(!DefaultValue::Float(1.5).fits(&LogicalType::text()));
    }

    #[test]
    fn test_literal_escapes_quotes() {
        assert_eq!(
            DefaultValue::Text("it's".into()).to_sql_literal(),
            "'it''s'"
        );
        assert!(ColumnDefinition::new("a", LogicalType::INTEGER)
            .not_null()
            .is_required());
    }
}
