//! Dialect-neutral logical column types
//!
//! Logical types are written in schema files as compact SQL-like strings
//! (`INTEGER`, `VARCHAR(80)`, `DECIMAL(10,2)`, ...) and rendered to exactly one
//! native type per dialect by [`crate::database::Dialect::native_type`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

static RE_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z][A-Za-z ]*?)\s*(?:\(\s*(\d+)\s*(?:,\s*(\d+)\s*)?\))?\s*$")
        .expect("Invalid regex")
});

/// Largest decimal precision accepted by every supported dialect
pub const MAX_DECIMAL_PRECISION: u32 = 38;

/// Logical column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LogicalType {
    /// Signed integer stored in 2, 4 or 8 bytes
    Integer { bytes: u8 },
    /// Exact numeric with total digits and digits after the point
    Decimal { precision: u32, scale: u32 },
    /// Double precision floating point
    Float,
    /// Single precision floating point
    Real,
    /// Variable length text, optionally bounded
    Text { max_length: Option<u32> },
    /// Fixed length text
    FixedText { length: u32 },
    /// Calendar date
    Date,
    /// Date and time without zone
    DateTime,
    /// Binary data, optionally bounded
    Binary { max_length: Option<u32> },
}

impl LogicalType {
    pub const SMALLINT: LogicalType = LogicalType::Integer { bytes: 2 };
    pub const INTEGER: LogicalType = LogicalType::Integer { bytes: 4 };
    pub const BIGINT: LogicalType = LogicalType::Integer { bytes: 8 };

    /// Bounded variable length text
    pub fn varchar(max_length: u32) -> Self {
        LogicalType::Text {
            max_length: Some(max_length),
        }
    }

    /// Unbounded text
    pub fn text() -> Self {
        LogicalType::Text { max_length: None }
    }

    /// Fixed length text
    pub fn char(length: u32) -> Self {
        LogicalType::FixedText { length }
    }

    /// Exact numeric
    pub fn decimal(precision: u32, scale: u32) -> Self {
        LogicalType::Decimal { precision, scale }
    }

    /// Maximum character or byte length, if the type carries one
    pub fn max_length(&self) -> Option<u32> {
        match self {
            LogicalType::Text { max_length } | LogicalType::Binary { max_length } => *max_length,
            LogicalType::FixedText { length } => Some(*length),
            _ => None,
        }
    }

    /// Whether values of this type are character data
    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            LogicalType::Text { .. } | LogicalType::FixedText { .. }
        )
    }

    /// Check the type's own parameters
    ///
    /// Returns a human readable reason when the type can never hold a value:
    /// zero lengths, unsupported integer widths, or a scale beyond the precision.
    pub fn check(&self) -> Result<(), String> {
        match *self {
            LogicalType::Integer { bytes } if ![2, 4, 8].contains(&bytes) => Err(format!(
                "integer width must be 2, 4 or 8 bytes, got {}",
                bytes
            )),
            LogicalType::Decimal { precision, scale } => {
                if precision == 0 || precision > MAX_DECIMAL_PRECISION {
                    Err(format!(
                        "decimal precision must be between 1 and {}, got {}",
                        MAX_DECIMAL_PRECISION, precision
                    ))
                } else if scale > precision {
                    Err(format!(
                        "decimal scale {} exceeds precision {}",
                        scale, precision
                    ))
                } else {
                    Ok(())
                }
            }
            LogicalType::Text {
                max_length: Some(0),
            }
            | LogicalType::Binary {
                max_length: Some(0),
            }
            | LogicalType::FixedText { length: 0 } => Err("length must be positive".to_string()),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalType::Integer { bytes: 2 } => write!(f, "SMALLINT"),
            LogicalType::Integer { bytes: 8 } => write!(f, "BIGINT"),
            LogicalType::Integer { bytes: 4 } => write!(f, "INTEGER"),
            LogicalType::Integer { bytes } => write!(f, "INTEGER({})", bytes),
            LogicalType::Decimal { precision, scale } => {
                write!(f, "DECIMAL({},{})", precision, scale)
            }
            LogicalType::Float => write!(f, "FLOAT"),
            LogicalType::Real => write!(f, "REAL"),
            LogicalType::Text { max_length: None } => write!(f, "TEXT"),
            LogicalType::Text {
                max_length: Some(n),
            } => write!(f, "VARCHAR({})", n),
            LogicalType::FixedText { length } => write!(f, "CHAR({})", length),
            LogicalType::Date => write!(f, "DATE"),
            LogicalType::DateTime => write!(f, "DATETIME"),
            LogicalType::Binary { max_length: None } => write!(f, "BLOB"),
            LogicalType::Binary {
                max_length: Some(n),
            } => write!(f, "VARBINARY({})", n),
        }
    }
}

impl FromStr for LogicalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = RE_TYPE
            .captures(s)
            .ok_or_else(|| format!("Unrecognised type: {}", s))?;
        let base = caps[1]
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_uppercase();
        let first = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
        let second = caps.get(3).and_then(|m| m.as_str().parse::<u32>().ok());

        let parsed = match (base.as_str(), first, second) {
            ("SMALLINT" | "INT2", None, None) => LogicalType::SMALLINT,
            ("INT" | "INTEGER" | "INT4", None, None) => LogicalType::INTEGER,
            ("BIGINT" | "INT8", None, None) => LogicalType::BIGINT,
            ("INTEGER", Some(bytes), None) => LogicalType::Integer {
                bytes: u8::try_from(bytes)
                    .map_err(|_| format!("Integer width out of range: {}", s))?,
            },
            ("DECIMAL" | "NUMERIC", Some(p), s) => LogicalType::Decimal {
                precision: p,
                scale: s.unwrap_or(0),
            },
            ("DECIMAL" | "NUMERIC", None, None) => LogicalType::Decimal {
                precision: 18,
                scale: 3,
            },
            ("FLOAT" | "DOUBLE" | "DOUBLE PRECISION" | "FLOAT8", _, None) => LogicalType::Float,
            ("REAL" | "FLOAT4", None, None) => LogicalType::Real,
            ("TEXT" | "LONGTEXT" | "CLOB", None, None) => LogicalType::text(),
            ("VARCHAR" | "CHARACTER VARYING", n, None) => LogicalType::Text { max_length: n },
            ("CHAR" | "CHARACTER", Some(n), None) => LogicalType::FixedText { length: n },
            ("CHAR" | "CHARACTER", None, None) => LogicalType::FixedText { length: 1 },
            ("DATE", None, None) => LogicalType::Date,
            ("DATETIME" | "TIMESTAMP", _, None) => LogicalType::DateTime,
            ("BLOB" | "BYTEA" | "LONGBLOB", None, None) => LogicalType::Binary { max_length: None },
            ("VARBINARY" | "BINARY", n, None) => LogicalType::Binary { max_length: n },
            _ => return Err(format!("Unrecognised type: {}", s)),
        };

        Ok(parsed)
    }
}

impl TryFrom<String> for LogicalType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LogicalType> for String {
    fn from(value: LogicalType) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compact_names() {
        assert_eq!("int".parse::<LogicalType>().unwrap(), LogicalType::INTEGER);
        assert_eq!(
            "varchar(80)".parse::<LogicalType>().unwrap(),
            LogicalType::varchar(80)
        );
        assert_eq!(
            "CHAR( 15 )".parse::<LogicalType>().unwrap(),
            LogicalType::char(15)
        );
        assert_eq!(
            "numeric(10, 2)".parse::<LogicalType>().unwrap(),
            LogicalType::decimal(10, 2)
        );
        assert_eq!(
            "double precision".parse::<LogicalType>().unwrap(),
            LogicalType::Float
        );
        assert!("geometry".parse::<LogicalType>().is_err());
    }

    #[test]
    fn test_display_parses_back() {
        for ty in [
            LogicalType::SMALLINT,
            LogicalType::BIGINT,
            LogicalType::decimal(12, 4),
            LogicalType::text(),
            LogicalType::char(4),
            LogicalType::DateTime,
            LogicalType::Real,
            LogicalType::Binary {
                max_length: Some(16),
            },
        ] {
            assert_eq!(ty.to_string().parse::<LogicalType>().unwrap(), ty);
        }
    }

    #[test]
    fn test_check_rejects_impossible_types() {
        assert!(LogicalType::Integer { bytes: 3 }.check().is_err());
        assert!(LogicalType::decimal(4, 5).check().is_err());
        assert!(LogicalType::varchar(0).check().is_err());
        assert!(LogicalType::decimal(10, 2).check().is_ok());
    }

    #[test]
    fn test_integer_width_is_not_truncated() {
        assert!("INTEGER(260)".parse::<LogicalType>().is_err());
        let odd: LogicalType = "INTEGER(3)".parse().unwrap();
        assert!(odd.check().is_err());
        assert_eq!("INTEGER(8)".parse::<LogicalType>().unwrap(), LogicalType::BIGINT);
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&LogicalType::varchar(24)).unwrap();
        assert_eq!(json, "\"VARCHAR(24)\"");
        let back: LogicalType = serde_json::from_str("\"bigint\"").unwrap();
        assert_eq!(back, LogicalType::BIGINT);
    }
}
