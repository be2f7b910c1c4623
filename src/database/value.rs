//! Typed statement parameters

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

use super::Dialect;

/// A coerced value bound to a statement placeholder
///
/// Backends bind every parameter as text and the generated SQL casts it to
/// the column's native type, so each variant has one canonical text form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    Null,
    Int(i64),
    Float(f64),
    /// Decimal digits kept as text to avoid binary rounding
    Decimal(String),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Bytes(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Text form bound to the placeholder; `None` binds SQL NULL
    pub fn to_param_text(&self, dialect: Dialect) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Int(v) => Some(v.to_string()),
            SqlValue::Float(v) => Some(v.to_string()),
            SqlValue::Decimal(s) | SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            SqlValue::DateTime(dt) => Some(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            SqlValue::Bytes(bytes) => Some(bytes_literal(bytes, dialect)),
        }
    }

    /// Key used to compare primary key values across rows and query results
    pub fn key_text(&self) -> String {
        match self {
            SqlValue::Null => "\u{0}".to_string(),
            SqlValue::Decimal(s) => normalize_decimal(s),
            SqlValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            SqlValue::Bytes(bytes) => bytes_literal(bytes, Dialect::Postgres),
            other => other.to_param_text(Dialect::Postgres).unwrap_or_default(),
        }
    }
}

/// Escape bytes in the form the dialect's text-to-binary cast understands
fn bytes_literal(bytes: &[u8], dialect: Dialect) -> String {
    let mut out = String::with_capacity(bytes.len() * 4 + 2);
    match dialect {
        // DuckDB reads `\xAB` escapes byte by byte
        Dialect::DuckDb => {
            for b in bytes {
                let _ = write!(out, "\\x{:02X}", b);
            }
        }
        Dialect::Postgres | Dialect::MySql => {
            out.push_str("\\x");
            for b in bytes {
                let _ = write!(out, "{:02x}", b);
            }
        }
    }
    out
}

/// Strip insignificant zeros so `1.50` and `1.5` compare equal
pub(crate) fn normalize_decimal(s: &str) -> String {
    let s = s.trim();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", s.strip_prefix('+').unwrap_or(s)),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    let int_part = int_part.trim_start_matches('0');
    let frac_part = frac_part.trim_end_matches('0');
    let int_part = if int_part.is_empty() { "0" } else { int_part };
    let body = if frac_part.is_empty() {
        int_part.to_string()
    } else {
        format!("{}.{}", int_part, frac_part)
    };
    if body == "0" {
        body
    } else {
        format!("{}{}", sign, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_text() {
        assert_eq!(SqlValue::Null.to_param_text(Dialect::DuckDb), None);
        assert_eq!(
            SqlValue::Int(-4).to_param_text(Dialect::DuckDb),
            Some("-4".to_string())
        );
        let dt = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(13, 5, 0)
            .unwrap();
        assert_eq!(
            SqlValue::DateTime(dt).to_param_text(Dialect::Postgres),
            Some("2024-02-29 13:05:00".to_string())
        );
    }

    #[test]
    fn test_bytes_per_dialect() {
        let v = SqlValue::Bytes(vec![0x01, 0xab]);
        assert_eq!(
            v.to_param_text(Dialect::DuckDb),
            Some("\\x01\\xAB".to_string())
        );
        assert_eq!(
            v.to_param_text(Dialect::Postgres),
            Some("\\x01ab".to_string())
        );
    }

    #[test]
    fn test_decimal_key_normalization() {
        assert_eq!(normalize_decimal("001.500"), "1.5");
        assert_eq!(normalize_decimal("-0.0"), "0");
        assert_eq!(normalize_decimal("+12"), "12");
        assert_eq!(
            SqlValue::Decimal("3.10".into()).key_text(),
            SqlValue::Decimal("3.1".into()).key_text()
        );
    }
}
