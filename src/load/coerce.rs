//! Value coercion from raw record values to typed SQL values

use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::batch::Row;
use crate::database::SqlValue;
use crate::database::config::TextOverflow;
use crate::models::{ColumnDefinition, DefaultValue, LogicalType, TableDefinition};

static RE_DECIMAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([+-]?)(\d*)(?:\.(\d*))?(?:[eE]([+-]?\d+))?$").expect("Invalid regex"));

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Why a row was rejected
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum CoercionError {
    #[error("column {0} is not part of the table")]
    UnknownColumn(String),

    #[error("column {0} requires a value")]
    MissingRequired(String),

    #[error("{column}: cannot read {value} as {expected}")]
    InvalidValue {
        column: String,
        value: String,
        expected: String,
    },

    #[error("{column}: {value} is out of range for {expected}")]
    OutOfRange {
        column: String,
        value: String,
        expected: String,
    },

    #[error("{column}: length {length} exceeds limit {limit}")]
    TooLong {
        column: String,
        length: usize,
        limit: u32,
    },
}

impl CoercionError {
    /// Column the error concerns
    pub fn column(&self) -> &str {
        match self {
            CoercionError::UnknownColumn(column) | CoercionError::MissingRequired(column) => column,
            CoercionError::InvalidValue { column, .. }
            | CoercionError::OutOfRange { column, .. }
            | CoercionError::TooLong { column, .. } => column,
        }
    }
}

/// A coerced row in table column order
#[derive(Debug, Clone, PartialEq)]
pub struct CoercedRow {
    pub values: Vec<SqlValue>,
    /// Columns whose text was truncated
    pub truncated: Vec<String>,
}

/// JSON null and the mmCIF markers `?` (unknown) and `.` (inapplicable)
pub fn is_null_marker(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => matches!(s.trim(), "?" | "."),
        _ => false,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s),
        other => other.to_string(),
    }
}

fn invalid(column: &ColumnDefinition, value: &Value) -> CoercionError {
    CoercionError::InvalidValue {
        column: column.name.clone(),
        value: display(value),
        expected: column.logical_type.to_string(),
    }
}

fn out_of_range(column: &ColumnDefinition, value: &Value) -> CoercionError {
    CoercionError::OutOfRange {
        column: column.name.clone(),
        value: display(value),
        expected: column.logical_type.to_string(),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn coerce_integer(column: &ColumnDefinition, value: &Value, bytes: u8) -> Result<i64, CoercionError> {
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < 9.2e18).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
    .ok_or_else(|| invalid(column, value))?;

    let in_range = match bytes {
        2 => i16::try_from(parsed).is_ok(),
        4 => i32::try_from(parsed).is_ok(),
        _ => true,
    };
    if in_range {
        Ok(parsed)
    } else {
        Err(out_of_range(column, value))
    }
}

fn coerce_decimal(
    column: &ColumnDefinition,
    value: &Value,
    precision: u32,
    scale: u32,
) -> Result<String, CoercionError> {
    let text = scalar_text(value)
        .filter(|_| !value.is_boolean())
        .ok_or_else(|| invalid(column, value))?;

    let caps = RE_DECIMAL
        .captures(text.trim())
        .ok_or_else(|| invalid(column, value))?;
    let int_raw = caps.get(2).map_or("", |m| m.as_str());
    let frac_raw = caps.get(3).map_or("", |m| m.as_str());
    if int_raw.is_empty() && frac_raw.is_empty() {
        return Err(invalid(column, value));
    }
    let exponent: i64 = match caps.get(4) {
        Some(m) => m.as_str().parse().map_err(|_| out_of_range(column, value))?,
        None => 0,
    };
    let int_limit = precision
        .checked_sub(scale)
        .ok_or_else(|| out_of_range(column, value))? as i64;

    // significant digits with the decimal point `point` digits from the left
    let digits = format!("{}{}", int_raw, frac_raw);
    let significant = digits.trim_start_matches('0');
    let point = (int_raw.len() as i64)
        .saturating_add(exponent)
        .saturating_sub((digits.len() - significant.len()) as i64);
    let significant = significant.trim_end_matches('0');
    if significant.is_empty() {
        return Ok("0".to_string());
    }

    let int_len = point.max(0);
    let frac_len = (significant.len() as i64).saturating_sub(point).max(0);
    if int_len > int_limit || frac_len > scale as i64 {
        return Err(out_of_range(column, value));
    }

    let (int_part, frac_part) = if point <= 0 {
        ("0".to_string(), format!("{}{}", "0".repeat(-point as usize), significant))
    } else if point as usize >= significant.len() {
        (
            format!("{}{}", significant, "0".repeat(point as usize - significant.len())),
            String::new(),
        )
    } else {
        let (i, f) = significant.split_at(point as usize);
        (i.to_string(), f.to_string())
    };
    let sign = if caps.get(1).is_some_and(|m| m.as_str() == "-") {
        "-"
    } else {
        ""
    };
    Ok(if frac_part.is_empty() {
        format!("{}{}", sign, int_part)
    } else {
        format!("{}{}.{}", sign, int_part, frac_part)
    })
}

fn coerce_text(
    column: &ColumnDefinition,
    value: &Value,
    limit: Option<u32>,
    overflow: TextOverflow,
) -> Result<(String, bool), CoercionError> {
    let text = scalar_text(value).ok_or_else(|| invalid(column, value))?;
    let Some(limit) = limit else {
        return Ok((text, false));
    };

    let length = text.chars().count();
    if length <= limit as usize {
        return Ok((text, false));
    }
    match overflow {
        TextOverflow::Reject => Err(CoercionError::TooLong {
            column: column.name.clone(),
            length,
            limit,
        }),
        TextOverflow::Truncate => {
            tracing::debug!(
                "Truncating {} from {} to {} characters",
                column.name,
                length,
                limit
            );
            Ok((text.chars().take(limit as usize).collect(), true))
        }
    }
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.with_timezone(&Utc).naive_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn decode_binary(text: &str) -> Option<Vec<u8>> {
    let trimmed = text.trim();
    if trimmed.starts_with("\\x") {
        let hex: String = trimmed.replace("\\x", "");
        if hex.len() % 2 != 0 {
            return None;
        }
        (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
            .collect()
    } else {
        base64::engine::general_purpose::STANDARD.decode(trimmed).ok()
    }
}

/// Coerce one non-null raw value to a column's type
///
/// Returns the value and whether it was truncated.
pub fn coerce_value(
    column: &ColumnDefinition,
    value: &Value,
    overflow: TextOverflow,
) -> Result<(SqlValue, bool), CoercionError> {
    if is_null_marker(value) {
        return Ok((SqlValue::Null, false));
    }

    let coerced = match column.logical_type {
        LogicalType::Integer { bytes } => SqlValue::Int(coerce_integer(column, value, bytes)?),
        LogicalType::Decimal { precision, scale } => {
            SqlValue::Decimal(coerce_decimal(column, value, precision, scale)?)
        }
        LogicalType::Float => {
            let f = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }
            .filter(|f| f.is_finite())
            .ok_or_else(|| invalid(column, value))?;
            SqlValue::Float(f)
        }
        LogicalType::Real => {
            let f = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }
            .filter(|f| f.is_finite())
            .ok_or_else(|| invalid(column, value))?;
            if f.abs() > f64::from(f32::MAX) {
                return Err(out_of_range(column, value));
            }
            SqlValue::Float(f)
        }
        LogicalType::Text { max_length } => {
            let (text, truncated) = coerce_text(column, value, max_length, overflow)?;
            return Ok((SqlValue::Text(text), truncated));
        }
        LogicalType::FixedText { length } => {
            let (text, truncated) = coerce_text(column, value, Some(length), overflow)?;
            return Ok((SqlValue::Text(text), truncated));
        }
        LogicalType::Date => {
            let text = value.as_str().ok_or_else(|| invalid(column, value))?;
            let date = NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
                .ok()
                .or_else(|| parse_datetime(text).map(|dt| dt.date()))
                .ok_or_else(|| invalid(column, value))?;
            SqlValue::Date(date)
        }
        LogicalType::DateTime => {
            let text = value.as_str().ok_or_else(|| invalid(column, value))?;
            SqlValue::DateTime(parse_datetime(text).ok_or_else(|| invalid(column, value))?)
        }
        LogicalType::Binary { max_length } => {
            let bytes = value
                .as_str()
                .and_then(decode_binary)
                .ok_or_else(|| invalid(column, value))?;
            if let Some(limit) = max_length
                && bytes.len() > limit as usize
            {
                return Err(CoercionError::TooLong {
                    column: column.name.clone(),
                    length: bytes.len(),
                    limit,
                });
            }
            SqlValue::Bytes(bytes)
        }
    };
    Ok((coerced, false))
}

fn default_value(column: &ColumnDefinition, default: &DefaultValue) -> Result<SqlValue, CoercionError> {
    let raw = match default {
        DefaultValue::Text(s) if s.eq_ignore_ascii_case("CURRENT_TIMESTAMP") => {
            return Ok(SqlValue::DateTime(Utc::now().naive_utc()));
        }
        DefaultValue::Integer(i) => Value::from(*i),
        DefaultValue::Float(f) => Value::from(*f),
        DefaultValue::Text(s) => Value::from(s.as_str()),
    };
    coerce_value(column, &raw, TextOverflow::Reject).map(|(v, _)| v)
}

/// Coerce a row against a table definition
///
/// Missing and null values fall back to the column default; a required
/// column without either rejects the row, as does any unknown column.
pub fn coerce_row(
    table: &TableDefinition,
    row: &Row,
    overflow: TextOverflow,
) -> Result<CoercedRow, CoercionError> {
    if let Some(unknown) = row.keys().find(|k| table.column(k).is_none()) {
        return Err(CoercionError::UnknownColumn(unknown.clone()));
    }

    let mut coerced = CoercedRow {
        values: Vec::with_capacity(table.columns.len()),
        truncated: Vec::new(),
    };
    for column in &table.columns {
        let (value, truncated) = match row.get(&column.name) {
            Some(raw) => coerce_value(column, raw, overflow)?,
            None => (SqlValue::Null, false),
        };
        let value = match (value, &column.default) {
            (SqlValue::Null, Some(default)) => default_value(column, default)?,
            (SqlValue::Null, None) if !column.nullable => {
                return Err(CoercionError::MissingRequired(column.name.clone()));
            }
            (value, _) => value,
        };
        if truncated {
            coerced.truncated.push(column.name.clone());
        }
        coerced.values.push(value);
    }
    Ok(coerced)
}
