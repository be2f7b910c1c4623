//! Identifier validation and quoting.
//!
//! Table, column and index names end up inside generated SQL. They are always
//! quoted, and additionally restricted to a conservative character set so a
//! model file cannot smuggle statement text into DDL.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::database::Dialect;

/// Maximum length for any identifier
pub const MAX_IDENTIFIER_LENGTH: usize = 255;

/// Errors that can occur during input validation.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum ValidationError {
    /// Input is empty when a value is required
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    /// Input exceeds maximum allowed length
    #[error("{field} exceeds maximum length (max: {max}, got: {actual})")]
    TooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },

    /// Input contains invalid characters
    #[error("{field} contains invalid characters: {reason}")]
    InvalidCharacters { field: &'static str, reason: String },

    /// Input has invalid format
    #[error("{0}: {1}")]
    InvalidFormat(&'static str, String),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

fn validate_identifier(field: &'static str, name: &str) -> ValidationResult<()> {
    let Some(first_char) = name.chars().next() else {
        return Err(ValidationError::Empty(field));
    };

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::TooLong {
            field,
            max: MAX_IDENTIFIER_LENGTH,
            actual: name.len(),
        });
    }

    if !first_char.is_alphabetic() && first_char != '_' {
        return Err(ValidationError::InvalidFormat(
            field,
            "must start with a letter or underscore".to_string(),
        ));
    }

    for c in name.chars() {
        if !c.is_alphanumeric() && c != '_' && c != '-' {
            return Err(ValidationError::InvalidCharacters {
                field,
                reason: format!("invalid character: '{}'", c),
            });
        }
    }

    Ok(())
}

/// Validate a table name.
///
/// # Rules
///
/// - Must not be empty
/// - Must not exceed 255 characters
/// - Must start with a letter or underscore
/// - May contain letters, digits, underscores, and hyphens
///
/// Reserved words are allowed because identifiers are always quoted.
///
/// # Examples
///
/// ```
/// use pdbx_db_loader::validation::input::validate_table_name;
///
/// assert!(validate_table_name("pdbx_database_status_history").is_ok());
/// assert!(validate_table_name("order").is_ok());
/// assert!(validate_table_name("").is_err());
/// assert!(validate_table_name("1abc").is_err());
/// ```
pub fn validate_table_name(name: &str) -> ValidationResult<()> {
    validate_identifier("table name", name)
}

/// Validate a column name. Same rules as [`validate_table_name`].
///
/// ```
/// use pdbx_db_loader::validation::input::validate_column_name;
///
/// assert!(validate_column_name("entry_id").is_ok());
/// assert!(validate_column_name("x; DROP TABLE y").is_err());
/// ```
pub fn validate_column_name(name: &str) -> ValidationResult<()> {
    validate_identifier("column name", name)
}

/// Validate an index name. Same rules as [`validate_table_name`].
pub fn validate_index_name(name: &str) -> ValidationResult<()> {
    validate_identifier("index name", name)
}

/// Quote a SQL identifier for the given dialect.
///
/// Embedded quote characters are doubled.
///
/// # Examples
///
/// ```
/// use pdbx_db_loader::database::Dialect;
/// use pdbx_db_loader::validation::input::sanitize_sql_identifier;
///
/// assert_eq!(sanitize_sql_identifier("entry", Dialect::Postgres), "\"entry\"");
/// assert_eq!(sanitize_sql_identifier("entry", Dialect::MySql), "`entry`");
/// ```
pub fn sanitize_sql_identifier(name: &str, dialect: Dialect) -> String {
    let quote_char = match dialect {
        Dialect::MySql => '`',
        Dialect::DuckDb | Dialect::Postgres => '"',
    };

    let escaped = name.replace(quote_char, &format!("{}{}", quote_char, quote_char));
    format!("{}{}{}", quote_char, escaped, quote_char)
}
