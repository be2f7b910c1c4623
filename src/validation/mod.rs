//! Validation functionality
//!
//! Provides validation logic for:
//! - Input validation and identifier quoting
//! - Table definition validation (keys, indices, types, defaults)

pub mod input;
pub mod tables;

pub use input::{
    ValidationError, sanitize_sql_identifier, validate_column_name, validate_index_name,
    validate_table_name,
};
pub use tables::{SchemaError, TableValidator};
