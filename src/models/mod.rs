//! Schema model types
//!
//! A dialect-neutral description of tables, columns, keys and indices.
//! Nothing here performs I/O beyond reading model files.

pub mod column;
pub mod schema;
pub mod table;
pub mod types;

pub use column::{ColumnDefinition, DefaultValue};
pub use schema::SchemaModel;
pub use table::{IndexDefinition, TableDefinition};
pub use types::LogicalType;
