//! Built-in schema definitions

use crate::models::{ColumnDefinition, IndexDefinition, LogicalType, SchemaModel, TableDefinition};

/// Table holding the status history of each run
pub const STATUS_HISTORY_TABLE: &str = "load_status_history";

/// Table holding one acknowledgement per committed batch
pub const BATCH_ACK_TABLE: &str = "load_batch_ack";

/// Schema of the tracker's own tables
///
/// Neither table carries secondary indices: DuckDB cannot alter a table
/// that has one, and the tracker only ever reads by primary key prefix.
pub fn load_tracking_schema() -> SchemaModel {
    SchemaModel::new("load_tracking")
        .with_table(status_history_table())
        .with_table(batch_ack_table())
}

pub fn status_history_table() -> TableDefinition {
    TableDefinition::new(STATUS_HISTORY_TABLE)
        .with_column(ColumnDefinition::new("run_id", LogicalType::varchar(64)).not_null())
        .with_column(ColumnDefinition::new("ordinal", LogicalType::BIGINT).not_null())
        .with_column(ColumnDefinition::new("status", LogicalType::varchar(16)).not_null())
        .with_column(ColumnDefinition::new("recorded_at", LogicalType::DateTime).not_null())
        .with_column(ColumnDefinition::new("detail", LogicalType::text()))
        .with_primary_key(&["run_id", "ordinal"])
        .with_description("Append-only status transitions per load run")
}

pub fn batch_ack_table() -> TableDefinition {
    TableDefinition::new(BATCH_ACK_TABLE)
        .with_column(ColumnDefinition::new("run_id", LogicalType::varchar(64)).not_null())
        .with_column(ColumnDefinition::new("batch_seq", LogicalType::BIGINT).not_null())
        .with_column(ColumnDefinition::new("table_name", LogicalType::varchar(128)).not_null())
        .with_column(ColumnDefinition::new("rows_inserted", LogicalType::BIGINT).not_null())
        .with_column(ColumnDefinition::new("rows_skipped", LogicalType::BIGINT).not_null())
        .with_column(ColumnDefinition::new("acked_at", LogicalType::DateTime).not_null())
        .with_primary_key(&["run_id", "batch_seq"])
        .with_description("Committed batches per load run")
}

/// The `pdbx_database_status_history` table of the `da_internal` database
///
/// Rows are replaced per entry: `entry_id` is the delete column used by
/// selective pre-load deletion.
pub fn status_history_schema() -> SchemaModel {
    let table = TableDefinition::new("pdbx_database_status_history")
        // unsigned 32-bit upstream
        .with_column(ColumnDefinition::new("ordinal", LogicalType::BIGINT).not_null())
        .with_column(ColumnDefinition::new("entry_id", LogicalType::char(15)).not_null())
        .with_column(ColumnDefinition::new("pdb_id", LogicalType::char(10)).not_null())
        .with_column(ColumnDefinition::new("date_begin", LogicalType::DateTime).not_null())
        .with_column(ColumnDefinition::new("date_end", LogicalType::DateTime).not_null())
        .with_column(ColumnDefinition::new("status_code_begin", LogicalType::varchar(24)).not_null())
        .with_column(ColumnDefinition::new("status_code_end", LogicalType::varchar(24)).not_null())
        .with_column(ColumnDefinition::new("annotator", LogicalType::varchar(10)).not_null())
        .with_column(ColumnDefinition::new("details", LogicalType::varchar(80)).not_null())
        .with_column(ColumnDefinition::new("delta_days", LogicalType::Float).not_null())
        .with_primary_key(&["ordinal", "entry_id"])
        .with_index(IndexDefinition::new("p1", &["ordinal", "entry_id"]).unique())
        .with_index(IndexDefinition::new("i1", &["entry_id"]))
        .with_index(IndexDefinition::new("i2", &["annotator"]))
        .with_index(IndexDefinition::new(
            "i3",
            &["entry_id", "status_code_begin", "status_code_end"],
        ))
        .with_delete_column("entry_id");

    SchemaModel::new("da_internal").with_table(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_schemas_validate() {
        assert!(load_tracking_schema().validate().is_ok());
        assert!(status_history_schema().validate().is_ok());
    }

    #[test]
    fn test_status_history_layout() {
        let model = status_history_schema();
        let table = model.table("pdbx_database_status_history").unwrap();
        assert_eq!(table.columns.len(), 10);
        assert_eq!(table.delete_column.as_deref(), Some("entry_id"));
        assert_eq!(table.indices.len(), 4);
        assert!(table.indices[0].unique);
    }

    #[test]
    fn test_tracking_tables_have_no_secondary_indices() {
        let model = load_tracking_schema();
        assert_eq!(model.table_names(), vec![STATUS_HISTORY_TABLE, BATCH_ACK_TABLE]);
        assert!(model.tables.iter().all(|t| t.indices.is_empty()));
    }
}
