//! Schema reconciliation
//!
//! Compares a [`SchemaModel`] with the live database and converges the two
//! with additive and widening DDL only. Anything that would need a
//! destructive change is reported as a [`SchemaDriftWarning`] instead.

pub mod apply;
pub mod live;
pub mod ops;
pub mod widening;

pub use apply::{ApplyReport, FailedOperation, apply};
pub use live::{LiveColumn, LiveIndex, LiveSchema, LiveTable, introspect};
pub use ops::{ColumnSpec, DdlOperation};
pub use widening::{is_narrowing, is_widening};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::database::{ConnectionManager, DatabaseError, Dialect};
use crate::models::{ColumnDefinition, SchemaModel, TableDefinition};
use crate::validation::SchemaError;

/// Why the reconciler declined to converge a difference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    /// Live column absent from the model
    ColumnRemoved,
    /// Model type is narrower than the live type
    Narrowing,
    /// Types differ and neither widens into the other
    IncompatibleType,
    /// Live native type has no logical counterpart
    UnrecognisedType,
    NullabilityChange,
    /// New NOT NULL column without a default was added as nullable
    RequiredColumnAddedNullable,
    PrimaryKeyMismatch,
    IndexDefinitionMismatch,
    /// Live index absent from the model
    IndexNotInModel,
}

impl fmt::Display for DriftKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriftKind::ColumnRemoved => "column removed",
            DriftKind::Narrowing => "narrowing",
            DriftKind::IncompatibleType => "incompatible type",
            DriftKind::UnrecognisedType => "unrecognised type",
            DriftKind::NullabilityChange => "nullability change",
            DriftKind::RequiredColumnAddedNullable => "required column added as nullable",
            DriftKind::PrimaryKeyMismatch => "primary key mismatch",
            DriftKind::IndexDefinitionMismatch => "index definition mismatch",
            DriftKind::IndexNotInModel => "index not in model",
        };
        f.write_str(name)
    }
}

/// A difference left for an operator to resolve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDriftWarning {
    pub table: String,
    /// Column or index the warning is about
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    pub kind: DriftKind,
    pub message: String,
}

impl SchemaDriftWarning {
    fn new(table: &str, object: Option<&str>, kind: DriftKind, message: String) -> Self {
        Self {
            table: table.to_string(),
            object: object.map(|o| o.to_string()),
            kind,
            message,
        }
    }
}

impl fmt::Display for SchemaDriftWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.object {
            Some(object) => write!(f, "{}.{}: {} ({})", self.table, object, self.kind, self.message),
            None => write!(f, "{}: {} ({})", self.table, self.kind, self.message),
        }
    }
}

/// Planned changes plus the differences that were not planned
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub operations: Vec<DdlOperation>,
    pub warnings: Vec<SchemaDriftWarning>,
}

impl Reconciliation {
    pub fn is_converged(&self) -> bool {
        self.operations.is_empty()
    }

    /// Render the planned operations as statements for `dialect`
    pub fn to_sql(&self, dialect: Dialect) -> Vec<String> {
        self.operations.iter().map(|op| dialect.render(op)).collect()
    }
}

/// Diff a model against a live snapshot
///
/// Tables are visited in model order. A missing table yields `CreateTable`
/// followed by `AddIndex` for each of its indices. For an existing table,
/// model-only columns yield `AddColumn`, proven widenings yield
/// `AlterColumnType`, model-only indices yield `AddIndex`, and everything
/// else that differs becomes a warning. Live tables absent from the model
/// are ignored.
pub fn reconcile(model: &SchemaModel, live: &LiveSchema, dialect: Dialect) -> Reconciliation {
    let mut plan = Reconciliation::default();
    for table in &model.tables {
        match live.table(&table.name) {
            None => create_table(table, dialect, &mut plan),
            Some(existing) => diff_table(table, existing, dialect, &mut plan),
        }
    }
    plan
}

fn create_table(table: &TableDefinition, dialect: Dialect, plan: &mut Reconciliation) {
    plan.operations.push(DdlOperation::CreateTable {
        table: table.name.clone(),
        columns: table
            .columns
            .iter()
            .map(|c| ColumnSpec::from_definition(c, dialect))
            .collect(),
        primary_key: table.primary_key.clone(),
    });
    for index in &table.indices {
        plan.operations.push(DdlOperation::AddIndex {
            table: table.name.clone(),
            index: index.name.clone(),
            columns: index.columns.clone(),
            unique: index.unique,
        });
    }
}

fn diff_table(
    table: &TableDefinition,
    live: &LiveTable,
    dialect: Dialect,
    plan: &mut Reconciliation,
) {
    for column in &table.columns {
        match live.column(&column.name) {
            None => add_column(table, column, dialect, plan),
            Some(existing) => diff_column(table, column, existing, dialect, plan),
        }
    }

    for existing in &live.columns {
        if table.column(&existing.name).is_none() {
            plan.warnings.push(SchemaDriftWarning::new(
                &table.name,
                Some(&existing.name),
                DriftKind::ColumnRemoved,
                format!(
                    "live column {} {} is not in the model and was left in place",
                    existing.name, existing.native_type
                ),
            ));
        }
    }

    if let Some(live_pk) = &live.primary_key
        && *live_pk != table.primary_key
    {
        plan.warnings.push(SchemaDriftWarning::new(
            &table.name,
            None,
            DriftKind::PrimaryKeyMismatch,
            format!(
                "live primary key ({}) differs from model ({})",
                live_pk.join(", "),
                table.primary_key.join(", ")
            ),
        ));
    }

    for index in &table.indices {
        match live.index(&index.name) {
            None => plan.operations.push(DdlOperation::AddIndex {
                table: table.name.clone(),
                index: index.name.clone(),
                columns: index.columns.clone(),
                unique: index.unique,
            }),
            Some(existing) => {
                // unparsed live definitions only match by name
                let columns_differ =
                    !existing.columns.is_empty() && existing.columns != index.columns;
                if columns_differ || existing.unique != index.unique {
                    plan.warnings.push(SchemaDriftWarning::new(
                        &table.name,
                        Some(&index.name),
                        DriftKind::IndexDefinitionMismatch,
                        format!(
                            "live {}index on ({}) differs from model {}index on ({})",
                            if existing.unique { "unique " } else { "" },
                            existing.columns.join(", "),
                            if index.unique { "unique " } else { "" },
                            index.columns.join(", ")
                        ),
                    ));
                }
            }
        }
    }

    for existing in &live.indices {
        if !table.indices.iter().any(|i| i.name == existing.name) {
            plan.warnings.push(SchemaDriftWarning::new(
                &table.name,
                Some(&existing.name),
                DriftKind::IndexNotInModel,
                "live index is not in the model and was left in place".to_string(),
            ));
        }
    }
}

fn add_column(
    table: &TableDefinition,
    column: &ColumnDefinition,
    dialect: Dialect,
    plan: &mut Reconciliation,
) {
    let mut spec = ColumnSpec::from_definition(column, dialect);
    if column.is_required() {
        // existing rows would have no value
        spec.nullable = true;
        plan.warnings.push(SchemaDriftWarning::new(
            &table.name,
            Some(&column.name),
            DriftKind::RequiredColumnAddedNullable,
            "NOT NULL column without a default was added as nullable".to_string(),
        ));
    }
    plan.operations.push(DdlOperation::AddColumn {
        table: table.name.clone(),
        column: spec,
    });
}

fn diff_column(
    table: &TableDefinition,
    column: &ColumnDefinition,
    live: &LiveColumn,
    dialect: Dialect,
    plan: &mut Reconciliation,
) {
    if live.nullable != column.nullable {
        plan.warnings.push(SchemaDriftWarning::new(
            &table.name,
            Some(&column.name),
            DriftKind::NullabilityChange,
            format!(
                "live column is {}, model declares {}",
                if live.nullable { "nullable" } else { "NOT NULL" },
                if column.nullable { "nullable" } else { "NOT NULL" }
            ),
        ));
    }

    if dialect.same_native(&live.native_type, &column.logical_type) {
        return;
    }

    let target = dialect.native_type(&column.logical_type);
    let Some(live_type) = dialect.parse_native(&live.native_type) else {
        plan.warnings.push(SchemaDriftWarning::new(
            &table.name,
            Some(&column.name),
            DriftKind::UnrecognisedType,
            format!("live type {} cannot be compared with {}", live.native_type, target),
        ));
        return;
    };

    if is_widening(&live_type, &column.logical_type) {
        plan.operations.push(DdlOperation::AlterColumnType {
            table: table.name.clone(),
            column: column.name.clone(),
            from: live.native_type.clone(),
            native_type: target,
            nullable: live.nullable,
        });
        return;
    }

    let kind = if is_narrowing(&live_type, &column.logical_type) {
        DriftKind::Narrowing
    } else {
        DriftKind::IncompatibleType
    };
    plan.warnings.push(SchemaDriftWarning::new(
        &table.name,
        Some(&column.name),
        kind,
        format!("live type {} would have to become {}", live.native_type, target),
    ));
}

/// Errors from [`Reconciler::run`]
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Invalid schema model: {0}")]
    InvalidModel(#[from] SchemaError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// Applying stopped partway; the outcome says what was left behind
    #[error("Schema apply failed: {}", .0.report.failure_summary())]
    ApplyFailed(Box<ReconcileOutcome>),
}

/// Result of introspect, reconcile and apply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub reconciliation: Reconciliation,
    pub report: ApplyReport,
}

/// Introspects, diffs and applies against one backend
#[derive(Clone)]
pub struct Reconciler {
    manager: ConnectionManager,
}

impl Reconciler {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    /// Snapshot the live definition of the model's tables
    pub async fn introspect(&self, model: &SchemaModel) -> Result<LiveSchema, DatabaseError> {
        let mut conn = self.manager.acquire().await?;
        introspect(&mut **conn, &model.table_names()).await
    }

    /// Compute the plan without applying it
    pub async fn plan(&self, model: &SchemaModel) -> Result<Reconciliation, ReconcileError> {
        model.validate()?;
        let live = self.introspect(model).await?;
        Ok(reconcile(model, &live, self.manager.dialect()))
    }

    /// Converge the database with the model
    ///
    /// Drift warnings are logged and returned; they never fail the run.
    pub async fn run(&self, model: Arc<SchemaModel>) -> Result<ReconcileOutcome, ReconcileError> {
        let reconciliation = self.plan(&model).await?;
        for warning in &reconciliation.warnings {
            tracing::warn!("Schema drift: {}", warning);
        }
        if reconciliation.is_converged() {
            tracing::info!(
                "Schema {} already matches {} tables",
                model.database,
                model.tables.len()
            );
        }

        let report = apply(&self.manager, &reconciliation.operations).await?;
        let outcome = ReconcileOutcome {
            reconciliation,
            report,
        };
        if outcome.report.is_complete() {
            Ok(outcome)
        } else {
            Err(ReconcileError::ApplyFailed(Box::new(outcome)))
        }
    }
}
