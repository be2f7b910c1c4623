//! Applying planned DDL

use serde::{Deserialize, Serialize};

use super::ops::DdlOperation;
use crate::database::{ConnectionManager, DatabaseResult, DbConnection, Dialect};

/// The operation that stopped an apply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedOperation {
    pub operation: DdlOperation,
    pub statement: String,
    pub error: String,
}

/// What an apply left behind
///
/// In transactional mode a failure rolls everything back: `applied` is empty
/// and the operations that had run are listed in `rolled_back`. In sequential
/// mode `applied` operations stay applied, and the schema is partially
/// migrated until the `failed` and `pending` operations are dealt with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub applied: Vec<DdlOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<FailedOperation>,
    /// Operations never attempted
    #[serde(default)]
    pub pending: Vec<DdlOperation>,
    #[serde(default)]
    pub rolled_back: Vec<DdlOperation>,
    pub transactional: bool,
}

impl ApplyReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_none()
    }

    /// One-line description of the failure, if any
    pub fn failure_summary(&self) -> String {
        match &self.failed {
            None => "none".to_string(),
            Some(failed) => format!(
                "{} failed ({}); {} applied, {} rolled back, {} pending",
                failed.operation,
                failed.error,
                self.applied.len(),
                self.rolled_back.len(),
                self.pending.len()
            ),
        }
    }
}

/// Apply operations in order on one connection
///
/// Uses a single transaction when configured to (by default whenever the
/// dialect supports transactional DDL). A failing statement is never retried;
/// it stops the apply and is reported. Only acquisition and transaction
/// control failures are returned as errors.
pub async fn apply(
    manager: &ConnectionManager,
    operations: &[DdlOperation],
) -> DatabaseResult<ApplyReport> {
    let transactional = manager.config().use_transactional_ddl(manager.dialect());
    if operations.is_empty() {
        return Ok(ApplyReport {
            transactional,
            ..Default::default()
        });
    }

    let mut conn = manager.acquire().await?;
    if transactional {
        apply_in_transaction(&mut **conn, operations).await
    } else {
        Ok(apply_sequentially(&mut **conn, operations).await)
    }
}

async fn run_operation(
    conn: &mut dyn DbConnection,
    dialect: Dialect,
    operation: &DdlOperation,
) -> Result<(), FailedOperation> {
    if operation.is_destructive() {
        tracing::warn!("Applying destructive operation {}", operation);
    }
    let statement = dialect.render(operation);
    tracing::debug!("{}", statement);
    conn.batch_execute(&statement)
        .await
        .map_err(|e| FailedOperation {
            operation: operation.clone(),
            statement,
            error: e.to_string(),
        })
}

async fn apply_in_transaction(
    conn: &mut dyn DbConnection,
    operations: &[DdlOperation],
) -> DatabaseResult<ApplyReport> {
    let dialect = conn.dialect();
    conn.begin().await?;

    for (i, operation) in operations.iter().enumerate() {
        if let Err(failed) = run_operation(conn, dialect, operation).await {
            tracing::error!(
                "DDL failed, rolling back {} operations: {}",
                i,
                failed.error
            );
            conn.rollback().await?;
            return Ok(ApplyReport {
                applied: Vec::new(),
                failed: Some(failed),
                pending: operations[i + 1..].to_vec(),
                rolled_back: operations[..i].to_vec(),
                transactional: true,
            });
        }
    }

    conn.commit().await?;
    tracing::info!("Applied {} schema operations", operations.len());
    Ok(ApplyReport {
        applied: operations.to_vec(),
        transactional: true,
        ..Default::default()
    })
}

async fn apply_sequentially(conn: &mut dyn DbConnection, operations: &[DdlOperation]) -> ApplyReport {
    let dialect = conn.dialect();
    let mut report = ApplyReport::default();

    for (i, operation) in operations.iter().enumerate() {
        match run_operation(conn, dialect, operation).await {
            Ok(()) => report.applied.push(operation.clone()),
            Err(failed) => {
                tracing::error!(
                    "DDL failed after {} of {} operations, schema is partially migrated: {}",
                    i,
                    operations.len(),
                    failed.error
                );
                report.failed = Some(failed);
                report.pending = operations[i + 1..].to_vec();
                return report;
            }
        }
    }

    tracing::info!("Applied {} schema operations", operations.len());
    report
}
