//! One schema synchronization run: introspect the live schema, plan against
//! the metadata graph and apply the plan on a single session.
//!
//! Where the dialect has transactional DDL every step runs inside its own
//! savepoint of one transaction. When a step fails the already applied steps
//! are undone by executing their inverse operations in reverse order, then the
//! transaction is rolled back and the failure is returned. A step that stopped
//! partway on a dialect without transactional DDL is undone too.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{info, warn};

use crate::bookkeeping;
use crate::diff::{desired_schema, plan_changes, DiffOptions, MigrationOp, MigrationPlan, PlannedOp};
use crate::dialect::SchemaDriver;
use crate::metadata::MetadataGraph;
use crate::model::Schema;
use crate::util::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Plan and render without touching the database.
    pub dry_run: bool,
    pub drop_unknown_tables: bool,
}

impl SyncOptions {
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn drop_unknown_tables(mut self, drop: bool) -> Self {
        self.drop_unknown_tables = drop;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub plan: MigrationPlan,
    pub statements: Vec<String>,
    pub applied: bool,
}

/// Loads the current snapshot of every table the run may touch. Bookkeeping
/// tables are left out.
pub async fn load_current_schema(driver: &mut dyn SchemaDriver) -> Result<Schema> {
    let reserved = bookkeeping::reserved_tables(driver.dialect());
    let names = user_tables(driver.load_table_names().await?, &reserved);
    driver.load_schema(&names).await
}

fn user_tables(names: Vec<String>, reserved: &HashSet<String>) -> Vec<String> {
    names.into_iter().filter(|n| !reserved.contains(n)).collect()
}

/// Plans the changes needed to bring the database in line with `graph`.
pub async fn plan_sync(
    driver: &mut dyn SchemaDriver,
    graph: &MetadataGraph,
    options: &SyncOptions,
) -> Result<MigrationPlan> {
    let current = load_current_schema(driver).await?;
    let dialect = driver.dialect();
    let desired = desired_schema(graph, dialect);
    let diff_options = DiffOptions {
        drop_unknown_tables: options.drop_unknown_tables,
        reserved_tables: bookkeeping::reserved_tables(dialect),
    };
    Ok(plan_changes(&current, &desired, dialect, &diff_options)?)
}

pub async fn synchronize(
    driver: &mut dyn SchemaDriver,
    graph: &MetadataGraph,
    options: &SyncOptions,
) -> Result<SyncReport> {
    if !options.dry_run {
        bookkeeping::ensure_tables(driver).await?;
    }
    let plan = plan_sync(driver, graph, options).await?;
    let statements = plan.up_sql(driver.dialect())?;

    if options.dry_run || plan.is_empty() {
        return Ok(SyncReport {
            plan,
            statements,
            applied: false,
        });
    }

    execute_plan(driver, &plan).await?;
    info!(steps = plan.len(), statements = statements.len(), "schema synchronized");
    Ok(SyncReport {
        plan,
        statements,
        applied: true,
    })
}

/// Applies every step of `plan`, undoing the applied ones on failure.
pub async fn execute_plan(driver: &mut dyn SchemaDriver, plan: &MigrationPlan) -> Result<()> {
    let transactional = driver.dialect().capabilities().transactional_ddl;
    if transactional {
        driver.begin().await?;
    }

    for (index, planned) in plan.steps.iter().enumerate() {
        let savepoint = transactional.then(|| format!("ormold_step_{index}"));
        if let Err(err) = apply_step(driver, &planned.up, savepoint.as_deref()).await {
            // Without transactional DDL the statements a failed step already
            // ran stay behind, so that step is undone as well.
            let partial = !transactional && matches!(err, Error::PartialApply { .. });
            let executed = &plan.steps[..index + usize::from(partial)];
            let rollback_failures =
                undo_applied(driver, executed, savepoint.as_deref(), transactional).await;
            return Err(Error::Apply {
                step: index + 1,
                operation: planned.up.kind().to_string(),
                table: planned.up.table_name().to_string(),
                message: err.to_string(),
                rollback_failures,
            });
        }
    }

    if transactional {
        driver.commit().await?;
    }
    Ok(())
}

async fn apply_step(
    driver: &mut dyn SchemaDriver,
    op: &MigrationOp,
    savepoint: Option<&str>,
) -> Result<()> {
    if let Some(name) = savepoint {
        driver.savepoint(name).await?;
    }
    driver.apply(op).await?;
    if let Some(name) = savepoint {
        driver.release_savepoint(name).await?;
    }
    Ok(())
}

/// Returns the failures met while undoing; an empty list means the database
/// is back where the run started.
async fn undo_applied(
    driver: &mut dyn SchemaDriver,
    executed: &[PlannedOp],
    savepoint: Option<&str>,
    transactional: bool,
) -> Vec<String> {
    let mut failures = Vec::new();
    if let Some(name) = savepoint {
        if let Err(err) = driver.rollback_to_savepoint(name).await {
            failures.push(format!("rollback to savepoint {name}: {err}"));
        }
    }
    for planned in executed.iter().rev() {
        if let Err(err) = driver.apply(&planned.down).await {
            warn!(operation = %planned.down, error = %err, "inverse operation failed");
            failures.push(format!("{}: {err}", planned.down));
        }
    }
    if transactional && driver.in_transaction() {
        if let Err(err) = driver.rollback().await {
            failures.push(format!("rollback: {err}"));
        }
    }
    warn!(
        undone = executed.len(),
        failures = failures.len(),
        "schema synchronization rolled back"
    );
    failures
}
