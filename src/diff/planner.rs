use std::collections::{BTreeMap, HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::Serialize;
use tracing::{debug, info};

use super::{compute_diff, DiffOptions, MigrationOp};
use crate::dialect::{render_ops, Capabilities, Dialect};
use crate::model::Schema;
use crate::util::PlanError;

/// A forward operation paired with the operation that undoes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedOp {
    pub up: MigrationOp,
    pub down: MigrationOp,
}

impl From<MigrationOp> for PlannedOp {
    fn from(up: MigrationOp) -> Self {
        let down = up.inverse();
        Self { up, down }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationPlan {
    pub steps: Vec<PlannedOp>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn forward(&self) -> impl Iterator<Item = &MigrationOp> {
        self.steps.iter().map(|s| &s.up)
    }

    /// Inverse operations in the order that undoes the whole plan.
    pub fn rollback(&self) -> Vec<MigrationOp> {
        self.steps.iter().rev().map(|s| s.down.clone()).collect()
    }

    pub fn up_sql(&self, dialect: &dyn Dialect) -> Result<Vec<String>, PlanError> {
        render_ops(dialect, self.forward())
    }

    pub fn down_sql(&self, dialect: &dyn Dialect) -> Result<Vec<String>, PlanError> {
        let rollback = self.rollback();
        render_ops(dialect, rollback.iter())
    }

    /// Operation counts by kind.
    pub fn summary(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for op in self.forward() {
            *counts.entry(op.kind()).or_insert(0) += 1;
        }
        counts
    }
}

/// Fails before any DDL exists when the desired schema needs something the
/// dialect cannot express.
pub fn check_supported(
    desired: &Schema,
    capabilities: &Capabilities,
    dialect: &str,
) -> Result<(), PlanError> {
    for table in desired.tables.values() {
        if !table.exclusions.is_empty() && !capabilities.exclusion_constraints {
            return Err(PlanError::unsupported(&table.name, "exclusion constraint", dialect));
        }
        if !table.uniques.is_empty() && !capabilities.unique_constraints {
            return Err(PlanError::unsupported(&table.name, "unique constraint", dialect));
        }
        if !table.checks.is_empty() && !capabilities.check_constraints {
            return Err(PlanError::unsupported(&table.name, "check constraint", dialect));
        }
        if table.indexes.iter().any(|i| i.where_clause.is_some()) && !capabilities.partial_indexes {
            return Err(PlanError::unsupported(&table.name, "partial index", dialect));
        }
    }
    Ok(())
}

/// Plans the reversible operations turning `current` into `desired`.
pub fn plan_changes(
    current: &Schema,
    desired: &Schema,
    dialect: &dyn Dialect,
    options: &DiffOptions,
) -> Result<MigrationPlan, PlanError> {
    let current = dialect.normalize_schema(current.clone());
    let desired = dialect.normalize_schema(desired.clone());
    let capabilities = dialect.capabilities();
    check_supported(&desired, &capabilities, dialect.name())?;

    let ops = plan_migration(compute_diff(&current, &desired, &capabilities, options));
    for op in &ops {
        dialect.render(op)?;
        dialect.render(&op.inverse())?;
    }

    let plan = MigrationPlan {
        steps: ops.into_iter().map(PlannedOp::from).collect(),
    };
    if plan.is_empty() {
        debug!(dialect = dialect.name(), "schema is up to date");
    } else {
        info!(dialect = dialect.name(), steps = plan.len(), summary = ?plan.summary(), "planned schema changes");
    }
    Ok(plan)
}

/// Orders operations into phases: everything that removes dependencies runs
/// before what it depends on is dropped, and every object exists before
/// anything referencing it is created.
pub fn plan_migration(ops: Vec<MigrationOp>) -> Vec<MigrationOp> {
    let mut drop_views = Vec::new();
    let mut drop_foreign_keys = Vec::new();
    let mut drop_table_elements = Vec::new();
    let mut drop_primary_keys = Vec::new();
    let mut drop_columns = Vec::new();
    let mut drop_tables = Vec::new();
    let mut create_tables = Vec::new();
    let mut add_columns = Vec::new();
    let mut alter_columns = Vec::new();
    let mut add_primary_keys = Vec::new();
    let mut add_table_elements = Vec::new();
    let mut add_foreign_keys = Vec::new();
    let mut create_views = Vec::new();

    for op in ops {
        match op {
            MigrationOp::DropView(_) => drop_views.push(op),
            MigrationOp::DropForeignKey { .. } => drop_foreign_keys.push(op),
            MigrationOp::DropIndex { .. }
            | MigrationOp::DropUnique { .. }
            | MigrationOp::DropCheck { .. }
            | MigrationOp::DropExclusion { .. } => drop_table_elements.push(op),
            MigrationOp::DropPrimaryKey { .. } => drop_primary_keys.push(op),
            MigrationOp::DropColumn { .. } => drop_columns.push(op),
            MigrationOp::DropTable(_) => drop_tables.push(op),
            MigrationOp::CreateTable(_) => create_tables.push(op),
            MigrationOp::AddColumn { .. } => add_columns.push(op),
            MigrationOp::AlterColumn { .. } => alter_columns.push(op),
            MigrationOp::AddPrimaryKey { .. } => add_primary_keys.push(op),
            MigrationOp::AddUnique { .. }
            | MigrationOp::AddCheck { .. }
            | MigrationOp::AddExclusion { .. }
            | MigrationOp::AddIndex { .. } => add_table_elements.push(op),
            MigrationOp::AddForeignKey { .. } => add_foreign_keys.push(op),
            MigrationOp::CreateView(_) => create_views.push(op),
        }
    }

    let create_tables = order_table_creates(create_tables, &add_foreign_keys);
    let drop_tables = order_table_drops(drop_tables, &drop_foreign_keys);

    let mut result = Vec::new();
    result.extend(drop_views);
    result.extend(drop_foreign_keys);
    result.extend(drop_table_elements);
    result.extend(drop_primary_keys);
    result.extend(drop_columns);
    result.extend(drop_tables);
    result.extend(create_tables);
    result.extend(add_columns);
    result.extend(alter_columns);
    result.extend(add_primary_keys);
    result.extend(add_table_elements);
    result.extend(add_foreign_keys);
    result.extend(create_views);
    result
}

/// (referencing table, referenced table) pairs from foreign key operations.
fn foreign_key_edges(ops: &[MigrationOp]) -> Vec<(String, String)> {
    ops.iter()
        .filter_map(|op| match op {
            MigrationOp::AddForeignKey { table, foreign_key }
            | MigrationOp::DropForeignKey { table, foreign_key } => {
                Some((table.clone(), foreign_key.referenced_table.clone()))
            }
            _ => None,
        })
        .collect()
}

/// Referenced tables are created first.
fn order_table_creates(ops: Vec<MigrationOp>, foreign_keys: &[MigrationOp]) -> Vec<MigrationOp> {
    let edges = foreign_key_edges(foreign_keys)
        .into_iter()
        .map(|(referencing, referenced)| (referenced, referencing))
        .collect::<Vec<_>>();
    topological_sort(ops, &edges)
}

/// Referencing tables are dropped first.
fn order_table_drops(ops: Vec<MigrationOp>, foreign_keys: &[MigrationOp]) -> Vec<MigrationOp> {
    topological_sort(ops, &foreign_key_edges(foreign_keys))
}

/// Sorts table operations so that for every (before, after) edge between two
/// tables in `ops`, `before` comes first. Self references are ignored; on a
/// cycle the original order is kept.
fn topological_sort(ops: Vec<MigrationOp>, edges: &[(String, String)]) -> Vec<MigrationOp> {
    if ops.len() < 2 {
        return ops;
    }
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let mut nodes = HashMap::new();
    for (i, op) in ops.iter().enumerate() {
        nodes.insert(op.table_name().to_string(), graph.add_node(i));
    }
    let mut seen = HashSet::new();
    for (before, after) in edges {
        if before == after || !seen.insert((before, after)) {
            continue;
        }
        if let (Some(&from), Some(&to)) = (nodes.get(before), nodes.get(after)) {
            graph.add_edge(from, to, ());
        }
    }

    match toposort(&graph, None) {
        Ok(order) => {
            let mut slots: Vec<Option<MigrationOp>> = ops.into_iter().map(Some).collect();
            order
                .into_iter()
                .filter_map(|node| slots[graph[node]].take())
                .collect()
        }
        Err(cycle) => {
            debug!(table = ?graph[cycle.node_id()], "cyclic table dependencies, keeping diff order");
            ops
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Column, ForeignKey, ReferentialAction, Table};

    fn fk(table: &str, target: &str) -> MigrationOp {
        MigrationOp::AddForeignKey {
            table: table.into(),
            foreign_key: ForeignKey {
                name: format!("FK_{table}_{target}"),
                columns: vec![format!("{target}Id")],
                referenced_table: target.into(),
                referenced_columns: vec!["id".into()],
                on_delete: ReferentialAction::NoAction,
                on_update: ReferentialAction::NoAction,
            },
        }
    }

    fn position(ops: &[MigrationOp], wanted: &MigrationOp) -> usize {
        ops.iter().position(|op| op == wanted).unwrap()
    }

    #[test]
    fn referenced_tables_are_created_first() {
        let comment = MigrationOp::CreateTable(Table::new("comment"));
        let post = MigrationOp::CreateTable(Table::new("post"));
        let author = MigrationOp::CreateTable(Table::new("author"));
        let ops = vec![
            fk("comment", "post"),
            comment.clone(),
            fk("post", "author"),
            post.clone(),
            author.clone(),
        ];
        let planned = plan_migration(ops);
        assert!(position(&planned, &author) < position(&planned, &post));
        assert!(position(&planned, &post) < position(&planned, &comment));
        assert!(matches!(planned.last(), Some(MigrationOp::AddForeignKey { .. })));
    }

    #[test]
    fn referencing_tables_are_dropped_first() {
        let drop_fk = fk("comment", "post").inverse();
        let comment = MigrationOp::DropTable(Table::new("comment"));
        let post = MigrationOp::DropTable(Table::new("post"));
        let planned = plan_migration(vec![post.clone(), comment.clone(), drop_fk.clone()]);
        assert_eq!(position(&planned, &drop_fk), 0);
        assert!(position(&planned, &comment) < position(&planned, &post));
    }

    #[test]
    fn phases_follow_dependency_order() {
        let add_column = MigrationOp::AddColumn {
            table: "post".into(),
            column: Column::new("slug", "text"),
        };
        let drop_column = add_column.inverse();
        let create = MigrationOp::CreateTable(Table::new("tag"));
        let planned = plan_migration(vec![
            fk("post", "tag"),
            add_column.clone(),
            create.clone(),
            drop_column.clone(),
        ]);
        assert_eq!(
            planned.iter().map(|op| op.kind()).collect::<Vec<_>>(),
            vec!["drop column", "create table", "add column", "add foreign key"]
        );
    }

    #[test]
    fn cyclic_creates_keep_diff_order() {
        let a = MigrationOp::CreateTable(Table::new("a"));
        let b = MigrationOp::CreateTable(Table::new("b"));
        let planned = plan_migration(vec![a.clone(), b.clone(), fk("a", "b"), fk("b", "a")]);
        assert_eq!(planned[0], a);
        assert_eq!(planned[1], b);
    }

    #[test]
    fn rollback_reverses_inverses() {
        let create = MigrationOp::CreateTable(Table::new("post"));
        let add = MigrationOp::AddColumn {
            table: "post".into(),
            column: Column::new("title", "text"),
        };
        let plan = MigrationPlan {
            steps: vec![create.clone().into(), add.clone().into()],
        };
        assert_eq!(plan.rollback(), vec![add.inverse(), create.inverse()]);
        assert_eq!(plan.summary()["create table"], 1);
    }
}
