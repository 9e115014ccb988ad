pub mod dependencies;
pub mod desired;
pub mod planner;
pub mod table_elements;

use crate::dialect::Capabilities;
use crate::model::{
    Check, Column, Exclusion, ForeignKey, Index, PrimaryKey, Schema, Table, Unique, View,
};
use crate::util::expressions_equal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

pub use desired::desired_schema;
pub use planner::{plan_changes, plan_migration, MigrationPlan, PlannedOp};

/// One schema change. Every variant carries the complete object it creates
/// or removes, which makes [`MigrationOp::inverse`] total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationOp {
    CreateTable(Table),
    DropTable(Table),
    AddColumn {
        table: String,
        column: Column,
    },
    DropColumn {
        table: String,
        column: Column,
    },
    AlterColumn {
        table: String,
        from: Column,
        to: Column,
    },
    AddPrimaryKey {
        table: String,
        primary_key: PrimaryKey,
    },
    DropPrimaryKey {
        table: String,
        primary_key: PrimaryKey,
    },
    AddIndex {
        table: String,
        index: Index,
    },
    DropIndex {
        table: String,
        index: Index,
    },
    AddUnique {
        table: String,
        unique: Unique,
    },
    DropUnique {
        table: String,
        unique: Unique,
    },
    AddCheck {
        table: String,
        check: Check,
    },
    DropCheck {
        table: String,
        check: Check,
    },
    AddExclusion {
        table: String,
        exclusion: Exclusion,
    },
    DropExclusion {
        table: String,
        exclusion: Exclusion,
    },
    AddForeignKey {
        table: String,
        foreign_key: ForeignKey,
    },
    DropForeignKey {
        table: String,
        foreign_key: ForeignKey,
    },
    CreateView(View),
    DropView(View),
}

impl MigrationOp {
    pub fn inverse(&self) -> MigrationOp {
        use MigrationOp::*;
        match self.clone() {
            CreateTable(table) => DropTable(table),
            DropTable(table) => CreateTable(table),
            AddColumn { table, column } => DropColumn { table, column },
            DropColumn { table, column } => AddColumn { table, column },
            AlterColumn { table, from, to } => AlterColumn {
                table,
                from: to,
                to: from,
            },
            AddPrimaryKey { table, primary_key } => DropPrimaryKey { table, primary_key },
            DropPrimaryKey { table, primary_key } => AddPrimaryKey { table, primary_key },
            AddIndex { table, index } => DropIndex { table, index },
            DropIndex { table, index } => AddIndex { table, index },
            AddUnique { table, unique } => DropUnique { table, unique },
            DropUnique { table, unique } => AddUnique { table, unique },
            AddCheck { table, check } => DropCheck { table, check },
            DropCheck { table, check } => AddCheck { table, check },
            AddExclusion { table, exclusion } => DropExclusion { table, exclusion },
            DropExclusion { table, exclusion } => AddExclusion { table, exclusion },
            AddForeignKey { table, foreign_key } => DropForeignKey { table, foreign_key },
            DropForeignKey { table, foreign_key } => AddForeignKey { table, foreign_key },
            CreateView(view) => DropView(view),
            DropView(view) => CreateView(view),
        }
    }

    /// Table (or view) the operation applies to.
    pub fn table_name(&self) -> &str {
        use MigrationOp::*;
        match self {
            CreateTable(table) | DropTable(table) => &table.name,
            CreateView(view) | DropView(view) => &view.name,
            AddColumn { table, .. }
            | DropColumn { table, .. }
            | AlterColumn { table, .. }
            | AddPrimaryKey { table, .. }
            | DropPrimaryKey { table, .. }
            | AddIndex { table, .. }
            | DropIndex { table, .. }
            | AddUnique { table, .. }
            | DropUnique { table, .. }
            | AddCheck { table, .. }
            | DropCheck { table, .. }
            | AddExclusion { table, .. }
            | DropExclusion { table, .. }
            | AddForeignKey { table, .. }
            | DropForeignKey { table, .. } => table,
        }
    }

    pub fn kind(&self) -> &'static str {
        use MigrationOp::*;
        match self {
            CreateTable(_) => "create table",
            DropTable(_) => "drop table",
            AddColumn { .. } => "add column",
            DropColumn { .. } => "drop column",
            AlterColumn { .. } => "alter column",
            AddPrimaryKey { .. } => "add primary key",
            DropPrimaryKey { .. } => "drop primary key",
            AddIndex { .. } => "create index",
            DropIndex { .. } => "drop index",
            AddUnique { .. } => "add unique constraint",
            DropUnique { .. } => "drop unique constraint",
            AddCheck { .. } => "add check constraint",
            DropCheck { .. } => "drop check constraint",
            AddExclusion { .. } => "add exclusion constraint",
            DropExclusion { .. } => "drop exclusion constraint",
            AddForeignKey { .. } => "add foreign key",
            DropForeignKey { .. } => "drop foreign key",
            CreateView(_) => "create view",
            DropView(_) => "drop view",
        }
    }
}

impl fmt::Display for MigrationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use MigrationOp::*;
        let detail = match self {
            AddColumn { column, .. } | DropColumn { column, .. } => Some(column.name.as_str()),
            AlterColumn { to, .. } => Some(to.name.as_str()),
            AddIndex { index, .. } | DropIndex { index, .. } => Some(index.name.as_str()),
            AddUnique { unique, .. } | DropUnique { unique, .. } => Some(unique.name.as_str()),
            AddCheck { check, .. } | DropCheck { check, .. } => Some(check.name.as_str()),
            AddExclusion { exclusion, .. } | DropExclusion { exclusion, .. } => {
                Some(exclusion.name.as_str())
            }
            AddForeignKey { foreign_key, .. } | DropForeignKey { foreign_key, .. } => {
                Some(foreign_key.name.as_str())
            }
            _ => None,
        };
        match detail {
            Some(detail) => write!(f, "{} {}.{}", self.kind(), self.table_name(), detail),
            None => write!(f, "{} {}", self.kind(), self.table_name()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Drop tables present in the database but absent from the metadata.
    pub drop_unknown_tables: bool,
    /// Tables never dropped, such as bookkeeping tables.
    pub reserved_tables: HashSet<String>,
}

impl DiffOptions {
    pub fn reserve(mut self, table: impl Into<String>) -> Self {
        self.reserved_tables.insert(table.into());
        self
    }
}

/// Everything about the current schema that invalidates dependent objects.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// (table, column) pairs dropped and re-added.
    pub recreated: HashSet<(String, String)>,
    /// (table, column) pairs whose type changes in place.
    pub retyped: HashSet<(String, String)>,
    /// (table, column) pairs dropped for good.
    pub removed: HashSet<(String, String)>,
    pub pk_changed: HashSet<String>,
    pub dropped_tables: HashSet<String>,
}

impl ChangeSet {
    pub fn touches(&self, table: &str, columns: &[String]) -> bool {
        columns.iter().any(|c| {
            let key = (table.to_string(), c.clone());
            self.recreated.contains(&key) || self.retyped.contains(&key) || self.removed.contains(&key)
        })
    }

    pub fn recreates(&self, table: &str, columns: &[String]) -> bool {
        columns
            .iter()
            .any(|c| self.recreated.contains(&(table.to_string(), c.clone())))
    }
}

/// Computes the unordered operations turning `from` into `to`.
pub fn compute_diff(
    from: &Schema,
    to: &Schema,
    capabilities: &Capabilities,
    options: &DiffOptions,
) -> Vec<MigrationOp> {
    let changes = table_elements::classify_changes(from, to, capabilities, options);
    let mut ops = Vec::new();

    ops.extend(diff_views(from, to));
    ops.extend(diff_tables(from, to, &changes));
    for (name, to_table) in &to.tables {
        if let Some(from_table) = from.tables.get(name) {
            ops.extend(table_elements::diff_columns(from_table, to_table, capabilities));
            ops.extend(table_elements::diff_primary_keys(from_table, to_table, &changes));
            ops.extend(table_elements::diff_indexes(from_table, to_table, &changes));
            ops.extend(table_elements::diff_uniques(from_table, to_table, &changes));
            ops.extend(table_elements::diff_checks(from_table, to_table, &changes));
            ops.extend(table_elements::diff_exclusions(from_table, to_table, &changes));
        }
    }
    ops.extend(dependencies::diff_foreign_keys(from, to, &changes));
    ops
}

fn diff_tables(from: &Schema, to: &Schema, changes: &ChangeSet) -> Vec<MigrationOp> {
    let mut ops = Vec::new();
    for (name, table) in &to.tables {
        if !from.tables.contains_key(name) {
            ops.push(MigrationOp::CreateTable(table.without_foreign_keys()));
        }
    }
    for (name, table) in &from.tables {
        if changes.dropped_tables.contains(name) {
            ops.push(MigrationOp::DropTable(table.without_foreign_keys()));
        }
    }
    ops
}

fn diff_views(from: &Schema, to: &Schema) -> Vec<MigrationOp> {
    let mut ops = Vec::new();
    for (name, view) in &to.views {
        match from.views.get(name) {
            Some(existing) if expressions_equal(&existing.expression, &view.expression) => {}
            Some(existing) => {
                ops.push(MigrationOp::DropView(existing.clone()));
                ops.push(MigrationOp::CreateView(view.clone()));
            }
            None => ops.push(MigrationOp::CreateView(view.clone())),
        }
    }
    for (name, view) in &from.views {
        if !to.views.contains_key(name) {
            ops.push(MigrationOp::DropView(view.clone()));
        }
    }
    ops
}
