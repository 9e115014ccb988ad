use std::collections::HashSet;

use tracing::warn;

use super::{ChangeSet, MigrationOp};
use crate::model::{ForeignKey, Schema, Table};

fn same_signature(a: &ForeignKey, b: &ForeignKey) -> bool {
    a.columns == b.columns
        && a.referenced_table == b.referenced_table
        && a.referenced_columns == b.referenced_columns
}

fn same_foreign_key(a: &ForeignKey, b: &ForeignKey) -> bool {
    same_signature(a, b) && a.on_delete == b.on_delete && a.on_update == b.on_update
}

/// Whether a change elsewhere in the plan forces this foreign key to be
/// dropped first: its own columns change, its referenced columns change,
/// the referenced primary key is replaced or the referenced table goes away.
fn invalidated(table: &str, fk: &ForeignKey, from: &Schema, changes: &ChangeSet) -> bool {
    if changes.touches(table, &fk.columns)
        || changes.touches(&fk.referenced_table, &fk.referenced_columns)
        || changes.dropped_tables.contains(&fk.referenced_table)
    {
        return true;
    }
    if changes.pk_changed.contains(&fk.referenced_table) {
        let old_pk: HashSet<&String> = from
            .tables
            .get(&fk.referenced_table)
            .map(|t| t.primary_columns().iter().collect())
            .unwrap_or_default();
        return fk.referenced_columns.iter().any(|c| old_pk.contains(c));
    }
    false
}

/// Whether the referenced columns still form a key in the desired schema.
fn referenced_key_exists(to: &Schema, fk: &ForeignKey) -> bool {
    let Some(target) = to.tables.get(&fk.referenced_table) else {
        return true;
    };
    if fk.referenced_columns.iter().any(|c| target.column(c).is_none()) {
        return false;
    }
    let wanted: HashSet<&String> = fk.referenced_columns.iter().collect();
    let is_key = |columns: &[String]| {
        columns.len() == wanted.len() && columns.iter().all(|c| wanted.contains(c))
    };
    is_key(target.primary_columns())
        || target.uniques.iter().any(|u| is_key(&u.columns))
        || target.indexes.iter().any(|i| i.unique && i.where_clause.is_none() && is_key(&i.columns))
}

fn drop_op(table: &Table, fk: &ForeignKey) -> MigrationOp {
    MigrationOp::DropForeignKey {
        table: table.name.clone(),
        foreign_key: fk.clone(),
    }
}

fn add_op(table: &Table, fk: &ForeignKey) -> MigrationOp {
    MigrationOp::AddForeignKey {
        table: table.name.clone(),
        foreign_key: fk.clone(),
    }
}

/// Foreign key operations for the whole schema, including the drops and
/// re-adds forced by column recreation, primary key replacement and table
/// drops. Foreign keys on tables outside the desired schema are only touched
/// when something they depend on changes.
pub(super) fn diff_foreign_keys(from: &Schema, to: &Schema, changes: &ChangeSet) -> Vec<MigrationOp> {
    let mut ops = Vec::new();

    for (name, current) in &from.tables {
        let desired = to.tables.get(name);
        for fk in &current.foreign_keys {
            if changes.dropped_tables.contains(name) {
                ops.push(drop_op(current, fk));
                continue;
            }
            let forced = invalidated(name, fk, from, changes);
            match desired {
                Some(desired) => {
                    match desired.foreign_keys.iter().find(|d| same_signature(fk, d)) {
                        Some(wanted) if !forced && same_foreign_key(fk, wanted) => {}
                        Some(wanted) => {
                            ops.push(drop_op(current, fk));
                            ops.push(add_op(desired, wanted));
                        }
                        None => ops.push(drop_op(current, fk)),
                    }
                }
                None if forced => {
                    ops.push(drop_op(current, fk));
                    if !changes.dropped_tables.contains(&fk.referenced_table)
                        && referenced_key_exists(to, fk)
                    {
                        ops.push(add_op(current, fk));
                    } else {
                        warn!(
                            table = %name,
                            foreign_key = %fk.name,
                            referenced_table = %fk.referenced_table,
                            "foreign key on unmanaged table no longer valid, not restoring"
                        );
                    }
                }
                None => {}
            }
        }
    }

    for (name, desired) in &to.tables {
        let current = from.tables.get(name);
        for fk in &desired.foreign_keys {
            let exists = current
                .map(|t| t.foreign_keys.iter().any(|c| same_signature(c, fk)))
                .unwrap_or(false);
            if !exists {
                ops.push(add_op(desired, fk));
            }
        }
    }

    ops
}
