use super::{ChangeSet, DiffOptions, MigrationOp};
use crate::dialect::Capabilities;
use crate::model::{Column, Index, Schema, Table};
use crate::util::{expressions_equal, optional_expressions_equal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnChange {
    Unchanged,
    Alter,
    Recreate,
}

pub(crate) fn column_change(from: &Column, to: &Column, capabilities: &Capabilities) -> ColumnChange {
    let type_changed = from.type_differs(to);
    let generation_changed = from.generated != to.generated;
    if (type_changed && !capabilities.alter_column_type)
        || (generation_changed && !capabilities.alter_column_generation)
    {
        return ColumnChange::Recreate;
    }
    if type_changed
        || generation_changed
        || from.nullable != to.nullable
        || !optional_expressions_equal(&from.default, &to.default)
    {
        ColumnChange::Alter
    } else {
        ColumnChange::Unchanged
    }
}

pub(super) fn classify_changes(
    from: &Schema,
    to: &Schema,
    capabilities: &Capabilities,
    options: &DiffOptions,
) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for name in from.tables.keys() {
        if !to.tables.contains_key(name)
            && options.drop_unknown_tables
            && !options.reserved_tables.contains(name)
        {
            changes.dropped_tables.insert(name.clone());
        }
    }

    for (name, to_table) in &to.tables {
        let Some(from_table) = from.tables.get(name) else {
            continue;
        };
        for from_column in &from_table.columns {
            let key = (name.clone(), from_column.name.clone());
            match to_table.column(&from_column.name) {
                None => {
                    changes.removed.insert(key);
                }
                Some(to_column) => match column_change(from_column, to_column, capabilities) {
                    ColumnChange::Recreate => {
                        changes.recreated.insert(key);
                    }
                    ColumnChange::Alter if from_column.type_differs(to_column) => {
                        changes.retyped.insert(key);
                    }
                    _ => {}
                },
            }
        }

        let from_pk = from_table.primary_columns();
        if from_pk != to_table.primary_columns() || changes.recreates(name, from_pk) {
            changes.pk_changed.insert(name.clone());
        }
    }

    changes
}

pub(super) fn diff_columns(
    from_table: &Table,
    to_table: &Table,
    capabilities: &Capabilities,
) -> Vec<MigrationOp> {
    let mut ops = Vec::new();
    let table = &to_table.name;

    for column in &to_table.columns {
        match from_table.column(&column.name) {
            None => ops.push(MigrationOp::AddColumn {
                table: table.clone(),
                column: column.clone(),
            }),
            Some(existing) => match column_change(existing, column, capabilities) {
                ColumnChange::Unchanged => {}
                ColumnChange::Alter => ops.push(MigrationOp::AlterColumn {
                    table: table.clone(),
                    from: existing.clone(),
                    to: column.clone(),
                }),
                ColumnChange::Recreate => {
                    ops.push(MigrationOp::DropColumn {
                        table: table.clone(),
                        column: existing.clone(),
                    });
                    ops.push(MigrationOp::AddColumn {
                        table: table.clone(),
                        column: column.clone(),
                    });
                }
            },
        }
    }

    for column in &from_table.columns {
        if to_table.column(&column.name).is_none() {
            ops.push(MigrationOp::DropColumn {
                table: table.clone(),
                column: column.clone(),
            });
        }
    }

    ops
}

/// Primary keys are compared by column list; constraint names are ignored.
pub(super) fn diff_primary_keys(
    from_table: &Table,
    to_table: &Table,
    changes: &ChangeSet,
) -> Vec<MigrationOp> {
    let mut ops = Vec::new();
    if !changes.pk_changed.contains(&to_table.name) {
        return ops;
    }
    if let Some(primary_key) = &from_table.primary_key {
        ops.push(MigrationOp::DropPrimaryKey {
            table: from_table.name.clone(),
            primary_key: primary_key.clone(),
        });
    }
    if let Some(primary_key) = &to_table.primary_key {
        ops.push(MigrationOp::AddPrimaryKey {
            table: to_table.name.clone(),
            primary_key: primary_key.clone(),
        });
    }
    ops
}

pub(crate) fn same_index(a: &Index, b: &Index) -> bool {
    a.columns == b.columns
        && a.unique == b.unique
        && optional_expressions_equal(&a.where_clause, &b.where_clause)
}

/// Generic pairing of current and desired table elements by signature.
/// Elements touching a recreated or removed column are dropped and re-added.
fn diff_elements<T: Clone>(
    from_items: &[T],
    to_items: &[T],
    same: impl Fn(&T, &T) -> bool,
    invalidated: impl Fn(&T) -> bool,
    drop: impl Fn(T) -> MigrationOp,
    add: impl Fn(T) -> MigrationOp,
) -> Vec<MigrationOp> {
    let mut ops = Vec::new();
    for current in from_items {
        let matched = to_items.iter().any(|desired| same(current, desired));
        if !matched || invalidated(current) {
            ops.push(drop(current.clone()));
        }
    }
    for desired in to_items {
        let matched = from_items.iter().any(|current| same(current, desired));
        if !matched || invalidated(desired) {
            ops.push(add(desired.clone()));
        }
    }
    ops
}

pub(super) fn diff_indexes(
    from_table: &Table,
    to_table: &Table,
    changes: &ChangeSet,
) -> Vec<MigrationOp> {
    let table = to_table.name.clone();
    diff_elements(
        &from_table.indexes,
        &to_table.indexes,
        same_index,
        |index| changes.recreates(&table, &index.columns),
        |index| MigrationOp::DropIndex {
            table: table.clone(),
            index,
        },
        |index| MigrationOp::AddIndex {
            table: table.clone(),
            index,
        },
    )
}

pub(super) fn diff_uniques(
    from_table: &Table,
    to_table: &Table,
    changes: &ChangeSet,
) -> Vec<MigrationOp> {
    let table = to_table.name.clone();
    diff_elements(
        &from_table.uniques,
        &to_table.uniques,
        |a, b| a.columns == b.columns,
        |unique| changes.recreates(&table, &unique.columns),
        |unique| MigrationOp::DropUnique {
            table: table.clone(),
            unique,
        },
        |unique| MigrationOp::AddUnique {
            table: table.clone(),
            unique,
        },
    )
}

pub(super) fn diff_checks(
    from_table: &Table,
    to_table: &Table,
    changes: &ChangeSet,
) -> Vec<MigrationOp> {
    let table = to_table.name.clone();
    let invalid = invalidated_columns(&table, changes);
    diff_elements(
        &from_table.checks,
        &to_table.checks,
        |a, b| expressions_equal(&a.expression, &b.expression),
        |check| invalid.iter().any(|c| mentions_column(&check.expression, c)),
        |check| MigrationOp::DropCheck {
            table: table.clone(),
            check,
        },
        |check| MigrationOp::AddCheck {
            table: table.clone(),
            check,
        },
    )
}

pub(super) fn diff_exclusions(
    from_table: &Table,
    to_table: &Table,
    changes: &ChangeSet,
) -> Vec<MigrationOp> {
    let table = to_table.name.clone();
    let invalid = invalidated_columns(&table, changes);
    diff_elements(
        &from_table.exclusions,
        &to_table.exclusions,
        |a, b| expressions_equal(&a.expression, &b.expression),
        |exclusion| invalid.iter().any(|c| mentions_column(&exclusion.expression, c)),
        |exclusion| MigrationOp::DropExclusion {
            table: table.clone(),
            exclusion,
        },
        |exclusion| MigrationOp::AddExclusion {
            table: table.clone(),
            exclusion,
        },
    )
}

fn invalidated_columns(table: &str, changes: &ChangeSet) -> Vec<String> {
    changes
        .recreated
        .iter()
        .filter(|(t, _)| t == table)
        .map(|(_, c)| c.clone())
        .collect()
}

/// Whether a SQL expression refers to `column` as an identifier.
pub(crate) fn mentions_column(expression: &str, column: &str) -> bool {
    expression
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|token| token.eq_ignore_ascii_case(column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Check, PrimaryKey};

    fn caps(alter_type: bool) -> Capabilities {
        Capabilities {
            alter_column_type: alter_type,
            alter_column_generation: alter_type,
            ..Capabilities::postgres()
        }
    }

    fn table_with(columns: Vec<Column>) -> Table {
        let mut table = Table::new("post");
        table.columns = columns;
        table.primary_key = Some(PrimaryKey {
            name: None,
            columns: vec!["id".into()],
        });
        table
    }

    #[test]
    fn nullable_change_alters_in_place() {
        let from = Column::new("title", "text");
        let to = Column::new("title", "text").not_null();
        assert_eq!(column_change(&from, &to, &caps(true)), ColumnChange::Alter);
    }

    #[test]
    fn type_change_recreates_without_alter_support() {
        let from = Column::new("views", "integer");
        let to = Column::new("views", "bigint");
        assert_eq!(column_change(&from, &to, &caps(true)), ColumnChange::Alter);
        assert_eq!(column_change(&from, &to, &caps(false)), ColumnChange::Recreate);
    }

    #[test]
    fn equivalent_defaults_are_unchanged() {
        let from = Column::new("views", "integer").with_default("(0)");
        let to = Column::new("views", "integer").with_default("0");
        assert_eq!(column_change(&from, &to, &caps(true)), ColumnChange::Unchanged);
    }

    #[test]
    fn recreated_column_drops_dependent_index() {
        let id = Column::new("id", "integer").not_null();
        let mut from = table_with(vec![id.clone(), Column::new("slug", "varchar")]);
        let mut to = table_with(vec![id, Column::new("slug", "text")]);
        let index = Index {
            name: "IDX_slug".into(),
            columns: vec!["slug".into()],
            unique: false,
            where_clause: None,
        };
        from.indexes.push(index.clone());
        to.indexes.push(index);

        let mut changes = ChangeSet::default();
        changes.recreated.insert(("post".into(), "slug".into()));
        let ops = diff_indexes(&from, &to, &changes);
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[0], MigrationOp::DropIndex { .. }));
        assert!(matches!(ops[1], MigrationOp::AddIndex { .. }));

        assert!(diff_indexes(&from, &to, &ChangeSet::default()).is_empty());
    }

    #[test]
    fn check_mentioning_recreated_column_is_readded() {
        let mut from = table_with(vec![
            Column::new("id", "integer").not_null(),
            Column::new("rating", "integer"),
        ]);
        let mut to = from.clone();
        let check = Check {
            name: "CHK_rating".into(),
            expression: "\"rating\" >= 0".into(),
        };
        from.checks.push(check.clone());
        to.checks.push(check);
        to.columns[1] = Column::new("rating", "smallint");

        let mut changes = ChangeSet::default();
        changes.recreated.insert(("post".into(), "rating".into()));
        assert_eq!(diff_checks(&from, &to, &changes).len(), 2);
    }

    #[test]
    fn primary_key_names_are_ignored() {
        let id = Column::new("id", "integer").not_null();
        let from = table_with(vec![id.clone()]);
        let mut to = from.clone();
        to.primary_key = Some(PrimaryKey {
            name: Some("PK_other".into()),
            columns: vec!["id".into()],
        });
        let mut current = Schema::new();
        current.add_table(from.clone());
        let mut desired = Schema::new();
        desired.add_table(to.clone());
        let changes = classify_changes(&current, &desired, &caps(true), &DiffOptions::default());
        assert!(changes.pk_changed.is_empty());
        assert!(diff_primary_keys(&from, &to, &changes).is_empty());
    }

    #[test]
    fn unknown_tables_dropped_only_when_requested() {
        let mut current = Schema::new();
        current.add_table(Table::new("legacy"));
        current.add_table(Table::new("migrations"));
        let desired = Schema::new();

        let keep = classify_changes(&current, &desired, &caps(true), &DiffOptions::default());
        assert!(keep.dropped_tables.is_empty());

        let options = DiffOptions {
            drop_unknown_tables: true,
            ..Default::default()
        }
        .reserve("migrations");
        let drop = classify_changes(&current, &desired, &caps(true), &options);
        assert!(drop.dropped_tables.contains("legacy"));
        assert!(!drop.dropped_tables.contains("migrations"));
    }

    #[test]
    fn mentions_column_matches_identifiers_only() {
        assert!(mentions_column("\"postId\" > 0", "postId"));
        assert!(!mentions_column("\"postIdentifier\" > 0", "postId"));
    }
}
