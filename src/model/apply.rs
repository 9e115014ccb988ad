use super::{Schema, Table};
use crate::diff::MigrationOp;
use crate::util::PlanError;

fn missing(table: &str, what: &str, name: &str) -> PlanError {
    PlanError::invalid(table, format!("{what} {name} does not exist"))
}

fn remove_named<T>(items: &mut Vec<T>, name: &str, key: impl Fn(&T) -> &str) -> Option<T> {
    items
        .iter()
        .position(|item| key(item) == name)
        .map(|pos| items.remove(pos))
}

impl Schema {
    /// Applies one operation to this snapshot the way the database would.
    /// Used to check plans without a connection.
    pub fn apply(&mut self, op: &MigrationOp) -> Result<(), PlanError> {
        match op {
            MigrationOp::CreateTable(table) => {
                if self.tables.contains_key(&table.name) {
                    return Err(PlanError::invalid(&table.name, "table already exists"));
                }
                self.tables.insert(table.name.clone(), table.clone());
            }
            MigrationOp::DropTable(table) => {
                self.tables
                    .remove(&table.name)
                    .ok_or_else(|| missing(&table.name, "table", &table.name))?;
            }
            MigrationOp::CreateView(view) => {
                self.views.insert(view.name.clone(), view.clone());
            }
            MigrationOp::DropView(view) => {
                self.views
                    .remove(&view.name)
                    .ok_or_else(|| missing(&view.name, "view", &view.name))?;
            }
            _ => {
                let name = op.table_name().to_string();
                let table = self
                    .tables
                    .get_mut(&name)
                    .ok_or_else(|| missing(&name, "table", &name))?;
                apply_to_table(table, op)?;
            }
        }
        Ok(())
    }

    pub fn apply_all<'a>(
        &mut self,
        ops: impl IntoIterator<Item = &'a MigrationOp>,
    ) -> Result<(), PlanError> {
        for op in ops {
            self.apply(op)?;
        }
        Ok(())
    }
}

fn apply_to_table(table: &mut Table, op: &MigrationOp) -> Result<(), PlanError> {
    let name = table.name.clone();
    match op {
        MigrationOp::AddColumn { column, .. } => {
            if table.column(&column.name).is_some() {
                return Err(PlanError::invalid(
                    &name,
                    format!("column {} already exists", column.name),
                ));
            }
            table.columns.push(column.clone());
        }
        MigrationOp::DropColumn { column, .. } => {
            remove_named(&mut table.columns, &column.name, |c| c.name.as_str())
                .ok_or_else(|| missing(&name, "column", &column.name))?;
        }
        MigrationOp::AlterColumn { from, to, .. } => {
            let existing = table
                .columns
                .iter_mut()
                .find(|c| c.name == from.name)
                .ok_or_else(|| missing(&name, "column", &from.name))?;
            *existing = to.clone();
        }
        MigrationOp::AddPrimaryKey { primary_key, .. } => {
            if table.primary_key.is_some() {
                return Err(PlanError::invalid(&name, "primary key already exists"));
            }
            table.primary_key = Some(primary_key.clone());
        }
        MigrationOp::DropPrimaryKey { .. } => {
            table
                .primary_key
                .take()
                .ok_or_else(|| missing(&name, "primary key", "of table"))?;
        }
        MigrationOp::AddIndex { index, .. } => table.indexes.push(index.clone()),
        MigrationOp::DropIndex { index, .. } => {
            remove_named(&mut table.indexes, &index.name, |i| i.name.as_str())
                .ok_or_else(|| missing(&name, "index", &index.name))?;
        }
        MigrationOp::AddUnique { unique, .. } => table.uniques.push(unique.clone()),
        MigrationOp::DropUnique { unique, .. } => {
            remove_named(&mut table.uniques, &unique.name, |u| u.name.as_str())
                .ok_or_else(|| missing(&name, "unique constraint", &unique.name))?;
        }
        MigrationOp::AddCheck { check, .. } => table.checks.push(check.clone()),
        MigrationOp::DropCheck { check, .. } => {
            remove_named(&mut table.checks, &check.name, |c| c.name.as_str())
                .ok_or_else(|| missing(&name, "check constraint", &check.name))?;
        }
        MigrationOp::AddExclusion { exclusion, .. } => table.exclusions.push(exclusion.clone()),
        MigrationOp::DropExclusion { exclusion, .. } => {
            remove_named(&mut table.exclusions, &exclusion.name, |x| x.name.as_str())
                .ok_or_else(|| missing(&name, "exclusion constraint", &exclusion.name))?;
        }
        MigrationOp::AddForeignKey { foreign_key, .. } => {
            table.foreign_keys.push(foreign_key.clone())
        }
        MigrationOp::DropForeignKey { foreign_key, .. } => {
            remove_named(&mut table.foreign_keys, &foreign_key.name, |f| f.name.as_str())
                .ok_or_else(|| missing(&name, "foreign key", &foreign_key.name))?;
        }
        MigrationOp::CreateTable(_)
        | MigrationOp::DropTable(_)
        | MigrationOp::CreateView(_)
        | MigrationOp::DropView(_) => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Column, Index};

    fn schema_with_post() -> Schema {
        let mut table = Table::new("post");
        table.columns.push(Column::new("id", "integer").not_null());
        let mut schema = Schema::new();
        schema.add_table(table);
        schema
    }

    #[test]
    fn add_and_drop_column() {
        let mut schema = schema_with_post();
        let column = Column::new("title", "text");
        schema
            .apply(&MigrationOp::AddColumn {
                table: "post".into(),
                column: column.clone(),
            })
            .unwrap();
        assert!(schema.tables["post"].column("title").is_some());

        schema
            .apply(&MigrationOp::DropColumn {
                table: "post".into(),
                column,
            })
            .unwrap();
        assert!(schema.tables["post"].column("title").is_none());
    }

    #[test]
    fn rejects_operations_on_missing_objects() {
        let mut schema = schema_with_post();
        let err = schema
            .apply(&MigrationOp::DropIndex {
                table: "post".into(),
                index: Index {
                    name: "idx_missing".into(),
                    columns: vec!["id".into()],
                    unique: false,
                    where_clause: None,
                },
            })
            .unwrap_err();
        assert!(err.to_string().contains("idx_missing"));

        assert!(schema
            .apply(&MigrationOp::DropTable(Table::new("ghost")))
            .is_err());
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let mut schema = schema_with_post();
        assert!(schema
            .apply(&MigrationOp::CreateTable(Table::new("post")))
            .is_err());
    }
}
