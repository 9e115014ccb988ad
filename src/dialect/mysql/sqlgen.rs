use super::{Flavor, MySqlDialect};
use crate::bookkeeping;
use crate::dialect::{format_column_list, Dialect};
use crate::diff::MigrationOp;
use crate::model::{Column, ForeignKey, GenerationStrategy, Index, Table};
use crate::util::PlanError;

pub(super) fn render(d: &MySqlDialect, op: &MigrationOp) -> Result<Vec<String>, PlanError> {
    let table = op.table_name();
    let unsupported = |feature: &str| PlanError::unsupported(table, feature, d.name());

    let statements = match op {
        MigrationOp::CreateTable(table) => generate_create_table(d, table)?,

        MigrationOp::DropTable(table) => vec![format!("DROP TABLE {}", d.table_path(&table.name))],

        MigrationOp::AddColumn { table, column } => vec![format!(
            "ALTER TABLE {} ADD {}",
            d.table_path(table),
            format_column(d, column)
        )],

        MigrationOp::DropColumn { table, column } => vec![format!(
            "ALTER TABLE {} DROP COLUMN {}",
            d.table_path(table),
            d.escape_identifier(&column.name)
        )],

        MigrationOp::AlterColumn { table, from, to } => vec![format!(
            "ALTER TABLE {} CHANGE {} {}",
            d.table_path(table),
            d.escape_identifier(&from.name),
            format_column(d, to)
        )],

        MigrationOp::AddPrimaryKey { table, primary_key } => vec![format!(
            "ALTER TABLE {} ADD PRIMARY KEY ({})",
            d.table_path(table),
            format_column_list(d, &primary_key.columns)
        )],

        MigrationOp::DropPrimaryKey { table, .. } => {
            vec![format!("ALTER TABLE {} DROP PRIMARY KEY", d.table_path(table))]
        }

        MigrationOp::AddIndex { table, index } => {
            if index.where_clause.is_some() {
                return Err(unsupported("partial index"));
            }
            vec![format!(
                "CREATE {}INDEX {} ON {} ({})",
                if index.unique { "UNIQUE " } else { "" },
                d.escape_identifier(&index.name),
                d.table_path(table),
                format_column_list(d, &index.columns)
            )]
        }

        MigrationOp::DropIndex { table, index } => vec![format!(
            "DROP INDEX {} ON {}",
            d.escape_identifier(&index.name),
            d.table_path(table)
        )],

        MigrationOp::AddUnique { .. } | MigrationOp::DropUnique { .. } => {
            return Err(unsupported("unique constraint"))
        }

        MigrationOp::AddExclusion { .. } | MigrationOp::DropExclusion { .. } => {
            return Err(unsupported("exclusion constraint"))
        }

        MigrationOp::AddCheck { table, check } => vec![format!(
            "ALTER TABLE {} ADD CONSTRAINT {} CHECK ({})",
            d.table_path(table),
            d.escape_identifier(&check.name),
            check.expression
        )],

        MigrationOp::DropCheck { table, check } => {
            let keyword = match d.flavor() {
                Flavor::Mysql => "CHECK",
                Flavor::Mariadb => "CONSTRAINT",
            };
            vec![format!(
                "ALTER TABLE {} DROP {keyword} {}",
                d.table_path(table),
                d.escape_identifier(&check.name)
            )]
        }

        MigrationOp::AddForeignKey { table, foreign_key } => {
            vec![generate_add_foreign_key(d, table, foreign_key)]
        }

        MigrationOp::DropForeignKey { table, foreign_key } => vec![format!(
            "ALTER TABLE {} DROP FOREIGN KEY {}",
            d.table_path(table),
            d.escape_identifier(&foreign_key.name)
        )],

        MigrationOp::CreateView(view) => vec![
            format!("CREATE VIEW {} AS {}", d.table_path(&view.name), view.expression),
            bookkeeping::insert_view_sql(d, view),
        ],

        MigrationOp::DropView(view) => vec![
            format!("DROP VIEW {}", d.table_path(&view.name)),
            bookkeeping::delete_view_sql(d, view),
        ],
    };
    Ok(statements)
}

fn generate_create_table(d: &MySqlDialect, table: &Table) -> Result<Vec<String>, PlanError> {
    if !table.uniques.is_empty() {
        return Err(PlanError::unsupported(&table.name, "unique constraint", d.name()));
    }
    if !table.exclusions.is_empty() {
        return Err(PlanError::unsupported(&table.name, "exclusion constraint", d.name()));
    }

    let mut definitions: Vec<String> = table.columns.iter().map(|c| format_column(d, c)).collect();

    if let Some(primary_key) = &table.primary_key {
        definitions.push(format!(
            "PRIMARY KEY ({})",
            format_column_list(d, &primary_key.columns)
        ));
    }
    for index in &table.indexes {
        definitions.push(format_inline_index(d, &table.name, index)?);
    }
    for check in &table.checks {
        definitions.push(format!(
            "CONSTRAINT {} CHECK ({})",
            d.escape_identifier(&check.name),
            check.expression
        ));
    }

    let mut statements = vec![format!(
        "CREATE TABLE {} ({}) ENGINE=InnoDB",
        d.table_path(&table.name),
        definitions.join(", ")
    )];
    for foreign_key in &table.foreign_keys {
        statements.push(generate_add_foreign_key(d, &table.name, foreign_key));
    }
    Ok(statements)
}

fn format_inline_index(d: &MySqlDialect, table: &str, index: &Index) -> Result<String, PlanError> {
    if index.where_clause.is_some() {
        return Err(PlanError::unsupported(table, "partial index", d.name()));
    }
    Ok(format!(
        "{}INDEX {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        d.escape_identifier(&index.name),
        format_column_list(d, &index.columns)
    ))
}

fn generate_add_foreign_key(d: &MySqlDialect, table: &str, foreign_key: &ForeignKey) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
        d.table_path(table),
        d.escape_identifier(&foreign_key.name),
        format_column_list(d, &foreign_key.columns),
        d.table_path(&foreign_key.referenced_table),
        format_column_list(d, &foreign_key.referenced_columns),
        foreign_key.on_delete.as_sql(),
        foreign_key.on_update.as_sql()
    )
}

fn format_type(column: &Column) -> String {
    match (column.length, column.precision, column.scale) {
        (Some(length), _, _) => format!("{}({length})", column.data_type),
        (None, Some(precision), Some(scale)) => format!("{}({precision},{scale})", column.data_type),
        (None, Some(precision), None) => format!("{}({precision})", column.data_type),
        _ => column.data_type.clone(),
    }
}

fn format_column(d: &MySqlDialect, column: &Column) -> String {
    let mut parts = vec![d.escape_identifier(&column.name), format_type(column)];
    parts.push(if column.nullable { "NULL" } else { "NOT NULL" }.to_string());
    if let Some(default) = &column.default {
        parts.push(format!("DEFAULT {default}"));
    }
    if matches!(
        column.generated,
        Some(GenerationStrategy::Increment | GenerationStrategy::Rowid | GenerationStrategy::Identity)
    ) {
        parts.push("AUTO_INCREMENT".to_string());
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectOptions;
    use crate::model::{Check, PrimaryKey, ReferentialAction, Unique};

    fn dialect() -> MySqlDialect {
        MySqlDialect::new(DialectOptions::default())
    }

    #[test]
    fn create_table_inlines_indexes() {
        let mut table = Table::new("post");
        table.columns = vec![
            Column::new("id", "int")
                .not_null()
                .generated(GenerationStrategy::Increment),
            Column::new("title", "varchar").with_length(255).not_null(),
        ];
        table.primary_key = Some(PrimaryKey {
            name: None,
            columns: vec!["id".into()],
        });
        table.indexes.push(Index {
            name: "IDX_title".into(),
            columns: vec!["title".into()],
            unique: true,
            where_clause: None,
        });
        let sql = render(&dialect(), &MigrationOp::CreateTable(table)).unwrap();
        assert_eq!(
            sql,
            vec![
                "CREATE TABLE `post` (`id` int NOT NULL AUTO_INCREMENT, `title` varchar(255) NOT NULL, \
                 PRIMARY KEY (`id`), UNIQUE INDEX `IDX_title` (`title`)) ENGINE=InnoDB"
                    .to_string()
            ]
        );
    }

    #[test]
    fn unique_constraints_are_rejected() {
        let op = MigrationOp::AddUnique {
            table: "user".into(),
            unique: Unique {
                name: "UQ_email".into(),
                columns: vec!["email".into()],
            },
        };
        let err = render(&dialect(), &op).unwrap_err();
        assert!(matches!(
            err,
            PlanError::UnsupportedConstraint { ref feature, .. } if feature == "unique constraint"
        ));
    }

    #[test]
    fn alter_column_rewrites_definition() {
        let op = MigrationOp::AlterColumn {
            table: "post".into(),
            from: Column::new("title", "varchar").with_length(255),
            to: Column::new("title", "varchar").with_length(255).not_null().with_default("''"),
        };
        assert_eq!(
            render(&dialect(), &op).unwrap()[0],
            "ALTER TABLE `post` CHANGE `title` `title` varchar(255) NOT NULL DEFAULT ''"
        );
    }

    #[test]
    fn drop_statements_use_mysql_keywords() {
        let fk = ForeignKey {
            name: "FK_1".into(),
            columns: vec!["postId".into()],
            referenced_table: "post".into(),
            referenced_columns: vec!["id".into()],
            on_delete: ReferentialAction::SetNull,
            on_update: ReferentialAction::NoAction,
        };
        let op = MigrationOp::DropForeignKey {
            table: "comment".into(),
            foreign_key: fk,
        };
        assert_eq!(
            render(&dialect(), &op).unwrap()[0],
            "ALTER TABLE `comment` DROP FOREIGN KEY `FK_1`"
        );

        let check = MigrationOp::DropCheck {
            table: "post".into(),
            check: Check {
                name: "CHK_1".into(),
                expression: "views >= 0".into(),
            },
        };
        assert_eq!(
            render(&dialect(), &check).unwrap()[0],
            "ALTER TABLE `post` DROP CHECK `CHK_1`"
        );
        let mariadb = MySqlDialect::mariadb(DialectOptions::default());
        assert_eq!(
            render(&mariadb, &check).unwrap()[0],
            "ALTER TABLE `post` DROP CONSTRAINT `CHK_1`"
        );
    }
}
