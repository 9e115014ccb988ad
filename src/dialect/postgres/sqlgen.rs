use super::PostgresDialect;
use crate::bookkeeping;
use crate::dialect::{format_column_list, Dialect};
use crate::diff::MigrationOp;
use crate::model::{Column, ForeignKey, GenerationStrategy, Index, Table};
use crate::util::PlanError;

pub(super) fn render(d: &PostgresDialect, op: &MigrationOp) -> Result<Vec<String>, PlanError> {
    let statements = match op {
        MigrationOp::CreateTable(table) => generate_create_table(d, table),

        MigrationOp::DropTable(table) => vec![format!("DROP TABLE {}", d.table_path(&table.name))],

        MigrationOp::AddColumn { table, column } => vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            d.table_path(table),
            format_column(d, column)
        )],

        MigrationOp::DropColumn { table, column } => vec![format!(
            "ALTER TABLE {} DROP COLUMN {}",
            d.table_path(table),
            d.escape_identifier(&column.name)
        )],

        MigrationOp::AlterColumn { table, from, to } => generate_alter_column(d, table, from, to)?,

        MigrationOp::AddPrimaryKey { table, primary_key } => vec![format!(
            "ALTER TABLE {} ADD {}PRIMARY KEY ({})",
            d.table_path(table),
            constraint_prefix(d, primary_key.name.as_deref()),
            format_column_list(d, &primary_key.columns)
        )],

        MigrationOp::DropPrimaryKey { table, primary_key } => {
            let name = primary_key
                .name
                .clone()
                .unwrap_or_else(|| format!("{table}_pkey"));
            vec![drop_constraint(d, table, &name)]
        }

        MigrationOp::AddIndex { table, index } => vec![generate_create_index(d, table, index)],

        MigrationOp::DropIndex { index, .. } => {
            vec![format!("DROP INDEX {}", d.table_path(&index.name))]
        }

        MigrationOp::AddUnique { table, unique } => vec![format!(
            "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
            d.table_path(table),
            d.escape_identifier(&unique.name),
            format_column_list(d, &unique.columns)
        )],

        MigrationOp::DropUnique { table, unique } => vec![drop_constraint(d, table, &unique.name)],

        MigrationOp::AddCheck { table, check } => vec![format!(
            "ALTER TABLE {} ADD CONSTRAINT {} CHECK ({})",
            d.table_path(table),
            d.escape_identifier(&check.name),
            check.expression
        )],

        MigrationOp::DropCheck { table, check } => vec![drop_constraint(d, table, &check.name)],

        MigrationOp::AddExclusion { table, exclusion } => vec![format!(
            "ALTER TABLE {} ADD CONSTRAINT {} EXCLUDE {}",
            d.table_path(table),
            d.escape_identifier(&exclusion.name),
            exclusion.expression
        )],

        MigrationOp::DropExclusion { table, exclusion } => {
            vec![drop_constraint(d, table, &exclusion.name)]
        }

        MigrationOp::AddForeignKey { table, foreign_key } => {
            vec![generate_add_foreign_key(d, table, foreign_key)]
        }

        MigrationOp::DropForeignKey { table, foreign_key } => {
            vec![drop_constraint(d, table, &foreign_key.name)]
        }

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

fn constraint_prefix(d: &PostgresDialect, name: Option<&str>) -> String {
    match name {
        Some(name) => format!("CONSTRAINT {} ", d.escape_identifier(name)),
        None => String::new(),
    }
}

fn drop_constraint(d: &PostgresDialect, table: &str, name: &str) -> String {
    format!(
        "ALTER TABLE {} DROP CONSTRAINT {}",
        d.table_path(table),
        d.escape_identifier(name)
    )
}

fn generate_create_table(d: &PostgresDialect, table: &Table) -> Vec<String> {
    let mut statements = Vec::new();

    let mut definitions: Vec<String> = table.columns.iter().map(|c| format_column(d, c)).collect();

    if let Some(primary_key) = &table.primary_key {
        definitions.push(format!(
            "{}PRIMARY KEY ({})",
            constraint_prefix(d, primary_key.name.as_deref()),
            format_column_list(d, &primary_key.columns)
        ));
    }
    for unique in &table.uniques {
        definitions.push(format!(
            "CONSTRAINT {} UNIQUE ({})",
            d.escape_identifier(&unique.name),
            format_column_list(d, &unique.columns)
        ));
    }
    for check in &table.checks {
        definitions.push(format!(
            "CONSTRAINT {} CHECK ({})",
            d.escape_identifier(&check.name),
            check.expression
        ));
    }
    for exclusion in &table.exclusions {
        definitions.push(format!(
            "CONSTRAINT {} EXCLUDE {}",
            d.escape_identifier(&exclusion.name),
            exclusion.expression
        ));
    }

    statements.push(format!(
        "CREATE TABLE {} ({})",
        d.table_path(&table.name),
        definitions.join(", ")
    ));

    for index in &table.indexes {
        statements.push(generate_create_index(d, &table.name, index));
    }
    for foreign_key in &table.foreign_keys {
        statements.push(generate_add_foreign_key(d, &table.name, foreign_key));
    }

    statements
}

fn generate_create_index(d: &PostgresDialect, table: &str, index: &Index) -> String {
    let mut sql = format!(
        "CREATE {}INDEX {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        d.escape_identifier(&index.name),
        d.table_path(table),
        format_column_list(d, &index.columns)
    );
    if let Some(where_clause) = &index.where_clause {
        sql.push_str(&format!(" WHERE {where_clause}"));
    }
    sql
}

fn generate_add_foreign_key(d: &PostgresDialect, table: &str, foreign_key: &ForeignKey) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}({}) ON DELETE {} ON UPDATE {}",
        d.table_path(table),
        d.escape_identifier(&foreign_key.name),
        format_column_list(d, &foreign_key.columns),
        d.table_path(&foreign_key.referenced_table),
        format_column_list(d, &foreign_key.referenced_columns),
        foreign_key.on_delete.as_sql(),
        foreign_key.on_update.as_sql()
    )
}

fn generate_alter_column(
    d: &PostgresDialect,
    table: &str,
    from: &Column,
    to: &Column,
) -> Result<Vec<String>, PlanError> {
    if from.generated != to.generated {
        return Err(PlanError::invalid(
            table,
            format!(
                "column {} changes generation strategy and must be recreated",
                to.name
            ),
        ));
    }
    let path = d.table_path(table);
    let column = d.escape_identifier(&to.name);
    let mut statements = Vec::new();

    if from.type_differs(to) {
        let data_type = format_type(to, false);
        statements.push(format!(
            "ALTER TABLE {path} ALTER COLUMN {column} TYPE {data_type} USING {column}::{data_type}"
        ));
    }

    if from.nullable != to.nullable {
        let action = if to.nullable { "DROP" } else { "SET" };
        statements.push(format!("ALTER TABLE {path} ALTER COLUMN {column} {action} NOT NULL"));
    }

    if !crate::util::optional_expressions_equal(&from.default, &to.default) {
        match &to.default {
            Some(value) => statements.push(format!(
                "ALTER TABLE {path} ALTER COLUMN {column} SET DEFAULT {value}"
            )),
            None => statements.push(format!("ALTER TABLE {path} ALTER COLUMN {column} DROP DEFAULT")),
        }
    }

    Ok(statements)
}

fn format_type(column: &Column, serial: bool) -> String {
    let base = match column.data_type.as_str() {
        "integer" | "int" | "int4" if serial => "serial",
        "bigint" | "int8" if serial => "bigserial",
        "smallint" | "int2" if serial => "smallserial",
        other => other,
    };
    match (column.length, column.precision, column.scale) {
        (Some(length), _, _) => format!("{base}({length})"),
        (None, Some(precision), Some(scale)) => format!("{base}({precision},{scale})"),
        (None, Some(precision), None) => format!("{base}({precision})"),
        _ => base.to_string(),
    }
}

fn format_column(d: &PostgresDialect, column: &Column) -> String {
    let serial = matches!(
        column.generated,
        Some(GenerationStrategy::Increment | GenerationStrategy::Rowid)
    );
    let mut parts = vec![d.escape_identifier(&column.name), format_type(column, serial)];

    if column.generated == Some(GenerationStrategy::Identity) {
        parts.push("GENERATED BY DEFAULT AS IDENTITY".to_string());
    }
    if !column.nullable {
        parts.push("NOT NULL".to_string());
    }
    match (&column.generated, &column.default) {
        (Some(GenerationStrategy::Uuid), _) => parts.push("DEFAULT gen_random_uuid()".to_string()),
        (None, Some(default)) => parts.push(format!("DEFAULT {default}")),
        _ => {}
    }

    parts.join(" ")
}
