//! Reserved tables the synchronizer keeps for itself: the metadata table
//! (one row per view definition) and the migrations table (one row per
//! applied migration).

use std::collections::HashSet;

use tracing::info;

use crate::dialect::{Dialect, SchemaDriver};
use crate::model::{Column, PrimaryKey, Table, View};
use crate::registry::GenerationStrategy;
use crate::util::{escape_string, Result};

pub const VIEW_KIND: &str = "VIEW";

pub fn metadata_table(dialect: &dyn Dialect) -> Table {
    let mut table = Table::new(dialect.options().metadata_table.clone());
    table.columns = vec![
        Column::new("type", "varchar").with_length(255).not_null(),
        Column::new("schema", "varchar").with_length(255),
        Column::new("name", "varchar").with_length(255),
        Column::new("value", "text"),
    ];
    table
}

pub fn migrations_table(dialect: &dyn Dialect) -> Table {
    let mut table = Table::new(dialect.options().migrations_table.clone());
    table.columns = vec![
        Column::new("id", "integer")
            .not_null()
            .generated(GenerationStrategy::Increment),
        Column::new("timestamp", "bigint").not_null(),
        Column::new("name", "varchar").with_length(255).not_null(),
    ];
    table.primary_key = Some(PrimaryKey {
        name: None,
        columns: vec!["id".into()],
    });
    table
}

/// Names the diff must never drop.
pub fn reserved_tables(dialect: &dyn Dialect) -> HashSet<String> {
    let options = dialect.options();
    [options.metadata_table.clone(), options.migrations_table.clone()]
        .into_iter()
        .collect()
}

/// Creates whichever bookkeeping tables are missing.
pub async fn ensure_tables(driver: &mut dyn SchemaDriver) -> Result<()> {
    let existing: HashSet<String> = driver.load_table_names().await?.into_iter().collect();
    let wanted = {
        let dialect = driver.dialect();
        vec![metadata_table(dialect), migrations_table(dialect)]
    };
    for table in wanted {
        if !existing.contains(&table.name) {
            info!(table = %table.name, "creating bookkeeping table");
            driver.create_table(&table).await?;
        }
    }
    Ok(())
}

fn schema_literal(dialect: &dyn Dialect) -> String {
    match &dialect.options().schema {
        Some(schema) => format!("'{}'", escape_string(schema)),
        None => "NULL".to_string(),
    }
}

fn schema_condition(dialect: &dyn Dialect) -> String {
    let column = dialect.escape_identifier("schema");
    match &dialect.options().schema {
        Some(schema) => format!("{column} = '{}'", escape_string(schema)),
        None => format!("{column} IS NULL"),
    }
}

fn metadata_path(dialect: &dyn Dialect) -> String {
    dialect.table_path(&dialect.options().metadata_table)
}

fn migrations_path(dialect: &dyn Dialect) -> String {
    dialect.table_path(&dialect.options().migrations_table)
}

pub fn insert_view_sql(dialect: &dyn Dialect, view: &View) -> String {
    let q = |c: &str| dialect.escape_identifier(c);
    format!(
        "INSERT INTO {} ({}, {}, {}, {}) VALUES ('{VIEW_KIND}', {}, '{}', '{}')",
        metadata_path(dialect),
        q("type"),
        q("schema"),
        q("name"),
        q("value"),
        schema_literal(dialect),
        escape_string(&view.name),
        escape_string(&view.expression),
    )
}

pub fn delete_view_sql(dialect: &dyn Dialect, view: &View) -> String {
    format!(
        "DELETE FROM {} WHERE {} = '{VIEW_KIND}' AND {} AND {} = '{}'",
        metadata_path(dialect),
        dialect.escape_identifier("type"),
        schema_condition(dialect),
        dialect.escape_identifier("name"),
        escape_string(&view.name),
    )
}

pub fn select_views_sql(dialect: &dyn Dialect) -> String {
    format!(
        "SELECT {}, {} FROM {} WHERE {} = '{VIEW_KIND}' AND {}",
        dialect.escape_identifier("name"),
        dialect.escape_identifier("value"),
        metadata_path(dialect),
        dialect.escape_identifier("type"),
        schema_condition(dialect),
    )
}

pub fn insert_migration_sql(dialect: &dyn Dialect, timestamp: i64, name: &str) -> String {
    format!(
        "INSERT INTO {} ({}, {}) VALUES ({timestamp}, '{}')",
        migrations_path(dialect),
        dialect.escape_identifier("timestamp"),
        dialect.escape_identifier("name"),
        escape_string(name),
    )
}

pub fn delete_migration_sql(dialect: &dyn Dialect, name: &str) -> String {
    format!(
        "DELETE FROM {} WHERE {} = '{}'",
        migrations_path(dialect),
        dialect.escape_identifier("name"),
        escape_string(name),
    )
}

pub fn select_migrations_sql(dialect: &dyn Dialect) -> String {
    format!(
        "SELECT {}, {}, {} FROM {} ORDER BY {} ASC",
        dialect.escape_identifier("id"),
        dialect.escape_identifier("timestamp"),
        dialect.escape_identifier("name"),
        migrations_path(dialect),
        dialect.escape_identifier("id"),
    )
}
