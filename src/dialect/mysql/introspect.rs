use std::collections::{BTreeMap, HashSet};

use sqlx::mysql::MySqlRow;
use sqlx::{MySqlConnection, Row};

use super::{canonical_type_name, Flavor};
use crate::model::{
    Check, Column, ForeignKey, GenerationStrategy, Index, PrimaryKey, ReferentialAction, Table,
};
use crate::util::{escape_string, Error, Result};

pub(super) fn decode_error(e: sqlx::Error) -> Error {
    Error::database(format!("Failed to decode catalog row: {e}"))
}

fn fetch_error(what: &'static str) -> impl Fn(sqlx::Error) -> Error {
    move |e| Error::database(format!("Failed to fetch {what}: {e}"))
}

fn get<'r, T>(row: &'r MySqlRow, column: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::MySql> + sqlx::Type<sqlx::MySql>,
{
    row.try_get(column).map_err(decode_error)
}

pub(super) async fn table_names(
    conn: &mut MySqlConnection,
    schema: Option<&str>,
) -> Result<Vec<String>> {
    let rows = sqlx::query(
        r#"
        SELECT CAST(TABLE_NAME AS CHAR) AS table_name
        FROM information_schema.TABLES
        WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_TYPE = 'BASE TABLE'
        ORDER BY TABLE_NAME
        "#,
    )
    .bind(schema)
    .fetch_all(&mut *conn)
    .await
    .map_err(fetch_error("tables"))?;

    rows.iter().map(|row| get(row, "table_name")).collect()
}

/// One row of `information_schema.COLUMNS`.
#[derive(Debug, Clone, Default)]
pub(super) struct ColumnRow {
    pub name: String,
    pub data_type: String,
    pub length: Option<i64>,
    pub precision: Option<i64>,
    pub scale: Option<i64>,
    pub nullable: bool,
    pub default: Option<String>,
    pub extra: String,
}

const STRING_TYPES: &[&str] = &[
    "char", "varchar", "text", "tinytext", "mediumtext", "longtext", "enum", "set", "date",
    "time", "datetime", "timestamp", "year",
];

pub(super) fn build_column(row: ColumnRow, flavor: Flavor) -> Column {
    let data_type = canonical_type_name(&row.data_type);
    let extra = row.extra.to_ascii_lowercase();
    let generated = extra
        .contains("auto_increment")
        .then_some(GenerationStrategy::Increment);
    let default = row
        .default
        .and_then(|raw| normalize_default(&raw, &data_type, &extra, flavor));
    let has_length = matches!(data_type.as_str(), "char" | "varchar" | "binary" | "varbinary");
    let exact_numeric = data_type == "decimal";

    Column {
        name: row.name,
        data_type,
        length: row
            .length
            .filter(|_| has_length)
            .and_then(|l| u32::try_from(l).ok()),
        precision: row
            .precision
            .filter(|_| exact_numeric)
            .and_then(|p| u32::try_from(p).ok()),
        scale: row
            .scale
            .filter(|_| exact_numeric)
            .and_then(|s| u32::try_from(s).ok()),
        nullable: row.nullable,
        default,
        generated,
    }
}

fn normalize_default(raw: &str, data_type: &str, extra: &str, flavor: Flavor) -> Option<String> {
    let trimmed = raw.trim();
    let lowered = trimmed.to_ascii_lowercase();
    if lowered == "current_timestamp()" || lowered == "current_timestamp" {
        return Some("CURRENT_TIMESTAMP".to_string());
    }
    match flavor {
        // MariaDB reports literals already quoted and an explicit NULL as text.
        Flavor::Mariadb => Some(trimmed.to_string()),
        Flavor::Mysql => {
            if extra.contains("default_generated") || !STRING_TYPES.contains(&data_type) {
                Some(trimmed.to_string())
            } else {
                Some(format!("'{}'", escape_string(trimmed)))
            }
        }
    }
}

/// One row of `information_schema.STATISTICS`.
#[derive(Debug, Clone)]
pub(super) struct IndexRow {
    pub table: String,
    pub name: String,
    pub column: String,
    pub non_unique: bool,
}

/// Groups index rows per table. `PRIMARY` becomes the primary key and the
/// indexes MySQL creates implicitly for foreign keys are skipped.
pub(super) fn apply_index_rows(
    rows: Vec<IndexRow>,
    foreign_key_names: &HashSet<(String, String)>,
    tables: &mut BTreeMap<String, Table>,
) {
    for row in rows {
        let Some(table) = tables.get_mut(&row.table) else {
            continue;
        };
        if row.name == "PRIMARY" {
            table
                .primary_key
                .get_or_insert_with(|| PrimaryKey {
                    name: None,
                    columns: Vec::new(),
                })
                .columns
                .push(row.column);
            continue;
        }
        if foreign_key_names.contains(&(row.table.clone(), row.name.clone())) {
            continue;
        }
        match table.indexes.iter_mut().find(|i| i.name == row.name) {
            Some(index) => index.columns.push(row.column),
            None => table.indexes.push(Index {
                name: row.name,
                columns: vec![row.column],
                unique: !row.non_unique,
                where_clause: None,
            }),
        }
    }
}

/// One row of `KEY_COLUMN_USAGE` joined with `REFERENTIAL_CONSTRAINTS`.
#[derive(Debug, Clone)]
pub(super) struct ForeignKeyRow {
    pub table: String,
    pub name: String,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
    pub on_delete: String,
    pub on_update: String,
}

pub(super) fn apply_foreign_key_rows(rows: Vec<ForeignKeyRow>, tables: &mut BTreeMap<String, Table>) {
    for row in rows {
        let Some(table) = tables.get_mut(&row.table) else {
            continue;
        };
        match table.foreign_keys.iter_mut().find(|f| f.name == row.name) {
            Some(foreign_key) => {
                foreign_key.columns.push(row.column);
                foreign_key.referenced_columns.push(row.referenced_column);
            }
            None => table.foreign_keys.push(ForeignKey {
                name: row.name,
                columns: vec![row.column],
                referenced_table: row.referenced_table,
                referenced_columns: vec![row.referenced_column],
                on_delete: ReferentialAction::from_sql(&row.on_delete),
                on_update: ReferentialAction::from_sql(&row.on_update),
            }),
        }
    }
}

pub(super) async fn load_tables(
    conn: &mut MySqlConnection,
    schema: Option<&str>,
    flavor: Flavor,
    names: &[String],
) -> Result<Vec<Table>> {
    let wanted: HashSet<&String> = names.iter().collect();
    let mut tables: BTreeMap<String, Table> = table_names(conn, schema)
        .await?
        .into_iter()
        .filter(|n| wanted.contains(n))
        .map(|n| (n.clone(), Table::new(n)))
        .collect();
    if tables.is_empty() {
        return Ok(Vec::new());
    }

    let rows = sqlx::query(
        r#"
        SELECT CAST(TABLE_NAME AS CHAR) AS table_name,
               CAST(COLUMN_NAME AS CHAR) AS column_name,
               CAST(DATA_TYPE AS CHAR) AS data_type,
               CAST(CHARACTER_MAXIMUM_LENGTH AS SIGNED) AS length,
               CAST(NUMERIC_PRECISION AS SIGNED) AS `precision`,
               CAST(NUMERIC_SCALE AS SIGNED) AS scale,
               CAST(IS_NULLABLE AS CHAR) AS is_nullable,
               CAST(COLUMN_DEFAULT AS CHAR) AS column_default,
               CAST(EXTRA AS CHAR) AS extra
        FROM information_schema.COLUMNS
        WHERE TABLE_SCHEMA = COALESCE(?, DATABASE())
        ORDER BY TABLE_NAME, ORDINAL_POSITION
        "#,
    )
    .bind(schema)
    .fetch_all(&mut *conn)
    .await
    .map_err(fetch_error("columns"))?;
    for row in &rows {
        let table_name: String = get(row, "table_name")?;
        let Some(table) = tables.get_mut(&table_name) else {
            continue;
        };
        let nullable: String = get(row, "is_nullable")?;
        let column = build_column(
            ColumnRow {
                name: get(row, "column_name")?,
                data_type: get(row, "data_type")?,
                length: get(row, "length")?,
                precision: get(row, "precision")?,
                scale: get(row, "scale")?,
                nullable: nullable == "YES",
                default: get(row, "column_default")?,
                extra: {
                    let extra: Option<String> = get(row, "extra")?;
                    extra.unwrap_or_default()
                },
            },
            flavor,
        );
        table.columns.push(column);
    }

    let rows = sqlx::query(
        r#"
        SELECT CAST(kcu.TABLE_NAME AS CHAR) AS table_name,
               CAST(kcu.CONSTRAINT_NAME AS CHAR) AS name,
               CAST(kcu.COLUMN_NAME AS CHAR) AS column_name,
               CAST(kcu.REFERENCED_TABLE_NAME AS CHAR) AS referenced_table,
               CAST(kcu.REFERENCED_COLUMN_NAME AS CHAR) AS referenced_column,
               CAST(rc.DELETE_RULE AS CHAR) AS on_delete,
               CAST(rc.UPDATE_RULE AS CHAR) AS on_update
        FROM information_schema.KEY_COLUMN_USAGE kcu
        JOIN information_schema.REFERENTIAL_CONSTRAINTS rc
          ON rc.CONSTRAINT_SCHEMA = kcu.CONSTRAINT_SCHEMA
         AND rc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME
         AND rc.TABLE_NAME = kcu.TABLE_NAME
        WHERE kcu.TABLE_SCHEMA = COALESCE(?, DATABASE())
          AND kcu.REFERENCED_TABLE_NAME IS NOT NULL
        ORDER BY kcu.TABLE_NAME, kcu.CONSTRAINT_NAME, kcu.ORDINAL_POSITION
        "#,
    )
    .bind(schema)
    .fetch_all(&mut *conn)
    .await
    .map_err(fetch_error("foreign keys"))?;
    let mut fk_rows = Vec::with_capacity(rows.len());
    for row in &rows {
        fk_rows.push(ForeignKeyRow {
            table: get(row, "table_name")?,
            name: get(row, "name")?,
            column: get(row, "column_name")?,
            referenced_table: get(row, "referenced_table")?,
            referenced_column: get(row, "referenced_column")?,
            on_delete: get(row, "on_delete")?,
            on_update: get(row, "on_update")?,
        });
    }
    let foreign_key_names: HashSet<(String, String)> = fk_rows
        .iter()
        .map(|r| (r.table.clone(), r.name.clone()))
        .collect();
    apply_foreign_key_rows(fk_rows, &mut tables);

    let rows = sqlx::query(
        r#"
        SELECT CAST(TABLE_NAME AS CHAR) AS table_name,
               CAST(INDEX_NAME AS CHAR) AS index_name,
               CAST(COLUMN_NAME AS CHAR) AS column_name,
               CAST(NON_UNIQUE AS SIGNED) AS non_unique
        FROM information_schema.STATISTICS
        WHERE TABLE_SCHEMA = COALESCE(?, DATABASE())
        ORDER BY TABLE_NAME, INDEX_NAME, SEQ_IN_INDEX
        "#,
    )
    .bind(schema)
    .fetch_all(&mut *conn)
    .await
    .map_err(fetch_error("indexes"))?;
    let mut index_rows = Vec::with_capacity(rows.len());
    for row in &rows {
        let non_unique: i64 = get(row, "non_unique")?;
        index_rows.push(IndexRow {
            table: get(row, "table_name")?,
            name: get(row, "index_name")?,
            column: get(row, "column_name")?,
            non_unique: non_unique != 0,
        });
    }
    apply_index_rows(index_rows, &foreign_key_names, &mut tables);

    let rows = sqlx::query(
        r#"
        SELECT CAST(tc.TABLE_NAME AS CHAR) AS table_name,
               CAST(cc.CONSTRAINT_NAME AS CHAR) AS name,
               CAST(cc.CHECK_CLAUSE AS CHAR) AS expression
        FROM information_schema.CHECK_CONSTRAINTS cc
        JOIN information_schema.TABLE_CONSTRAINTS tc
          ON tc.CONSTRAINT_SCHEMA = cc.CONSTRAINT_SCHEMA
         AND tc.CONSTRAINT_NAME = cc.CONSTRAINT_NAME
        WHERE tc.CONSTRAINT_TYPE = 'CHECK'
          AND tc.TABLE_SCHEMA = COALESCE(?, DATABASE())
        ORDER BY tc.TABLE_NAME, cc.CONSTRAINT_NAME
        "#,
    )
    .bind(schema)
    .fetch_all(&mut *conn)
    .await
    .map_err(fetch_error("check constraints"))?;
    for row in &rows {
        let table_name: String = get(row, "table_name")?;
        if let Some(table) = tables.get_mut(&table_name) {
            table.checks.push(Check {
                name: get(row, "name")?,
                expression: get(row, "expression")?,
            });
        }
    }

    Ok(tables.into_values().collect())
}
