use std::collections::BTreeMap;

use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};

use super::canonical_type_name;
use crate::model::{
    Check, Column, Exclusion, ForeignKey, GenerationStrategy, Index, PrimaryKey,
    ReferentialAction, Table, Unique,
};
use crate::util::{strip_literal_cast, Error, Result};

pub(super) fn decode_error(e: sqlx::Error) -> Error {
    Error::database(format!("Failed to decode catalog row: {e}"))
}

fn fetch_error(what: &'static str) -> impl Fn(sqlx::Error) -> Error {
    move |e| Error::database(format!("Failed to fetch {what}: {e}"))
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column).map_err(decode_error)
}

pub(super) async fn table_names(conn: &mut PgConnection, schema: &str) -> Result<Vec<String>> {
    let rows = sqlx::query(
        r#"
        SELECT table_name::text AS table_name
        FROM information_schema.tables
        WHERE table_schema = $1 AND table_type = 'BASE TABLE'
        ORDER BY table_name
        "#,
    )
    .bind(schema)
    .fetch_all(&mut *conn)
    .await
    .map_err(fetch_error("tables"))?;

    rows.iter().map(|row| get(row, "table_name")).collect()
}

pub(super) async fn load_tables(
    conn: &mut PgConnection,
    schema: &str,
    names: &[String],
) -> Result<Vec<Table>> {
    let existing: Vec<String> = table_names(conn, schema)
        .await?
        .into_iter()
        .filter(|n| names.contains(n))
        .collect();
    if existing.is_empty() {
        return Ok(Vec::new());
    }

    let mut tables: BTreeMap<String, Table> = existing
        .iter()
        .map(|n| (n.clone(), Table::new(n.clone())))
        .collect();

    introspect_columns(conn, schema, &existing, &mut tables).await?;
    introspect_primary_keys(conn, schema, &existing, &mut tables).await?;
    introspect_constraints(conn, schema, &existing, &mut tables).await?;
    introspect_indexes(conn, schema, &existing, &mut tables).await?;
    introspect_foreign_keys(conn, schema, &existing, &mut tables).await?;

    Ok(tables.into_values().collect())
}

/// Interprets a raw `column_default` into (default, generation strategy).
pub(crate) fn normalize_column_default(
    raw: Option<&str>,
    data_type: &str,
    is_identity: bool,
) -> (Option<String>, Option<GenerationStrategy>) {
    if is_identity {
        return (None, Some(GenerationStrategy::Identity));
    }
    let Some(raw) = raw.map(str::trim) else {
        return (None, None);
    };
    let lowered = raw.to_ascii_lowercase();
    if lowered.starts_with("nextval(") {
        return (None, Some(GenerationStrategy::Increment));
    }
    if lowered == "gen_random_uuid()" || lowered == "uuid_generate_v4()" {
        return (None, Some(GenerationStrategy::Uuid));
    }
    if lowered == "null" || lowered.starts_with("null::") {
        return (None, None);
    }
    let stripped = strip_literal_cast(raw);
    let numeric = matches!(
        data_type,
        "smallint" | "integer" | "bigint" | "numeric" | "real" | "double precision"
    );
    if numeric {
        if let Some(inner) = stripped.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
            if inner.parse::<f64>().is_ok() {
                return (Some(inner.to_string()), None);
            }
        }
    }
    (Some(stripped), None)
}

async fn introspect_columns(
    conn: &mut PgConnection,
    schema: &str,
    names: &[String],
    tables: &mut BTreeMap<String, Table>,
) -> Result<()> {
    let rows = sqlx::query(
        r#"
        SELECT table_name::text AS table_name,
               column_name::text AS column_name,
               data_type::text AS data_type,
               udt_name::text AS udt_name,
               character_maximum_length::int4 AS length,
               numeric_precision::int4 AS precision,
               numeric_scale::int4 AS scale,
               is_nullable::text AS is_nullable,
               column_default::text AS column_default,
               is_identity::text AS is_identity
        FROM information_schema.columns
        WHERE table_schema = $1 AND table_name = ANY($2)
        ORDER BY table_name, ordinal_position
        "#,
    )
    .bind(schema)
    .bind(names)
    .fetch_all(&mut *conn)
    .await
    .map_err(fetch_error("columns"))?;

    for row in &rows {
        let table_name: String = get(row, "table_name")?;
        let raw_type: String = get(row, "data_type")?;
        let data_type = match raw_type.as_str() {
            "USER-DEFINED" | "ARRAY" => {
                let udt_name: String = get(row, "udt_name")?;
                udt_name
            }
            _ => canonical_type_name(&raw_type),
        };
        let is_numeric = data_type == "numeric";
        let column_default: Option<String> = get(row, "column_default")?;
        let is_identity: Option<String> = get(row, "is_identity")?;
        let (default, generated) = normalize_column_default(
            column_default.as_deref(),
            &data_type,
            is_identity.as_deref() == Some("YES"),
        );
        let length: Option<i32> = get(row, "length")?;
        let precision: Option<i32> = get(row, "precision")?;
        let scale: Option<i32> = get(row, "scale")?;
        let nullable: String = get(row, "is_nullable")?;

        let column = Column {
            name: get(row, "column_name")?,
            data_type,
            length: length.and_then(|l| u32::try_from(l).ok()),
            precision: precision.filter(|_| is_numeric).and_then(|p| u32::try_from(p).ok()),
            scale: scale.filter(|_| is_numeric).and_then(|s| u32::try_from(s).ok()),
            nullable: nullable == "YES",
            default,
            generated,
        };
        if let Some(table) = tables.get_mut(&table_name) {
            table.columns.push(column);
        }
    }
    Ok(())
}

const CONSTRAINT_COLUMNS: &str = r#"
    SELECT c.relname::text AS table_name,
           con.conname::text AS name,
           con.contype::text AS kind,
           pg_get_constraintdef(con.oid) AS definition,
           array_agg(a.attname::text ORDER BY u.ord) FILTER (WHERE a.attname IS NOT NULL) AS columns
    FROM pg_constraint con
    JOIN pg_class c ON c.oid = con.conrelid
    JOIN pg_namespace n ON n.oid = c.relnamespace
    LEFT JOIN LATERAL unnest(con.conkey) WITH ORDINALITY AS u(attnum, ord) ON true
    LEFT JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = u.attnum
    WHERE n.nspname = $1 AND c.relname = ANY($2) AND con.contype = ANY($3)
    GROUP BY c.relname, con.conname, con.contype, con.oid
    ORDER BY c.relname, con.conname
"#;

async fn introspect_primary_keys(
    conn: &mut PgConnection,
    schema: &str,
    names: &[String],
    tables: &mut BTreeMap<String, Table>,
) -> Result<()> {
    let rows = sqlx::query(CONSTRAINT_COLUMNS)
        .bind(schema)
        .bind(names)
        .bind(vec!["p".to_string()])
        .fetch_all(&mut *conn)
        .await
        .map_err(fetch_error("primary keys"))?;

    for row in &rows {
        let table_name: String = get(row, "table_name")?;
        let columns: Option<Vec<String>> = get(row, "columns")?;
        if let Some(table) = tables.get_mut(&table_name) {
            table.primary_key = Some(PrimaryKey {
                name: Some(get(row, "name")?),
                columns: columns.unwrap_or_default(),
            });
        }
    }
    Ok(())
}

async fn introspect_constraints(
    conn: &mut PgConnection,
    schema: &str,
    names: &[String],
    tables: &mut BTreeMap<String, Table>,
) -> Result<()> {
    let rows = sqlx::query(CONSTRAINT_COLUMNS)
        .bind(schema)
        .bind(names)
        .bind(vec!["u".to_string(), "c".to_string(), "x".to_string()])
        .fetch_all(&mut *conn)
        .await
        .map_err(fetch_error("constraints"))?;

    for row in &rows {
        let table_name: String = get(row, "table_name")?;
        let Some(table) = tables.get_mut(&table_name) else {
            continue;
        };
        let name: String = get(row, "name")?;
        let kind: String = get(row, "kind")?;
        let definition: String = get(row, "definition")?;
        match kind.as_str() {
            "u" => {
                let columns: Option<Vec<String>> = get(row, "columns")?;
                table.uniques.push(Unique {
                    name,
                    columns: columns.unwrap_or_default(),
                });
            }
            "c" => {
                // pg_get_constraintdef yields "CHECK ((expression))"
                let expression = definition
                    .strip_prefix("CHECK (")
                    .and_then(|s| s.strip_suffix(')'))
                    .map(str::to_string)
                    .unwrap_or(definition);
                table.checks.push(Check { name, expression });
            }
            "x" => {
                let expression = definition
                    .strip_prefix("EXCLUDE ")
                    .map(str::to_string)
                    .unwrap_or(definition);
                table.exclusions.push(Exclusion { name, expression });
            }
            _ => {}
        }
    }
    Ok(())
}

async fn introspect_indexes(
    conn: &mut PgConnection,
    schema: &str,
    names: &[String],
    tables: &mut BTreeMap<String, Table>,
) -> Result<()> {
    let rows = sqlx::query(
        r#"
        SELECT t.relname::text AS table_name,
               i.relname::text AS index_name,
               ix.indisunique AS is_unique,
               pg_get_expr(ix.indpred, ix.indrelid) AS where_clause,
               array_agg(a.attname::text ORDER BY array_position(ix.indkey::int2[], a.attnum)) AS columns
        FROM pg_index ix
        JOIN pg_class t ON t.oid = ix.indrelid
        JOIN pg_class i ON i.oid = ix.indexrelid
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
        JOIN pg_namespace n ON n.oid = t.relnamespace
        WHERE n.nspname = $1 AND t.relname = ANY($2)
          AND NOT ix.indisprimary
          AND NOT EXISTS (
              SELECT 1 FROM pg_constraint con
              WHERE con.conindid = ix.indexrelid AND con.contype IN ('p', 'u', 'x')
          )
        GROUP BY t.relname, i.relname, ix.indisunique, ix.indpred, ix.indrelid
        ORDER BY t.relname, i.relname
        "#,
    )
    .bind(schema)
    .bind(names)
    .fetch_all(&mut *conn)
    .await
    .map_err(fetch_error("indexes"))?;

    for row in &rows {
        let table_name: String = get(row, "table_name")?;
        let where_clause: Option<String> = get(row, "where_clause")?;
        let index = Index {
            name: get(row, "index_name")?,
            columns: get(row, "columns")?,
            unique: get(row, "is_unique")?,
            where_clause: where_clause.map(|w| crate::util::strip_outer_parens(&w).to_string()),
        };
        if let Some(table) = tables.get_mut(&table_name) {
            table.indexes.push(index);
        }
    }
    Ok(())
}

fn map_referential_action(code: char) -> ReferentialAction {
    match code {
        'r' => ReferentialAction::Restrict,
        'c' => ReferentialAction::Cascade,
        'n' => ReferentialAction::SetNull,
        'd' => ReferentialAction::SetDefault,
        _ => ReferentialAction::NoAction,
    }
}

async fn introspect_foreign_keys(
    conn: &mut PgConnection,
    schema: &str,
    names: &[String],
    tables: &mut BTreeMap<String, Table>,
) -> Result<()> {
    let rows = sqlx::query(
        r#"
        SELECT
            class.relname::text AS table_name,
            con.conname::text AS name,
            ref_class.relname::text AS referenced_table,
            array_agg(att.attname::text ORDER BY u.attposition) AS columns,
            array_agg(ref_att.attname::text ORDER BY u.attposition) AS referenced_columns,
            con.confdeltype::text AS on_delete,
            con.confupdtype::text AS on_update
        FROM pg_constraint con
        JOIN pg_class class ON con.conrelid = class.oid
        JOIN pg_class ref_class ON con.confrelid = ref_class.oid
        JOIN pg_namespace n ON n.oid = class.relnamespace
        CROSS JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS u(attnum, ref_attnum, attposition)
        JOIN pg_attribute att ON att.attrelid = class.oid AND att.attnum = u.attnum
        JOIN pg_attribute ref_att ON ref_att.attrelid = ref_class.oid AND ref_att.attnum = u.ref_attnum
        WHERE n.nspname = $1 AND class.relname = ANY($2) AND con.contype = 'f'
        GROUP BY class.relname, con.conname, ref_class.relname, con.confdeltype, con.confupdtype
        ORDER BY class.relname, con.conname
        "#,
    )
    .bind(schema)
    .bind(names)
    .fetch_all(&mut *conn)
    .await
    .map_err(fetch_error("foreign keys"))?;

    for row in &rows {
        let table_name: String = get(row, "table_name")?;
        let on_delete: String = get(row, "on_delete")?;
        let on_update: String = get(row, "on_update")?;
        let foreign_key = ForeignKey {
            name: get(row, "name")?,
            columns: get(row, "columns")?,
            referenced_table: get(row, "referenced_table")?,
            referenced_columns: get(row, "referenced_columns")?,
            on_delete: map_referential_action(on_delete.chars().next().unwrap_or('a')),
            on_update: map_referential_action(on_update.chars().next().unwrap_or('a')),
        };
        if let Some(table) = tables.get_mut(&table_name) {
            table.foreign_keys.push(foreign_key);
        }
    }
    Ok(())
}
