mod introspect;
mod sqlgen;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::{Connection, PgConnection, Row};

use super::{
    default_literal, log_statement, AppliedMigration, Capabilities, Dialect, DialectOptions,
    SchemaDriver,
};
use crate::bookkeeping;
use crate::diff::MigrationOp;
use crate::metadata::ColumnMetadata;
use crate::model::{Table, View};
use crate::registry::{ColumnType, DefaultValue};
use crate::session::{SessionGuard, SessionState};
use crate::util::{sanitize_url, Error, PlanError, Result};

#[derive(Debug, Clone, Default)]
pub struct PostgresDialect {
    options: DialectOptions,
}

impl PostgresDialect {
    pub fn new(options: DialectOptions) -> Self {
        Self { options }
    }

    fn schema_name(&self) -> &str {
        self.options.schema.as_deref().unwrap_or("public")
    }
}

/// Maps user-facing type aliases to the names `information_schema` reports.
pub(crate) fn canonical_type_name(name: &str) -> String {
    let lowered = name.trim().to_ascii_lowercase();
    let canonical = match lowered.as_str() {
        "int" | "int4" | "serial" | "serial4" => "integer",
        "int2" | "smallserial" | "serial2" => "smallint",
        "int8" | "bigserial" | "serial8" => "bigint",
        "float4" => "real",
        "float" | "float8" => "double precision",
        "decimal" => "numeric",
        "bool" => "boolean",
        "char" => "character",
        "varchar" => "character varying",
        "time" => "time without time zone",
        "timetz" => "time with time zone",
        "timestamp" => "timestamp without time zone",
        "timestamptz" => "timestamp with time zone",
        other => other,
    };
    canonical.to_string()
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::postgres()
    }

    fn options(&self) -> &DialectOptions {
        &self.options
    }

    fn escape_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    fn normalize_type(&self, column: &ColumnMetadata) -> String {
        let name = match &column.column_type {
            ColumnType::SmallInt => "smallint",
            ColumnType::Int => "integer",
            ColumnType::BigInt => "bigint",
            ColumnType::Float => "real",
            ColumnType::Double => "double precision",
            ColumnType::Decimal => "numeric",
            ColumnType::Boolean => "boolean",
            ColumnType::Char => "character",
            ColumnType::Varchar => "character varying",
            ColumnType::Text => "text",
            ColumnType::Date => "date",
            ColumnType::Time => "time without time zone",
            ColumnType::Timestamp => "timestamp without time zone",
            ColumnType::TimestampTz => "timestamp with time zone",
            ColumnType::Uuid => "uuid",
            ColumnType::Json => "json",
            ColumnType::Jsonb => "jsonb",
            ColumnType::Binary => "bytea",
            ColumnType::Custom(custom) => return canonical_type_name(custom),
        };
        name.to_string()
    }

    fn normalize_length(&self, column: &ColumnMetadata) -> Option<u32> {
        match &column.column_type {
            ColumnType::Varchar => column.length,
            ColumnType::Char => Some(column.length.unwrap_or(1)),
            ColumnType::Custom(custom) => match canonical_type_name(custom).as_str() {
                "character varying" => column.length,
                "character" => Some(column.length.unwrap_or(1)),
                _ => None,
            },
            _ => None,
        }
    }

    fn normalize_default(&self, column: &ColumnMetadata) -> Option<String> {
        if column.generation.is_some() {
            return None;
        }
        match column.default.as_ref()? {
            DefaultValue::Null => None,
            value => Some(default_literal(value, "true", "false")),
        }
    }

    fn render(&self, op: &MigrationOp) -> std::result::Result<Vec<String>, PlanError> {
        sqlgen::render(self, op)
    }
}

/// Single-session Postgres driver.
pub struct PostgresDriver {
    conn: Option<PgConnection>,
    dialect: PostgresDialect,
    guard: SessionGuard,
    slow_threshold: Option<Duration>,
}

impl PostgresDriver {
    pub async fn connect(
        url: &str,
        options: DialectOptions,
        slow_threshold: Option<Duration>,
    ) -> Result<Self> {
        let conn = PgConnection::connect(url).await.map_err(|e| {
            Error::database(format!("Failed to connect to {}: {e}", sanitize_url(url)))
        })?;
        Ok(Self {
            conn: Some(conn),
            dialect: PostgresDialect::new(options),
            guard: SessionGuard::new(),
            slow_threshold,
        })
    }

    fn conn(&mut self) -> Result<&mut PgConnection> {
        self.guard.ensure_open()?;
        self.conn.as_mut().ok_or_else(|| {
            Error::ConnectionLifecycle("session has already been released".to_string())
        })
    }

    async fn bookkeeping_exists(&mut self, table: &str) -> Result<bool> {
        let schema = self.dialect.schema_name().to_string();
        let names = introspect::table_names(self.conn()?, &schema).await?;
        Ok(names.iter().any(|n| n == table))
    }

    async fn transition(&mut self, sql: &str, previous: SessionState) -> Result<()> {
        if let Err(e) = self.execute_sql(sql).await {
            self.guard.restore(previous);
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl SchemaDriver for PostgresDriver {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn execute_sql(&mut self, sql: &str) -> Result<()> {
        let threshold = self.slow_threshold;
        let started = Instant::now();
        sqlx::Executor::execute(self.conn()?, sqlx::raw_sql(sql))
            .await
            .map_err(|e| Error::database(e.to_string()))?;
        log_statement(sql, started, threshold);
        Ok(())
    }

    async fn load_table_names(&mut self) -> Result<Vec<String>> {
        let schema = self.dialect.schema_name().to_string();
        introspect::table_names(self.conn()?, &schema).await
    }

    async fn load_tables(&mut self, names: &[String]) -> Result<Vec<Table>> {
        let schema = self.dialect.schema_name().to_string();
        introspect::load_tables(self.conn()?, &schema, names).await
    }

    async fn load_views(&mut self) -> Result<Vec<View>> {
        let table = self.dialect.options.metadata_table.clone();
        if !self.bookkeeping_exists(&table).await? {
            return Ok(Vec::new());
        }
        let sql = bookkeeping::select_views_sql(&self.dialect);
        let rows = sqlx::query(&sql)
            .fetch_all(self.conn()?)
            .await
            .map_err(|e| Error::database(format!("Failed to fetch views: {e}")))?;
        rows.iter()
            .map(|row| {
                Ok(View {
                    name: row.try_get("name").map_err(introspect::decode_error)?,
                    expression: row.try_get("value").map_err(introspect::decode_error)?,
                })
            })
            .collect()
    }

    async fn load_migrations(&mut self) -> Result<Vec<AppliedMigration>> {
        let table = self.dialect.options.migrations_table.clone();
        if !self.bookkeeping_exists(&table).await? {
            return Ok(Vec::new());
        }
        let sql = bookkeeping::select_migrations_sql(&self.dialect);
        let rows = sqlx::query(&sql)
            .fetch_all(self.conn()?)
            .await
            .map_err(|e| Error::database(format!("Failed to fetch migrations: {e}")))?;
        rows.iter()
            .map(|row| {
                let id: i32 = row.try_get("id").map_err(introspect::decode_error)?;
                Ok(AppliedMigration {
                    id: i64::from(id),
                    timestamp: row.try_get("timestamp").map_err(introspect::decode_error)?,
                    name: row.try_get("name").map_err(introspect::decode_error)?,
                })
            })
            .collect()
    }

    async fn begin(&mut self) -> Result<()> {
        self.guard.begin()?;
        self.transition("BEGIN", SessionState::Idle).await
    }

    async fn commit(&mut self) -> Result<()> {
        self.guard.commit()?;
        self.execute_sql("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.guard.rollback()?;
        self.execute_sql("ROLLBACK").await
    }

    async fn release(&mut self) -> Result<()> {
        let open = self.guard.release()?;
        if let Some(mut conn) = self.conn.take() {
            if open {
                sqlx::Executor::execute(&mut conn, sqlx::raw_sql("ROLLBACK"))
                    .await
                    .map_err(|e| Error::database(e.to_string()))?;
            }
            conn.close()
                .await
                .map_err(|e| Error::database(e.to_string()))?;
        }
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.guard.in_transaction()
    }
}
