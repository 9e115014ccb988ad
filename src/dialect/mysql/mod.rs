mod introspect;
mod sqlgen;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::{Connection, MySqlConnection, Row};
use tracing::info;

use super::{
    default_literal, is_exact_numeric, log_statement, AppliedMigration, Capabilities, Dialect,
    DialectOptions, SchemaDriver,
};
use crate::bookkeeping;
use crate::diff::MigrationOp;
use crate::metadata::ColumnMetadata;
use crate::model::{Index, Schema, Table, View};
use crate::registry::{ColumnType, DefaultValue, GenerationStrategy};
use crate::session::{SessionGuard, SessionState};
use crate::util::{sanitize_url, Error, PlanError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flavor {
    #[default]
    Mysql,
    Mariadb,
}

#[derive(Debug, Clone, Default)]
pub struct MySqlDialect {
    options: DialectOptions,
    flavor: Flavor,
}

impl MySqlDialect {
    pub fn new(options: DialectOptions) -> Self {
        Self {
            options,
            flavor: Flavor::Mysql,
        }
    }

    pub fn mariadb(options: DialectOptions) -> Self {
        Self {
            options,
            flavor: Flavor::Mariadb,
        }
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }
}

pub(crate) fn canonical_type_name(name: &str) -> String {
    let lowered = name.trim().to_ascii_lowercase();
    let canonical = match lowered.as_str() {
        "integer" | "int4" => "int",
        "int2" => "smallint",
        "int8" => "bigint",
        "bool" | "boolean" => "tinyint",
        "character varying" => "varchar",
        "character" => "char",
        "numeric" => "decimal",
        "double precision" => "double",
        "real" => "float",
        other => other,
    };
    canonical.to_string()
}

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        match self.flavor {
            Flavor::Mysql => "mysql",
            Flavor::Mariadb => "mariadb",
        }
    }

    fn capabilities(&self) -> Capabilities {
        match self.flavor {
            Flavor::Mysql => Capabilities::mysql(),
            Flavor::Mariadb => Capabilities::mariadb(),
        }
    }

    fn options(&self) -> &DialectOptions {
        &self.options
    }

    fn escape_identifier(&self, identifier: &str) -> String {
        format!("`{}`", identifier.replace('`', "``"))
    }

    fn normalize_type(&self, column: &ColumnMetadata) -> String {
        let name = match &column.column_type {
            ColumnType::SmallInt => "smallint",
            ColumnType::Int => "int",
            ColumnType::BigInt => "bigint",
            ColumnType::Float => "float",
            ColumnType::Double => "double",
            ColumnType::Decimal => "decimal",
            ColumnType::Boolean => "tinyint",
            ColumnType::Char => "char",
            ColumnType::Varchar | ColumnType::Uuid => "varchar",
            ColumnType::Text => "text",
            ColumnType::Date => "date",
            ColumnType::Time => "time",
            ColumnType::Timestamp => "datetime",
            ColumnType::TimestampTz => "timestamp",
            ColumnType::Json | ColumnType::Jsonb => match self.flavor {
                Flavor::Mysql => "json",
                Flavor::Mariadb => "longtext",
            },
            ColumnType::Binary => "blob",
            ColumnType::Custom(custom) => return canonical_type_name(custom),
        };
        name.to_string()
    }

    fn normalize_length(&self, column: &ColumnMetadata) -> Option<u32> {
        match &column.column_type {
            ColumnType::Varchar => Some(column.length.unwrap_or(255)),
            ColumnType::Char => Some(column.length.unwrap_or(1)),
            ColumnType::Uuid => Some(36),
            ColumnType::Custom(custom) => match canonical_type_name(custom).as_str() {
                "varchar" => Some(column.length.unwrap_or(255)),
                "char" => Some(column.length.unwrap_or(1)),
                _ => None,
            },
            _ => None,
        }
    }

    fn normalize_precision(&self, column: &ColumnMetadata) -> (Option<u32>, Option<u32>) {
        if is_exact_numeric(&column.column_type) {
            (
                Some(column.precision.unwrap_or(10)),
                Some(column.scale.unwrap_or(0)),
            )
        } else {
            (None, None)
        }
    }

    /// Uuid values are generated client side; identity maps to
    /// `AUTO_INCREMENT`.
    fn normalize_generation(&self, column: &ColumnMetadata) -> Option<GenerationStrategy> {
        match column.generation? {
            GenerationStrategy::Uuid => None,
            _ => Some(GenerationStrategy::Increment),
        }
    }

    fn normalize_default(&self, column: &ColumnMetadata) -> Option<String> {
        if self.normalize_generation(column).is_some() {
            return None;
        }
        let implicit_null = self.capabilities().explicit_null_default && column.nullable;
        match column.default.as_ref() {
            None | Some(DefaultValue::Null) => implicit_null.then(|| "NULL".to_string()),
            Some(value) => Some(default_literal(value, "1", "0")),
        }
    }

    /// Unique constraints become unique indexes.
    fn normalize_schema(&self, mut schema: Schema) -> Schema {
        for table in schema.tables.values_mut() {
            for unique in std::mem::take(&mut table.uniques) {
                let covered = table
                    .indexes
                    .iter()
                    .any(|i| i.unique && i.where_clause.is_none() && i.columns == unique.columns);
                if !covered {
                    table.indexes.push(Index {
                        name: unique.name,
                        columns: unique.columns,
                        unique: true,
                        where_clause: None,
                    });
                }
            }
        }
        schema
    }

    fn render(&self, op: &MigrationOp) -> std::result::Result<Vec<String>, PlanError> {
        sqlgen::render(self, op)
    }
}

/// Single-session MySQL / MariaDB driver.
pub struct MySqlDriver {
    conn: Option<MySqlConnection>,
    dialect: MySqlDialect,
    guard: SessionGuard,
    slow_threshold: Option<Duration>,
}

impl MySqlDriver {
    pub async fn connect(
        url: &str,
        options: DialectOptions,
        slow_threshold: Option<Duration>,
    ) -> Result<Self> {
        let mut conn = MySqlConnection::connect(url).await.map_err(|e| {
            Error::database(format!("Failed to connect to {}: {e}", sanitize_url(url)))
        })?;
        let version: String = sqlx::query_scalar("SELECT CAST(VERSION() AS CHAR)")
            .fetch_one(&mut conn)
            .await
            .map_err(|e| Error::database(format!("Failed to read server version: {e}")))?;
        let dialect = if version.to_ascii_lowercase().contains("mariadb") {
            MySqlDialect::mariadb(options)
        } else {
            MySqlDialect::new(options)
        };
        info!(version = %version, dialect = dialect.name(), "connected");
        Ok(Self {
            conn: Some(conn),
            dialect,
            guard: SessionGuard::new(),
            slow_threshold,
        })
    }

    fn conn(&mut self) -> Result<&mut MySqlConnection> {
        self.guard.ensure_open()?;
        self.conn.as_mut().ok_or_else(|| {
            Error::ConnectionLifecycle("session has already been released".to_string())
        })
    }

    async fn bookkeeping_exists(&mut self, table: &str) -> Result<bool> {
        Ok(self.load_table_names().await?.iter().any(|n| n == table))
    }
}

#[async_trait]
impl SchemaDriver for MySqlDriver {
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
        let schema = self.dialect.options.schema.clone();
        introspect::table_names(self.conn()?, schema.as_deref()).await
    }

    async fn load_tables(&mut self, names: &[String]) -> Result<Vec<Table>> {
        let schema = self.dialect.options.schema.clone();
        let flavor = self.dialect.flavor;
        introspect::load_tables(self.conn()?, schema.as_deref(), flavor, names).await
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
        if let Err(e) = self.execute_sql("START TRANSACTION").await {
            self.guard.restore(SessionState::Idle);
            return Err(e);
        }
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::EntityId;
    use crate::model::Unique;
    use crate::registry::ColumnMode;

    fn column(column_type: ColumnType) -> ColumnMetadata {
        ColumnMetadata {
            entity: EntityId(0),
            embedded: None,
            property_name: "value".into(),
            property_path: "value".into(),
            database_name: "value".into(),
            column_type,
            length: None,
            precision: None,
            scale: None,
            nullable: false,
            unique: false,
            primary: false,
            generation: None,
            default: None,
            mode: ColumnMode::Regular,
            comment: None,
            relation: None,
            referenced_column: None,
        }
    }

    #[test]
    fn varchar_defaults_to_255_and_uuid_to_36() {
        let dialect = MySqlDialect::default();
        assert_eq!(dialect.normalize_length(&column(ColumnType::Varchar)), Some(255));
        assert_eq!(dialect.normalize_type(&column(ColumnType::Uuid)), "varchar");
        assert_eq!(dialect.normalize_length(&column(ColumnType::Uuid)), Some(36));
    }

    #[test]
    fn decimal_precision_defaults() {
        let dialect = MySqlDialect::default();
        assert_eq!(
            dialect.normalize_precision(&column(ColumnType::Decimal)),
            (Some(10), Some(0))
        );
        assert_eq!(dialect.normalize_precision(&column(ColumnType::Int)), (None, None));
    }

    #[test]
    fn uuid_generation_happens_client_side() {
        let dialect = MySqlDialect::default();
        let mut c = column(ColumnType::Uuid);
        c.generation = Some(GenerationStrategy::Uuid);
        assert_eq!(dialect.normalize_generation(&c), None);
        c.generation = Some(GenerationStrategy::Identity);
        assert_eq!(dialect.normalize_generation(&c), Some(GenerationStrategy::Increment));
    }

    #[test]
    fn null_defaults_per_flavor() {
        let mut c = column(ColumnType::Text);
        c.nullable = true;
        c.default = Some(DefaultValue::Null);
        assert_eq!(MySqlDialect::default().normalize_default(&c), None);
        let mariadb = MySqlDialect::mariadb(DialectOptions::default());
        assert_eq!(mariadb.normalize_default(&c).as_deref(), Some("NULL"));
        c.default = None;
        assert_eq!(mariadb.normalize_default(&c).as_deref(), Some("NULL"));
        c.nullable = false;
        assert_eq!(mariadb.normalize_default(&c), None);
    }

    #[test]
    fn booleans_default_to_integers() {
        let mut c = column(ColumnType::Boolean);
        c.default = Some(DefaultValue::Bool(false));
        assert_eq!(MySqlDialect::default().normalize_default(&c).as_deref(), Some("0"));
    }

    #[test]
    fn uniques_become_unique_indexes() {
        let mut table = Table::new("user");
        table.uniques.push(Unique {
            name: "UQ_email".into(),
            columns: vec!["email".into()],
        });
        let mut schema = Schema::new();
        schema.add_table(table);
        let schema = MySqlDialect::default().normalize_schema(schema);
        let table = &schema.tables["user"];
        assert!(table.uniques.is_empty());
        assert_eq!(table.indexes.len(), 1);
        assert!(table.indexes[0].unique);
        assert_eq!(table.indexes[0].name, "UQ_email");
    }
}
