//! Dialect capability sets and the async driver contract.
//!
//! A [`Dialect`] is pure: it normalises metadata into snapshot form and
//! renders [`MigrationOp`]s to SQL. A [`SchemaDriver`] owns one database
//! session and executes what the dialect renders. Both are selected once when
//! a connection is opened.

pub mod mysql;
pub mod postgres;

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::diff::MigrationOp;
use crate::metadata::ColumnMetadata;
use crate::model::{Column, ForeignKey, Index, PrimaryKey, Schema, Table, Unique, View};
use crate::registry::{ColumnType, DefaultValue, GenerationStrategy};
use crate::util::{escape_string, Error, PlanError, Result};

pub use mysql::{MySqlDialect, MySqlDriver};
pub use postgres::{PostgresDialect, PostgresDriver};

pub const DEFAULT_METADATA_TABLE: &str = "ormold_metadata";
pub const DEFAULT_MIGRATIONS_TABLE: &str = "ormold_migrations";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub unique_constraints: bool,
    pub exclusion_constraints: bool,
    pub check_constraints: bool,
    pub partial_indexes: bool,
    pub alter_column_type: bool,
    pub alter_column_generation: bool,
    pub transactional_ddl: bool,
    /// Whether an explicit `DEFAULT NULL` is distinguishable from no default.
    pub explicit_null_default: bool,
}

impl Capabilities {
    pub fn postgres() -> Self {
        Self {
            unique_constraints: true,
            exclusion_constraints: true,
            check_constraints: true,
            partial_indexes: true,
            alter_column_type: true,
            alter_column_generation: false,
            transactional_ddl: true,
            explicit_null_default: false,
        }
    }

    pub fn mysql() -> Self {
        Self {
            unique_constraints: false,
            exclusion_constraints: false,
            check_constraints: true,
            partial_indexes: false,
            alter_column_type: false,
            alter_column_generation: false,
            transactional_ddl: false,
            explicit_null_default: false,
        }
    }

    pub fn mariadb() -> Self {
        Self {
            explicit_null_default: true,
            ..Self::mysql()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    Postgres,
    Mysql,
    Mariadb,
}

impl DialectKind {
    pub fn from_url(url: &str) -> Option<Self> {
        let scheme = url.split_once("://").map(|(s, _)| s)?;
        match scheme {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "mysql" => Some(Self::Mysql),
            "mariadb" => Some(Self::Mariadb),
            _ => None,
        }
    }

    pub fn dialect(self, options: DialectOptions) -> Box<dyn Dialect> {
        match self {
            Self::Postgres => Box::new(PostgresDialect::new(options)),
            Self::Mysql => Box::new(MySqlDialect::new(options)),
            Self::Mariadb => Box::new(MySqlDialect::mariadb(options)),
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Postgres => write!(f, "postgres"),
            Self::Mysql => write!(f, "mysql"),
            Self::Mariadb => write!(f, "mariadb"),
        }
    }
}

impl FromStr for DialectKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "mysql" => Ok(Self::Mysql),
            "mariadb" => Ok(Self::Mariadb),
            other => Err(Error::config(format!("unknown dialect: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialectOptions {
    /// Schema (Postgres) or database (MySQL) tables live in.
    pub schema: Option<String>,
    pub metadata_table: String,
    pub migrations_table: String,
}

impl Default for DialectOptions {
    fn default() -> Self {
        Self {
            schema: None,
            metadata_table: DEFAULT_METADATA_TABLE.to_string(),
            migrations_table: DEFAULT_MIGRATIONS_TABLE.to_string(),
        }
    }
}

impl DialectOptions {
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }
}

pub trait Dialect: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    fn options(&self) -> &DialectOptions;

    fn escape_identifier(&self, identifier: &str) -> String;

    /// Escaped, schema-qualified path of a table.
    fn table_path(&self, table: &str) -> String {
        match &self.options().schema {
            Some(schema) => format!(
                "{}.{}",
                self.escape_identifier(schema),
                self.escape_identifier(table)
            ),
            None => self.escape_identifier(table),
        }
    }

    /// Type name as the introspector reports it for this column.
    fn normalize_type(&self, column: &ColumnMetadata) -> String;

    fn normalize_length(&self, column: &ColumnMetadata) -> Option<u32> {
        column.length
    }

    /// Precision and scale as reported for exact numeric columns.
    fn normalize_precision(&self, column: &ColumnMetadata) -> (Option<u32>, Option<u32>) {
        if is_exact_numeric(&column.column_type) {
            (column.precision, column.scale)
        } else {
            (None, None)
        }
    }

    fn normalize_default(&self, column: &ColumnMetadata) -> Option<String>;

    fn normalize_generation(&self, column: &ColumnMetadata) -> Option<GenerationStrategy> {
        match column.generation {
            Some(GenerationStrategy::Rowid) => Some(GenerationStrategy::Increment),
            other => other,
        }
    }

    /// Rewrites a snapshot into the shape this dialect can represent.
    fn normalize_schema(&self, schema: Schema) -> Schema {
        schema
    }

    fn render(&self, op: &MigrationOp) -> std::result::Result<Vec<String>, PlanError>;
}

/// Renders a sequence of operations into statements, failing on the first
/// one the dialect cannot express.
pub fn render_ops<'a>(
    dialect: &dyn Dialect,
    ops: impl IntoIterator<Item = &'a MigrationOp>,
) -> std::result::Result<Vec<String>, PlanError> {
    let mut statements = Vec::new();
    for op in ops {
        statements.extend(dialect.render(op)?);
    }
    Ok(statements)
}

pub(crate) fn is_exact_numeric(column_type: &ColumnType) -> bool {
    match column_type {
        ColumnType::Decimal => true,
        ColumnType::Custom(custom) => {
            let lowered = custom.to_ascii_lowercase();
            lowered == "decimal" || lowered == "numeric"
        }
        _ => false,
    }
}

/// Renders a declared default as a SQL literal.
pub(crate) fn default_literal(value: &DefaultValue, true_literal: &str, false_literal: &str) -> String {
    match value {
        DefaultValue::Null => "NULL".to_string(),
        DefaultValue::Raw(raw) => raw.clone(),
        DefaultValue::String(text) => format!("'{}'", escape_string(text)),
        DefaultValue::Number(number) => number.to_string(),
        DefaultValue::Bool(true) => true_literal.to_string(),
        DefaultValue::Bool(false) => false_literal.to_string(),
    }
}

pub(crate) fn format_column_list(dialect: &dyn Dialect, columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| dialect.escape_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A table passed to a DDL call either directly or by name, in which case the
/// driver loads it first.
#[derive(Debug, Clone, Copy)]
pub enum TableRef<'a> {
    Name(&'a str),
    Table(&'a Table),
}

impl<'a> From<&'a str> for TableRef<'a> {
    fn from(name: &'a str) -> Self {
        TableRef::Name(name)
    }
}

impl<'a> From<&'a Table> for TableRef<'a> {
    fn from(table: &'a Table) -> Self {
        TableRef::Table(table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMigration {
    pub id: i64,
    pub timestamp: i64,
    pub name: String,
}

/// One database session able to introspect and execute DDL.
#[async_trait]
pub trait SchemaDriver: Send {
    fn dialect(&self) -> &dyn Dialect;

    async fn execute_sql(&mut self, sql: &str) -> Result<()>;

    /// Tables in the configured schema, bookkeeping tables included.
    async fn load_table_names(&mut self) -> Result<Vec<String>>;

    async fn load_tables(&mut self, names: &[String]) -> Result<Vec<Table>>;

    /// Views recorded in the metadata table.
    async fn load_views(&mut self) -> Result<Vec<View>>;

    async fn load_migrations(&mut self) -> Result<Vec<AppliedMigration>>;

    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    async fn release(&mut self) -> Result<()>;

    fn in_transaction(&self) -> bool;

    async fn savepoint(&mut self, name: &str) -> Result<()> {
        let sql = format!("SAVEPOINT {}", self.dialect().escape_identifier(name));
        self.execute_sql(&sql).await
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        let sql = format!("ROLLBACK TO SAVEPOINT {}", self.dialect().escape_identifier(name));
        self.execute_sql(&sql).await
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        let sql = format!("RELEASE SAVEPOINT {}", self.dialect().escape_identifier(name));
        self.execute_sql(&sql).await
    }

    async fn record_migration(&mut self, timestamp: i64, name: &str) -> Result<()> {
        let sql = crate::bookkeeping::insert_migration_sql(self.dialect(), timestamp, name);
        self.execute_sql(&sql).await
    }

    async fn forget_migration(&mut self, name: &str) -> Result<()> {
        let sql = crate::bookkeeping::delete_migration_sql(self.dialect(), name);
        self.execute_sql(&sql).await
    }

    async fn apply(&mut self, op: &MigrationOp) -> Result<()> {
        let statements = self.dialect().render(op)?;
        let total = statements.len();
        for (executed, sql) in statements.iter().enumerate() {
            match self.execute_sql(sql).await {
                Ok(()) => {}
                Err(err) if executed == 0 => return Err(err),
                Err(err) => {
                    return Err(Error::PartialApply {
                        executed,
                        total,
                        error: Box::new(err),
                    })
                }
            }
        }
        Ok(())
    }

    async fn load_schema(&mut self, names: &[String]) -> Result<Schema> {
        let mut schema = Schema::new();
        for table in self.load_tables(names).await? {
            schema.add_table(table);
        }
        for view in self.load_views().await? {
            schema.views.insert(view.name.clone(), view);
        }
        Ok(schema)
    }

    async fn resolve_table(&mut self, table: TableRef<'_>) -> Result<Table> {
        match table {
            TableRef::Table(table) => Ok(table.clone()),
            TableRef::Name(name) => self
                .load_tables(&[name.to_string()])
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| Error::database(format!("table {name} does not exist"))),
        }
    }

    async fn create_table(&mut self, table: &Table) -> Result<()> {
        self.apply(&MigrationOp::CreateTable(table.clone())).await
    }

    async fn drop_table(&mut self, table: TableRef<'_>) -> Result<()> {
        let table = self.resolve_table(table).await?;
        for foreign_key in &table.foreign_keys {
            self.apply(&MigrationOp::DropForeignKey {
                table: table.name.clone(),
                foreign_key: foreign_key.clone(),
            })
            .await?;
        }
        self.apply(&MigrationOp::DropTable(table.without_foreign_keys())).await
    }

    async fn add_column(&mut self, table: TableRef<'_>, column: Column) -> Result<()> {
        let table = self.resolve_table(table).await?;
        self.apply(&MigrationOp::AddColumn {
            table: table.name,
            column,
        })
        .await
    }

    async fn drop_column(&mut self, table: TableRef<'_>, column: &str) -> Result<()> {
        let table = self.resolve_table(table).await?;
        let existing = table
            .column(column)
            .cloned()
            .ok_or_else(|| Error::database(format!("column {}.{column} does not exist", table.name)))?;
        self.apply(&MigrationOp::DropColumn {
            table: table.name,
            column: existing,
        })
        .await
    }

    async fn change_column(&mut self, table: TableRef<'_>, column: &str, to: Column) -> Result<()> {
        let table = self.resolve_table(table).await?;
        let from = table
            .column(column)
            .cloned()
            .ok_or_else(|| Error::database(format!("column {}.{column} does not exist", table.name)))?;
        let op = if from.type_differs(&to) && !self.dialect().capabilities().alter_column_type {
            self.apply(&MigrationOp::DropColumn {
                table: table.name.clone(),
                column: from,
            })
            .await?;
            MigrationOp::AddColumn {
                table: table.name,
                column: to,
            }
        } else {
            MigrationOp::AlterColumn {
                table: table.name,
                from,
                to,
            }
        };
        self.apply(&op).await
    }

    async fn create_primary_key(&mut self, table: TableRef<'_>, primary_key: PrimaryKey) -> Result<()> {
        let table = self.resolve_table(table).await?;
        self.apply(&MigrationOp::AddPrimaryKey {
            table: table.name,
            primary_key,
        })
        .await
    }

    async fn drop_primary_key(&mut self, table: TableRef<'_>) -> Result<()> {
        let table = self.resolve_table(table).await?;
        let primary_key = table
            .primary_key
            .clone()
            .ok_or_else(|| Error::database(format!("table {} has no primary key", table.name)))?;
        self.apply(&MigrationOp::DropPrimaryKey {
            table: table.name,
            primary_key,
        })
        .await
    }

    async fn create_index(&mut self, table: TableRef<'_>, index: Index) -> Result<()> {
        let table = self.resolve_table(table).await?;
        self.apply(&MigrationOp::AddIndex {
            table: table.name,
            index,
        })
        .await
    }

    async fn drop_index(&mut self, table: TableRef<'_>, name: &str) -> Result<()> {
        let table = self.resolve_table(table).await?;
        let index = find_named(&table.indexes, name, |i| i.name.as_str(), &table.name, "index")?;
        self.apply(&MigrationOp::DropIndex {
            table: table.name,
            index,
        })
        .await
    }

    async fn create_foreign_key(&mut self, table: TableRef<'_>, foreign_key: ForeignKey) -> Result<()> {
        let table = self.resolve_table(table).await?;
        self.apply(&MigrationOp::AddForeignKey {
            table: table.name,
            foreign_key,
        })
        .await
    }

    async fn drop_foreign_key(&mut self, table: TableRef<'_>, name: &str) -> Result<()> {
        let table = self.resolve_table(table).await?;
        let foreign_key = find_named(
            &table.foreign_keys,
            name,
            |f| f.name.as_str(),
            &table.name,
            "foreign key",
        )?;
        self.apply(&MigrationOp::DropForeignKey {
            table: table.name,
            foreign_key,
        })
        .await
    }

    async fn create_unique_constraint(&mut self, table: TableRef<'_>, unique: Unique) -> Result<()> {
        let table = self.resolve_table(table).await?;
        self.apply(&MigrationOp::AddUnique {
            table: table.name,
            unique,
        })
        .await
    }

    async fn drop_unique_constraint(&mut self, table: TableRef<'_>, name: &str) -> Result<()> {
        let table = self.resolve_table(table).await?;
        let unique = find_named(&table.uniques, name, |u| u.name.as_str(), &table.name, "unique")?;
        self.apply(&MigrationOp::DropUnique {
            table: table.name,
            unique,
        })
        .await
    }

    async fn create_check_constraint(
        &mut self,
        table: TableRef<'_>,
        check: crate::model::Check,
    ) -> Result<()> {
        let table = self.resolve_table(table).await?;
        self.apply(&MigrationOp::AddCheck {
            table: table.name,
            check,
        })
        .await
    }

    async fn drop_check_constraint(&mut self, table: TableRef<'_>, name: &str) -> Result<()> {
        let table = self.resolve_table(table).await?;
        let check = find_named(&table.checks, name, |c| c.name.as_str(), &table.name, "check")?;
        self.apply(&MigrationOp::DropCheck {
            table: table.name,
            check,
        })
        .await
    }
}

fn find_named<T: Clone>(
    items: &[T],
    name: &str,
    key: impl Fn(&T) -> &str,
    table: &str,
    what: &str,
) -> Result<T> {
    items
        .iter()
        .find(|item| key(item) == name)
        .cloned()
        .ok_or_else(|| Error::database(format!("{what} {name} does not exist on {table}")))
}

/// Logs a statement and warns when it ran longer than `threshold`.
pub(crate) fn log_statement(sql: &str, started: Instant, threshold: Option<Duration>) {
    let elapsed = started.elapsed();
    debug!(elapsed_ms = elapsed.as_millis() as u64, sql, "executed statement");
    if let Some(threshold) = threshold {
        if elapsed > threshold {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = threshold.as_millis() as u64,
                sql,
                "slow statement"
            );
        }
    }
}

/// Opens a driver for `url`, picking the dialect from the URL scheme unless
/// one is given.
pub async fn connect(
    url: &str,
    kind: Option<DialectKind>,
    options: DialectOptions,
    slow_threshold: Option<Duration>,
) -> Result<Box<dyn SchemaDriver>> {
    let kind = match kind.or_else(|| DialectKind::from_url(url)) {
        Some(kind) => kind,
        None => {
            return Err(Error::config(format!(
                "cannot infer dialect from {}",
                crate::util::sanitize_url(url)
            )))
        }
    };
    match kind {
        DialectKind::Postgres => Ok(Box::new(
            PostgresDriver::connect(url, options, slow_threshold).await?,
        )),
        DialectKind::Mysql | DialectKind::Mariadb => {
            Ok(Box::new(MySqlDriver::connect(url, options, slow_threshold).await?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_kind_from_url() {
        assert_eq!(
            DialectKind::from_url("postgres://localhost/db"),
            Some(DialectKind::Postgres)
        );
        assert_eq!(
            DialectKind::from_url("postgresql://localhost/db"),
            Some(DialectKind::Postgres)
        );
        assert_eq!(DialectKind::from_url("mysql://localhost/db"), Some(DialectKind::Mysql));
        assert_eq!(DialectKind::from_url("sqlite::memory:"), None);
    }

    #[test]
    fn dialect_kind_parses_aliases() {
        assert_eq!("PG".parse::<DialectKind>().ok(), Some(DialectKind::Postgres));
        assert!("oracle".parse::<DialectKind>().is_err());
    }

    #[test]
    fn mariadb_distinguishes_null_defaults() {
        assert!(Capabilities::mariadb().explicit_null_default);
        assert!(!Capabilities::mysql().explicit_null_default);
        assert!(!Capabilities::mysql().unique_constraints);
    }

    #[test]
    fn default_literals() {
        assert_eq!(default_literal(&DefaultValue::String("it's".into()), "true", "false"), "'it''s'");
        assert_eq!(default_literal(&DefaultValue::Bool(true), "1", "0"), "1");
        assert_eq!(default_literal(&DefaultValue::Number(-3), "1", "0"), "-3");
    }

    #[test]
    fn table_path_is_schema_qualified() {
        let dialect = DialectKind::Postgres.dialect(DialectOptions::default().with_schema("app"));
        assert_eq!(dialect.table_path("post"), "\"app\".\"post\"");
        let dialect = DialectKind::Mysql.dialect(DialectOptions::default());
        assert_eq!(dialect.table_path("post"), "`post`");
    }
}
