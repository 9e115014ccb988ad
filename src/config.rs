//! Connection and synchronization settings, read from a JSON file and
//! overridden field by field from the command line.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::builder::{BuildOptions, MetadataBuilder};
use crate::dialect::{DialectKind, DialectOptions, DEFAULT_METADATA_TABLE, DEFAULT_MIGRATIONS_TABLE};
use crate::metadata::MetadataGraph;
use crate::naming::DefaultNamingStrategy;
use crate::registry::Registry;
use crate::sync::SyncOptions;
use crate::util::{sanitize_url, Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database_url: Option<String>,
    /// Inferred from the URL scheme when absent.
    pub dialect: Option<DialectKind>,
    pub schema: Option<String>,
    pub entity_prefix: Option<String>,
    pub metadata_table_name: String,
    pub migrations_table_name: String,
    pub drop_unknown_tables: bool,
    /// Statements running longer than this are logged as slow.
    pub max_query_execution_time_ms: Option<u64>,
    /// Glob patterns of JSON declaration files.
    pub declarations: Vec<String>,
    pub migrations_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            dialect: None,
            schema: None,
            entity_prefix: None,
            metadata_table_name: DEFAULT_METADATA_TABLE.to_string(),
            migrations_table_name: DEFAULT_MIGRATIONS_TABLE.to_string(),
            drop_unknown_tables: false,
            max_query_execution_time_ms: None,
            declarations: Vec::new(),
            migrations_dir: "migrations".to_string(),
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::config(format!("Invalid configuration: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read configuration {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
    }

    pub fn database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| Error::config("no database url configured"))
    }

    pub fn dialect_kind(&self) -> Result<DialectKind> {
        if let Some(kind) = self.dialect {
            return Ok(kind);
        }
        let url = self.database_url()?;
        DialectKind::from_url(url).ok_or_else(|| {
            Error::config(format!("cannot infer dialect from {}", sanitize_url(url)))
        })
    }

    pub fn dialect_options(&self) -> DialectOptions {
        DialectOptions {
            schema: self.schema.clone(),
            metadata_table: self.metadata_table_name.clone(),
            migrations_table: self.migrations_table_name.clone(),
        }
    }

    pub fn slow_query_threshold(&self) -> Option<Duration> {
        self.max_query_execution_time_ms.map(Duration::from_millis)
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions::default().drop_unknown_tables(self.drop_unknown_tables)
    }

    pub fn load_registry(&self) -> Result<Registry> {
        if self.declarations.is_empty() {
            return Err(Error::config("no declaration files configured"));
        }
        let mut registry = Registry::new();
        for pattern in &self.declarations {
            registry.extend(Registry::load_glob(pattern)?);
        }
        Ok(registry)
    }

    pub fn build_graph(&self, registry: &Registry) -> Result<MetadataGraph> {
        let options = BuildOptions {
            entity_prefix: self.entity_prefix.clone(),
            schema: self.schema.clone(),
        };
        Ok(MetadataBuilder::new(registry, &DefaultNamingStrategy)
            .with_options(options)
            .build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = Config::from_json(r#"{"database_url": "postgres://localhost/app"}"#).unwrap();
        assert_eq!(config.metadata_table_name, "ormold_metadata");
        assert_eq!(config.migrations_table_name, "ormold_migrations");
        assert!(!config.drop_unknown_tables);
        assert_eq!(config.dialect_kind().unwrap(), DialectKind::Postgres);
    }

    #[test]
    fn explicit_dialect_wins_over_url() {
        let config = Config::from_json(
            r#"{"database_url": "mysql://localhost/app", "dialect": "mariadb", "max_query_execution_time_ms": 250}"#,
        )
        .unwrap();
        assert_eq!(config.dialect_kind().unwrap(), DialectKind::Mariadb);
        assert_eq!(config.slow_query_threshold(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            Config::from_json(r#"{"databse_url": "postgres://x"}"#),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn missing_url_is_a_config_error() {
        let err = Config::default().dialect_kind().unwrap_err();
        assert!(err.to_string().contains("no database url"));
    }

    #[test]
    fn dialect_options_carry_table_names() {
        let config = Config {
            schema: Some("app".into()),
            metadata_table_name: "meta".into(),
            ..Config::default()
        };
        let options = config.dialect_options();
        assert_eq!(options.schema.as_deref(), Some("app"));
        assert_eq!(options.metadata_table, "meta");
        assert_eq!(options.migrations_table, "ormold_migrations");
    }
}
