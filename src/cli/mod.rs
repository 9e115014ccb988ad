use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ormold::config::Config;
use ormold::dialect::{self, DialectKind, SchemaDriver};
use ormold::bookkeeping;
use ormold::diff::{desired_schema, plan_changes, DiffOptions};
use ormold::drift::detect_drift;
use ormold::metadata::MetadataGraph;
use ormold::migrate::{generate_migration, MigrationExecutor};
use ormold::model::Schema;
use ormold::sync::{plan_sync, synchronize};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ormold")]
#[command(about = "Entity metadata resolution and reversible schema synchronization", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// JSON configuration file
    #[arg(long, global = true, env = "ORMOLD_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[arg(long, global = true, env = "ORMOLD_DIALECT")]
    dialect: Option<DialectKind>,

    /// Schema (Postgres) or database (MySQL) to synchronize
    #[arg(long, global = true, env = "ORMOLD_SCHEMA")]
    schema: Option<String>,

    /// Glob of JSON declaration files, repeatable
    #[arg(long = "declarations", global = true)]
    declarations: Vec<String>,

    #[arg(long, global = true)]
    entity_prefix: Option<String>,

    /// Also drop tables that no entity maps
    #[arg(long, global = true)]
    drop_unknown_tables: bool,

    #[arg(long, global = true, env = "ORMOLD_MAX_QUERY_EXECUTION_TIME_MS")]
    max_query_execution_time_ms: Option<u64>,

    /// Print machine readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log progress; RUST_LOG takes precedence
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve declarations and print the metadata graph
    Resolve,

    /// Show the DDL a synchronization would run
    Plan {
        /// Plan against an empty database instead of connecting
        #[arg(long)]
        offline: bool,
    },

    /// Synchronize the database with the declarations
    Sync {
        #[arg(long)]
        dry_run: bool,
    },

    /// Report differences between the database and the declarations
    Drift,

    #[command(subcommand)]
    Migrate(MigrateCommands),
}

#[derive(Subcommand)]
enum MigrateCommands {
    /// Write the pending changes as a numbered migration file
    Generate {
        name: String,
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Run every migration not yet recorded
    Run {
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Revert the last applied migration
    Revert {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

impl GlobalArgs {
    fn config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(url) = &self.database_url {
            config.database_url = Some(url.clone());
        }
        if self.dialect.is_some() {
            config.dialect = self.dialect;
        }
        if let Some(schema) = &self.schema {
            config.schema = Some(schema.clone());
        }
        if !self.declarations.is_empty() {
            config.declarations = self.declarations.clone();
        }
        if let Some(prefix) = &self.entity_prefix {
            config.entity_prefix = Some(prefix.clone());
        }
        if self.drop_unknown_tables {
            config.drop_unknown_tables = true;
        }
        if let Some(ms) = self.max_query_execution_time_ms {
            config.max_query_execution_time_ms = Some(ms);
        }
        Ok(config)
    }
}

fn load_graph(config: &Config) -> Result<MetadataGraph> {
    let registry = config.load_registry()?;
    let graph = config
        .build_graph(&registry)
        .context("failed to resolve entity declarations")?;
    info!(entities = graph.len(), "resolved metadata");
    Ok(graph)
}

async fn open(config: &Config) -> Result<Box<dyn SchemaDriver>> {
    let driver = dialect::connect(
        config.database_url()?,
        Some(config.dialect_kind()?),
        config.dialect_options(),
        config.slow_query_threshold(),
    )
    .await?;
    Ok(driver)
}

fn migrations_dir(dir: Option<PathBuf>, config: &Config) -> PathBuf {
    dir.unwrap_or_else(|| PathBuf::from(&config.migrations_dir))
}

fn print_statements(statements: &[String]) {
    if statements.is_empty() {
        println!("-- schema is up to date");
    }
    for statement in statements {
        println!("{statement};");
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "ormold=debug" } else { "ormold=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);
    let config = cli.global.config()?;
    let json = cli.global.json;

    match cli.command {
        Commands::Resolve => {
            let graph = load_graph(&config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&graph)?);
            } else {
                for entity in graph.entities() {
                    let columns: Vec<_> = entity.columns.iter().map(|c| c.database_name.as_str()).collect();
                    println!("{} ({:?}): {}", entity.table_name, entity.kind, columns.join(", "));
                }
            }
            Ok(())
        }
        Commands::Plan { offline } => {
            let graph = load_graph(&config)?;
            let (plan, statements) = if offline {
                let dialect = config.dialect_kind()?.dialect(config.dialect_options());
                let desired = desired_schema(&graph, dialect.as_ref());
                let options = DiffOptions {
                    drop_unknown_tables: false,
                    reserved_tables: bookkeeping::reserved_tables(dialect.as_ref()),
                };
                let plan = plan_changes(&Schema::new(), &desired, dialect.as_ref(), &options)?;
                let statements = plan.up_sql(dialect.as_ref())?;
                (plan, statements)
            } else {
                let mut driver = open(&config).await?;
                let plan = plan_sync(driver.as_mut(), &graph, &config.sync_options()).await?;
                let statements = plan.up_sql(driver.dialect())?;
                driver.release().await?;
                (plan, statements)
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print_statements(&statements);
            }
            Ok(())
        }
        Commands::Sync { dry_run } => {
            let graph = load_graph(&config)?;
            let mut options = config.sync_options();
            options.dry_run = dry_run;
            let mut driver = open(&config).await?;
            let result = synchronize(driver.as_mut(), &graph, &options).await;
            driver.release().await?;
            let report = result?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_statements(&report.statements);
                if report.applied {
                    println!("-- applied {} operations", report.plan.len());
                }
            }
            Ok(())
        }
        Commands::Drift => {
            let graph = load_graph(&config)?;
            let mut driver = open(&config).await?;
            let result = detect_drift(driver.as_mut(), &graph, config.drop_unknown_tables).await;
            driver.release().await?;
            let report = result?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.has_drift {
                for line in report.summary() {
                    println!("{line}");
                }
            } else {
                println!("No drift detected");
            }
            if report.has_drift {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Migrate(command) => run_migrate(command, &config).await,
    }
}

async fn run_migrate(command: MigrateCommands, config: &Config) -> Result<()> {
    match command {
        MigrateCommands::Generate { name, dir } => {
            let graph = load_graph(config)?;
            let mut driver = open(config).await?;
            let plan = plan_sync(driver.as_mut(), &graph, &config.sync_options()).await?;
            let dir = migrations_dir(dir, config);
            let written = generate_migration(&dir, &name, &plan, driver.dialect())?;
            driver.release().await?;
            match written {
                Some(path) => println!("Created {}", path.display()),
                None => println!("No changes, no migration written"),
            }
            Ok(())
        }
        MigrateCommands::Run { dir } => {
            let mut driver = open(config).await?;
            let dir = migrations_dir(dir, config);
            let result = MigrationExecutor::new(driver.as_mut(), dir).run_pending().await;
            driver.release().await?;
            let executed = result?;
            if executed.is_empty() {
                println!("No pending migrations");
            }
            for name in executed {
                println!("Applied {name}");
            }
            Ok(())
        }
        MigrateCommands::Revert { dir } => {
            let mut driver = open(config).await?;
            let dir = migrations_dir(dir, config);
            let result = MigrationExecutor::new(driver.as_mut(), dir).undo_last().await;
            driver.release().await?;
            match result? {
                Some(name) => println!("Reverted {name}"),
                None => println!("No applied migrations"),
            }
            Ok(())
        }
    }
}
