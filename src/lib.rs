//! ormold - entity metadata resolution and reversible schema synchronization.
//!
//! Declarations are collected into a [`registry::Registry`], resolved into an
//! immutable [`metadata::MetadataGraph`] and reconciled against a live
//! database through a [`dialect::SchemaDriver`].
//!
//! ```no_run
//! use ormold::builder::resolve;
//! use ormold::dialect::{self, DialectOptions};
//! use ormold::registry::{ColumnOptions, ColumnType, Registry, TableOptions};
//! use ormold::sync::{synchronize, SyncOptions};
//!
//! # async fn example() -> ormold::util::Result<()> {
//! let mut registry = Registry::new();
//! registry
//!     .table("Post", TableOptions::default())
//!     .column("Post", "id", ColumnOptions::primary_generated())
//!     .column("Post", "title", ColumnOptions::of(ColumnType::Varchar));
//! let graph = resolve(&registry)?;
//!
//! let mut driver = dialect::connect("postgres://localhost/app", None, DialectOptions::default(), None).await?;
//! let report = synchronize(driver.as_mut(), &graph, &SyncOptions::default()).await?;
//! println!("{} operations", report.plan.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`registry`] - Raw declaration records
//! - [`builder`] - Resolution of declarations into the metadata graph
//! - [`model`] - Schema snapshot types
//! - [`diff`] - Schema comparison and reversible migration planning
//! - [`dialect`] - Postgres and MySQL dialects and drivers
//! - [`sync`] - Synchronization runs with inverse rollback

pub mod bookkeeping;
pub mod builder;
pub mod config;
pub mod dialect;
pub mod diff;
pub mod drift;
pub mod metadata;
pub mod migrate;
pub mod model;
pub mod naming;
pub mod registry;
pub mod session;
pub mod sync;
pub mod util;
