//! Schema synchronization for Postgres (and friends).
//!
//! Describe the tables you want with a [`MetadataGraph`], hand it to a
//! [`Synchronizer`] together with a [`Driver`], and the live database is
//! brought in line in a single transaction: missing tables and columns are
//! created, removed ones dropped, changed ones altered, then indices and
//! foreign keys are rebuilt in an order the database accepts.
//!
//! ```ignore
//! let graph = MetadataGraph::new().table(
//!     Table::new("post")
//!         .primary_column(Column::new("id", "int").generated(GenerationStrategy::Increment))
//!         .column(Column::new("title", "varchar").length(255)),
//! );
//!
//! let (config, _) = Config::load()?;
//! let pool = config.pool()?;
//! let mut driver = config.driver(&pool).await?;
//! let report = Synchronizer::new(&mut driver, &graph).synchronize().await?;
//! println!("{report}");
//! ```
//!
//! Running the same graph twice does nothing the second time. Use
//! [`Synchronizer::plan`] to see what a run would do without doing it.
//!
//! # Layers
//!
//! - [`snapshot`] reads the live schema through [`Introspect`].
//! - [`diff`] compares one desired table with its live counterpart. Pure.
//! - [`sync`] sequences the diffs and executes them through a [`Driver`].
//! - [`postgres`] and [`memory`] are the two drivers.

pub mod compare;
pub mod config;
pub mod diff;
pub mod driver;
mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod snapshot;
pub mod sync;

pub use keel_db_schema::*;

pub use config::{Config, ConfigError};
pub use diff::{Change, ColumnChange, SchemaDiff, TableDiff, diff_table};
pub use driver::{Driver, Introspect, Normalize, Operation, SyncObserver};
pub use error::Error;
pub use memory::MemoryDriver;
pub use postgres::PostgresDriver;
pub use sync::{SyncReport, SyncStep, Synchronizer};

pub type Result<T> = std::result::Result<T, Error>;
