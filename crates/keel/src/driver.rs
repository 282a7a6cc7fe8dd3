//! The driver capability: what a dialect has to provide for synchronization.
//!
//! The differ only needs [`Normalize`]. The snapshot loader needs
//! [`Introspect`]. The synchronizer needs the full [`Driver`]. Each dialect
//! implements these once; nothing above this layer knows any SQL.

use std::collections::BTreeSet;
use std::fmt;

use keel_db_schema::{Column, DefaultValue, ForeignKey, Index, PrimaryKey, Table};

use crate::Result;

/// Type and default normalization for one dialect.
///
/// Both functions must be pure: the same input always yields the same string.
/// Repeated runs compare normalized strings, so any drift here shows up as a
/// column change on every run.
pub trait Normalize {
    /// Short dialect name used in messages (`postgres`, `memory`).
    fn dialect(&self) -> &'static str;

    /// Canonical type string for a column's base type, length, precision and scale.
    ///
    /// Fails with [`crate::Error::UnsupportedType`] when the dialect has no mapping.
    fn normalize_type(&self, table: &str, column: &Column) -> Result<String>;

    /// Canonical text for a default value.
    fn normalize_default(&self, value: &DefaultValue) -> String;
}

/// A column row from the column catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogColumn {
    pub table: String,
    pub column: Column,
}

/// An index row from the index catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogIndex {
    pub table: String,
    pub index: Index,
}

/// Read-only catalog queries, each restricted to the given tables.
#[allow(async_fn_in_trait)]
pub trait Introspect {
    /// Which of `names` exist.
    async fn existing_tables(&mut self, names: &BTreeSet<String>) -> Result<Vec<String>>;

    /// Columns of `tables`, in ordinal order per table.
    async fn column_catalog(&mut self, tables: &[String]) -> Result<Vec<CatalogColumn>>;

    /// Standalone indices of `tables` (not the ones backing constraints).
    async fn index_catalog(&mut self, tables: &[String]) -> Result<Vec<CatalogIndex>>;

    /// Foreign keys owned by `tables`.
    async fn foreign_key_catalog(&mut self, tables: &[String]) -> Result<Vec<ForeignKey>>;

    /// Primary key columns of `tables`, in key order.
    async fn primary_key_catalog(&mut self, tables: &[String]) -> Result<Vec<PrimaryKey>>;
}

/// Full driver capability used by the synchronizer.
///
/// Every method runs on the single connection the driver owns. Callers
/// never issue two of these concurrently.
#[allow(async_fn_in_trait)]
pub trait Driver: Normalize + Introspect {
    /// Materialize the live schema for `names`. Missing tables are skipped.
    async fn load_table_schemas(&mut self, names: &BTreeSet<String>) -> Result<Vec<Table>> {
        crate::snapshot::load_table_schemas(self, names).await
    }

    /// Create a table with its columns, primary key and column-level unique
    /// constraints. Indices and foreign keys are created separately.
    async fn create_table(&mut self, table: &Table) -> Result<()>;

    async fn drop_table(&mut self, table: &str) -> Result<()>;

    async fn add_column(&mut self, table: &Table, column: &Column) -> Result<()>;

    /// Drop a column. `table` is the live descriptor before the drop.
    async fn drop_column(&mut self, table: &Table, column: &str) -> Result<()>;

    /// Bring `old` in line with `new` (same name).
    async fn change_column(&mut self, table: &Table, old: &Column, new: &Column) -> Result<()>;

    async fn create_foreign_key(&mut self, foreign_key: &ForeignKey) -> Result<()>;

    async fn drop_foreign_key(&mut self, table: &str, name: &str) -> Result<()>;

    async fn create_index(&mut self, table: &str, index: &Index) -> Result<()>;

    async fn drop_index(&mut self, table: &str, name: &str) -> Result<()>;

    /// Rebuild the primary key of `table` (live, before the change) with
    /// `added` columns joined and `removed` columns left out.
    async fn update_primary_keys(
        &mut self,
        table: &Table,
        added: &[String],
        removed: &[String],
    ) -> Result<()>;

    async fn begin_transaction(&mut self) -> Result<()>;

    async fn commit_transaction(&mut self) -> Result<()>;

    async fn rollback_transaction(&mut self) -> Result<()>;

    /// Give the underlying connection back. Called once at the end of a run.
    async fn release(&mut self) -> Result<()>;
}

/// One schema-changing call made against a driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    CreateTable(Table),
    DropTable(String),
    AddColumn {
        table: String,
        column: Column,
    },
    DropColumn {
        table: String,
        column: String,
    },
    ChangeColumn {
        table: String,
        from: Column,
        to: Column,
    },
    CreateForeignKey(ForeignKey),
    DropForeignKey {
        table: String,
        name: String,
    },
    CreateIndex {
        table: String,
        index: Index,
    },
    DropIndex {
        table: String,
        name: String,
    },
    UpdatePrimaryKeys {
        table: String,
        added: Vec<String>,
        removed: Vec<String>,
    },
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateTable(t) => write!(f, "+ table {}", t.name),
            Operation::DropTable(name) => write!(f, "- table {}", name),
            Operation::AddColumn { table, column } => {
                let nullable = if column.nullable { " (nullable)" } else { "" };
                write!(
                    f,
                    "+ {}.{}: {}{}",
                    table, column.name, column.column_type, nullable
                )
            }
            Operation::DropColumn { table, column } => write!(f, "- {}.{}", table, column),
            Operation::ChangeColumn { table, from, to } => write!(
                f,
                "~ {}.{}: {} -> {}",
                table, to.name, from.column_type, to.column_type
            ),
            Operation::CreateForeignKey(fk) => write!(
                f,
                "+ FOREIGN KEY {} {}({}) -> {}({})",
                fk.name,
                fk.table,
                fk.columns.join(", "),
                fk.referenced_table,
                fk.referenced_columns.join(", ")
            ),
            Operation::DropForeignKey { table, name } => {
                write!(f, "- FOREIGN KEY {} on {}", name, table)
            }
            Operation::CreateIndex { table, index } => {
                let unique = if index.unique { "UNIQUE " } else { "" };
                write!(
                    f,
                    "+ {}INDEX {} on {} ({})",
                    unique,
                    index.name,
                    table,
                    index.columns.join(", ")
                )
            }
            Operation::DropIndex { table, name } => write!(f, "- INDEX {} on {}", name, table),
            Operation::UpdatePrimaryKeys {
                table,
                added,
                removed,
            } => {
                write!(f, "~ PRIMARY KEY {}", table)?;
                for col in added {
                    write!(f, " +{}", col)?;
                }
                for col in removed {
                    write!(f, " -{}", col)?;
                }
                Ok(())
            }
        }
    }
}

/// Receives the human-readable progress lines of a synchronization run.
///
/// Purely informational. Lines go to `tracing` whether or not an observer is set.
pub trait SyncObserver {
    fn log(&mut self, line: &str);
}

impl<F: FnMut(&str)> SyncObserver for F {
    fn log(&mut self, line: &str) {
        self(line)
    }
}
