//! A driver that records operations instead of executing them.
//!
//! Used by [`crate::sync::Synchronizer::plan`]: the live schema is loaded
//! through the real driver, then the change steps run against a [`Recorder`]
//! borrowing that driver's normalizer.

use std::collections::BTreeSet;

use keel_db_schema::{Column, DefaultValue, ForeignKey, Index, PrimaryKey, Table};

use crate::Result;
use crate::driver::{CatalogColumn, CatalogIndex, Driver, Introspect, Normalize, Operation};

/// Records every DDL call as an [`Operation`]. Never fails.
pub struct Recorder<'n, N: Normalize + ?Sized> {
    normalizer: &'n N,
    operations: Vec<Operation>,
}

impl<'n, N: Normalize + ?Sized> Recorder<'n, N> {
    pub fn new(normalizer: &'n N) -> Self {
        Self {
            normalizer,
            operations: Vec::new(),
        }
    }

    pub fn into_operations(self) -> Vec<Operation> {
        self.operations
    }

    fn record(&mut self, op: Operation) -> Result<()> {
        tracing::trace!(%op, "recorded");
        self.operations.push(op);
        Ok(())
    }
}

impl<N: Normalize + ?Sized> Normalize for Recorder<'_, N> {
    fn dialect(&self) -> &'static str {
        self.normalizer.dialect()
    }

    fn normalize_type(&self, table: &str, column: &Column) -> Result<String> {
        self.normalizer.normalize_type(table, column)
    }

    fn normalize_default(&self, value: &DefaultValue) -> String {
        self.normalizer.normalize_default(value)
    }
}

/// The recorder sees an empty database. Callers load the live schema elsewhere.
impl<N: Normalize + ?Sized> Introspect for Recorder<'_, N> {
    async fn existing_tables(&mut self, _names: &BTreeSet<String>) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn column_catalog(&mut self, _tables: &[String]) -> Result<Vec<CatalogColumn>> {
        Ok(Vec::new())
    }

    async fn index_catalog(&mut self, _tables: &[String]) -> Result<Vec<CatalogIndex>> {
        Ok(Vec::new())
    }

    async fn foreign_key_catalog(&mut self, _tables: &[String]) -> Result<Vec<ForeignKey>> {
        Ok(Vec::new())
    }

    async fn primary_key_catalog(&mut self, _tables: &[String]) -> Result<Vec<PrimaryKey>> {
        Ok(Vec::new())
    }
}

impl<N: Normalize + ?Sized> Driver for Recorder<'_, N> {
    async fn create_table(&mut self, table: &Table) -> Result<()> {
        self.record(Operation::CreateTable(table.clone()))
    }

    async fn drop_table(&mut self, table: &str) -> Result<()> {
        self.record(Operation::DropTable(table.to_string()))
    }

    async fn add_column(&mut self, table: &Table, column: &Column) -> Result<()> {
        self.record(Operation::AddColumn {
            table: table.name.clone(),
            column: column.clone(),
        })
    }

    async fn drop_column(&mut self, table: &Table, column: &str) -> Result<()> {
        self.record(Operation::DropColumn {
            table: table.name.clone(),
            column: column.to_string(),
        })
    }

    async fn change_column(&mut self, table: &Table, old: &Column, new: &Column) -> Result<()> {
        self.record(Operation::ChangeColumn {
            table: table.name.clone(),
            from: old.clone(),
            to: new.clone(),
        })
    }

    async fn create_foreign_key(&mut self, foreign_key: &ForeignKey) -> Result<()> {
        self.record(Operation::CreateForeignKey(foreign_key.clone()))
    }

    async fn drop_foreign_key(&mut self, table: &str, name: &str) -> Result<()> {
        self.record(Operation::DropForeignKey {
            table: table.to_string(),
            name: name.to_string(),
        })
    }

    async fn create_index(&mut self, table: &str, index: &Index) -> Result<()> {
        self.record(Operation::CreateIndex {
            table: table.to_string(),
            index: index.clone(),
        })
    }

    async fn drop_index(&mut self, table: &str, name: &str) -> Result<()> {
        self.record(Operation::DropIndex {
            table: table.to_string(),
            name: name.to_string(),
        })
    }

    async fn update_primary_keys(
        &mut self,
        table: &Table,
        added: &[String],
        removed: &[String],
    ) -> Result<()> {
        self.record(Operation::UpdatePrimaryKeys {
            table: table.name.clone(),
            added: added.to_vec(),
            removed: removed.to_vec(),
        })
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<()> {
        Ok(())
    }

    async fn rollback_transaction(&mut self) -> Result<()> {
        Ok(())
    }

    async fn release(&mut self) -> Result<()> {
        Ok(())
    }
}
