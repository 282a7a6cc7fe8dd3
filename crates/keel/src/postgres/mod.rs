//! Postgres driver.
//!
//! Introspects `pg_catalog` and `information_schema` for one namespace and
//! executes DDL over a single connection, either checked out of a
//! `deadpool_postgres` pool or opened directly.
//!
//! ```ignore
//! let conn = pool.get().await?;
//! let mut driver = PostgresDriver::new(conn).with_schema("app");
//! let report = Synchronizer::new(&mut driver, &graph).synchronize().await?;
//! ```

mod ddl;
mod introspect;
mod traced;
pub mod types;

use std::collections::BTreeSet;

use keel_db_schema::{Column, DefaultValue, ForeignKey, Index, PrimaryKey, Table};
use tokio_postgres::{Client, NoTls};

use crate::compare::{ColumnAttribute, column_changes};
use crate::driver::{CatalogColumn, CatalogIndex, Driver, Introspect, Normalize};
use crate::{Error, Result};
pub use ddl::{
    add_column_sql, add_primary_key_sql, alter_column_sql, column_definition, comment_sql,
    create_foreign_key_sql, create_index_sql, create_table_sql, drop_column_sql,
    drop_constraint_sql, drop_index_sql, drop_table_sql, qualified,
};
pub use introspect::parse_default;
use traced::Traced;

enum Handle {
    Pooled(deadpool_postgres::Object),
    Direct(Client),
    Released,
}

/// A [`Driver`] for Postgres.
pub struct PostgresDriver {
    handle: Handle,
    schema: String,
}

impl PostgresDriver {
    /// Wrap a pooled connection. [`Driver::release`] hands it back to the pool.
    pub fn new(conn: deadpool_postgres::Object) -> Self {
        Self {
            handle: Handle::Pooled(conn),
            schema: "public".to_string(),
        }
    }

    /// Open a dedicated connection, without TLS.
    pub async fn connect(url: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("postgres connection error: {}", e);
            }
        });
        Ok(Self {
            handle: Handle::Direct(client),
            schema: "public".to_string(),
        })
    }

    /// Work in `schema` instead of `public`.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    fn client(&self) -> Result<&Client> {
        match &self.handle {
            Handle::Pooled(conn) => {
                let client: &Client = conn;
                Ok(client)
            }
            Handle::Direct(client) => Ok(client),
            Handle::Released => Err(Error::Transaction(
                "connection already released".to_string(),
            )),
        }
    }

    fn db(&self) -> Result<Traced<'_>> {
        Ok(Traced::new(self.client()?))
    }

    /// Run `statements` in order, attributing any failure to `operation`.
    async fn run(&self, operation: String, statements: Vec<String>) -> Result<()> {
        let db = self.db()?;
        for sql in &statements {
            db.execute(sql, &[])
                .await
                .map_err(|e| Error::ddl(&operation, e))?;
        }
        Ok(())
    }

    async fn control(&self, statement: &str) -> Result<()> {
        self.db()?
            .batch_execute(statement)
            .await
            .map_err(|e| Error::Transaction(format!("{} failed: {}", statement, e)))
    }
}

impl Normalize for PostgresDriver {
    fn dialect(&self) -> &'static str {
        "postgres"
    }

    fn normalize_type(&self, table: &str, column: &Column) -> Result<String> {
        types::checked_type(self.dialect(), table, column)
    }

    fn normalize_default(&self, value: &DefaultValue) -> String {
        value.to_string()
    }
}

impl Introspect for PostgresDriver {
    async fn existing_tables(&mut self, names: &BTreeSet<String>) -> Result<Vec<String>> {
        let names: Vec<String> = names.iter().cloned().collect();
        introspect::existing_tables(&self.db()?, &self.schema, &names).await
    }

    async fn column_catalog(&mut self, tables: &[String]) -> Result<Vec<CatalogColumn>> {
        introspect::columns(&self.db()?, &self.schema, tables).await
    }

    async fn index_catalog(&mut self, tables: &[String]) -> Result<Vec<CatalogIndex>> {
        introspect::indices(&self.db()?, &self.schema, tables).await
    }

    async fn foreign_key_catalog(&mut self, tables: &[String]) -> Result<Vec<ForeignKey>> {
        introspect::foreign_keys(&self.db()?, &self.schema, tables).await
    }

    async fn primary_key_catalog(&mut self, tables: &[String]) -> Result<Vec<PrimaryKey>> {
        introspect::primary_keys(&self.db()?, &self.schema, tables).await
    }
}

impl Driver for PostgresDriver {
    async fn create_table(&mut self, table: &Table) -> Result<()> {
        let statements = create_table_sql(&self.schema, table)?;
        self.run(format!("create table {}", table.name), statements)
            .await
    }

    async fn drop_table(&mut self, table: &str) -> Result<()> {
        let statements = vec![drop_table_sql(&self.schema, table)];
        self.run(format!("drop table {}", table), statements).await
    }

    async fn add_column(&mut self, table: &Table, column: &Column) -> Result<()> {
        let statements = add_column_sql(&self.schema, &table.name, column)?;
        self.run(format!("add column {}.{}", table.name, column.name), statements)
            .await
    }

    async fn drop_column(&mut self, table: &Table, column: &str) -> Result<()> {
        let statements = drop_column_sql(&self.schema, table, column);
        self.run(format!("drop column {}.{}", table.name, column), statements)
            .await
    }

    async fn change_column(&mut self, table: &Table, old: &Column, new: &Column) -> Result<()> {
        let changed = column_changes(&*self, &table.name, new, old)?;
        if changed.is_empty() {
            return Ok(());
        }

        let unique_constraint = if changed.contains(&ColumnAttribute::Unique) && !new.unique {
            introspect::unique_constraint(&self.db()?, &self.schema, &table.name, &old.name)
                .await?
        } else {
            None
        };

        let statements = alter_column_sql(
            &self.schema,
            &table.name,
            old,
            new,
            &changed,
            unique_constraint.as_deref(),
        )?;
        self.run(format!("alter column {}.{}", table.name, new.name), statements)
            .await
    }

    async fn create_foreign_key(&mut self, foreign_key: &ForeignKey) -> Result<()> {
        let statements = vec![create_foreign_key_sql(&self.schema, foreign_key)];
        self.run(
            format!("create foreign key {} on {}", foreign_key.name, foreign_key.table),
            statements,
        )
        .await
    }

    async fn drop_foreign_key(&mut self, table: &str, name: &str) -> Result<()> {
        let statements = vec![drop_constraint_sql(&self.schema, table, name)];
        self.run(format!("drop foreign key {} on {}", name, table), statements)
            .await
    }

    async fn create_index(&mut self, table: &str, index: &Index) -> Result<()> {
        let statements = vec![create_index_sql(&self.schema, table, index)];
        self.run(format!("create index {} on {}", index.name, table), statements)
            .await
    }

    async fn drop_index(&mut self, table: &str, name: &str) -> Result<()> {
        let statements = vec![drop_index_sql(&self.schema, name)];
        self.run(format!("drop index {} on {}", name, table), statements)
            .await
    }

    async fn update_primary_keys(
        &mut self,
        table: &Table,
        added: &[String],
        removed: &[String],
    ) -> Result<()> {
        let mut columns: Vec<&str> = table
            .primary_key_columns()
            .into_iter()
            .filter(|c| !removed.iter().any(|r| r.as_str() == *c))
            .collect();
        for column in added {
            if !columns.contains(&column.as_str()) {
                columns.push(column);
            }
        }

        let mut statements = Vec::new();
        if let Some(current) =
            introspect::primary_key_constraint(&self.db()?, &self.schema, &table.name).await?
        {
            statements.push(drop_constraint_sql(&self.schema, &table.name, &current));
        }
        if !columns.is_empty() {
            statements.push(add_primary_key_sql(&self.schema, &table.name, &columns));
        }

        self.run(format!("update primary key on {}", table.name), statements)
            .await
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        self.control("BEGIN").await
    }

    async fn commit_transaction(&mut self) -> Result<()> {
        self.control("COMMIT").await
    }

    async fn rollback_transaction(&mut self) -> Result<()> {
        self.control("ROLLBACK").await
    }

    async fn release(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.handle, Handle::Released) {
            Handle::Pooled(_) => tracing::debug!("returning connection to pool"),
            Handle::Direct(_) => tracing::debug!("closing dedicated connection"),
            Handle::Released => {}
        }
        Ok(())
    }
}
