//! An in-memory driver.
//!
//! Holds a [`Schema`] and applies DDL to it with the checks a real database
//! would make: tables and columns must exist, names must be free, foreign
//! keys must point at a key of the referenced table, and nothing may be
//! dropped while a foreign key still uses it. Transactions snapshot the
//! schema on begin and restore it on rollback.
//!
//! Types use the Postgres vocabulary, so `int` and `integer` compare equal.

use std::collections::BTreeSet;
use std::fmt;

use keel_db_schema::{Column, DefaultValue, ForeignKey, Index, PrimaryKey, Schema, Table};

use crate::diff::dependents;
use crate::driver::{CatalogColumn, CatalogIndex, Driver, Introspect, Normalize, Operation};
use crate::postgres::types::checked_type;
use crate::{Error, Result};

type FailWhen = Box<dyn Fn(&Operation) -> bool + Send + Sync>;

/// A [`Driver`] over an in-memory [`Schema`].
#[derive(Default)]
pub struct MemoryDriver {
    schema: Schema,
    saved: Option<Schema>,
    operations: Vec<Operation>,
    fail_when: Option<FailWhen>,
    commits: usize,
    rollbacks: usize,
    releases: usize,
}

impl fmt::Debug for MemoryDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDriver")
            .field("tables", &self.schema.tables.len())
            .field("in_transaction", &self.saved.is_some())
            .field("operations", &self.operations.len())
            .finish()
    }
}

impl MemoryDriver {
    /// An empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// A database that already contains `schema`.
    pub fn with_schema(schema: Schema) -> Self {
        Self {
            schema,
            ..Self::default()
        }
    }

    /// Fail the first operation matching `predicate`, and every one after it.
    pub fn fail_when(
        mut self,
        predicate: impl Fn(&Operation) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.fail_when = Some(Box::new(predicate));
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Operations applied so far, including ones later rolled back.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn clear_operations(&mut self) {
        self.operations.clear();
    }

    pub fn in_transaction(&self) -> bool {
        self.saved.is_some()
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks
    }

    pub fn releases(&self) -> usize {
        self.releases
    }

    fn table(&self, name: &str) -> Result<&Table> {
        self.schema
            .get_table(name)
            .ok_or_else(|| missing(format!("relation \"{}\" does not exist", name)))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.schema
            .get_table_mut(name)
            .ok_or_else(|| missing(format!("relation \"{}\" does not exist", name)))
    }

    /// Record `op`, or fail it if it was marked for failure.
    fn apply(&mut self, op: Operation) -> Result<()> {
        if let Some(fail) = &self.fail_when
            && fail(&op)
        {
            return Err(Error::ddl(&op, "injected failure"));
        }
        self.operations.push(op);
        Ok(())
    }

    /// Whether `columns` of `table` form its primary key or carry a unique constraint.
    fn is_unique_key(&self, table: &Table, columns: &[String]) -> bool {
        let mut pk = table.primary_key_columns();
        pk.sort_unstable();
        let mut wanted: Vec<&str> = columns.iter().map(String::as_str).collect();
        wanted.sort_unstable();

        if !pk.is_empty() && pk == wanted {
            return true;
        }
        if let [single] = columns
            && table.get_column(single).is_some_and(|c| c.unique)
        {
            return true;
        }
        table.indices.iter().any(|idx| {
            let mut covered: Vec<&str> = idx.columns.iter().map(String::as_str).collect();
            covered.sort_unstable();
            idx.unique && covered == wanted
        })
    }

    fn check_references(&self, table: &str, what: &str) -> Result<()> {
        let users: Vec<&str> = self
            .schema
            .iter_tables()
            .flat_map(|t| &t.foreign_keys)
            .filter(|fk| fk.referenced_table == table && fk.table != table)
            .map(|fk| fk.name.as_str())
            .collect();
        if users.is_empty() {
            Ok(())
        } else {
            Err(Error::DependencyResolution(format!(
                "cannot drop {}: still referenced by {}",
                what,
                users.join(", ")
            )))
        }
    }
}

fn missing(message: String) -> Error {
    Error::ddl("memory", message)
}

impl Normalize for MemoryDriver {
    fn dialect(&self) -> &'static str {
        "memory"
    }

    fn normalize_type(&self, table: &str, column: &Column) -> Result<String> {
        checked_type(self.dialect(), table, column)
    }

    fn normalize_default(&self, value: &DefaultValue) -> String {
        value.to_string()
    }
}

impl Introspect for MemoryDriver {
    async fn existing_tables(&mut self, names: &BTreeSet<String>) -> Result<Vec<String>> {
        Ok(self
            .schema
            .iter_tables()
            .filter(|t| names.contains(&t.name))
            .map(|t| t.name.clone())
            .collect())
    }

    async fn column_catalog(&mut self, tables: &[String]) -> Result<Vec<CatalogColumn>> {
        let mut rows = Vec::new();
        for name in tables {
            for column in &self.table(name)?.columns {
                rows.push(CatalogColumn {
                    table: name.clone(),
                    column: column.clone(),
                });
            }
        }
        Ok(rows)
    }

    async fn index_catalog(&mut self, tables: &[String]) -> Result<Vec<CatalogIndex>> {
        let mut rows = Vec::new();
        for name in tables {
            for index in &self.table(name)?.indices {
                rows.push(CatalogIndex {
                    table: name.clone(),
                    index: index.clone(),
                });
            }
        }
        Ok(rows)
    }

    async fn foreign_key_catalog(&mut self, tables: &[String]) -> Result<Vec<ForeignKey>> {
        let mut rows = Vec::new();
        for name in tables {
            rows.extend(self.table(name)?.foreign_keys.iter().cloned());
        }
        Ok(rows)
    }

    async fn primary_key_catalog(&mut self, tables: &[String]) -> Result<Vec<PrimaryKey>> {
        let mut rows = Vec::new();
        for name in tables {
            rows.extend(self.table(name)?.primary_keys.iter().cloned());
        }
        Ok(rows)
    }
}

impl Driver for MemoryDriver {
    async fn create_table(&mut self, table: &Table) -> Result<()> {
        if self.schema.get_table(&table.name).is_some() {
            return Err(missing(format!("relation \"{}\" already exists", table.name)));
        }
        table.validate()?;
        for column in &table.columns {
            self.normalize_type(&table.name, column)?;
        }

        self.apply(Operation::CreateTable(table.clone()))?;
        let mut stored = table.clone();
        stored.just_created = false;
        self.schema.tables.insert(stored.name.clone(), stored);
        Ok(())
    }

    async fn drop_table(&mut self, table: &str) -> Result<()> {
        self.table(table)?;
        self.check_references(table, &format!("table {}", table))?;

        self.apply(Operation::DropTable(table.to_string()))?;
        self.schema.tables.shift_remove(table);
        Ok(())
    }

    async fn add_column(&mut self, table: &Table, column: &Column) -> Result<()> {
        if self.table(&table.name)?.has_column(&column.name) {
            return Err(missing(format!(
                "column \"{}\" of relation \"{}\" already exists",
                column.name, table.name
            )));
        }
        self.normalize_type(&table.name, column)?;

        self.apply(Operation::AddColumn {
            table: table.name.clone(),
            column: column.clone(),
        })?;
        self.table_mut(&table.name)?.columns.push(column.clone());
        Ok(())
    }

    async fn drop_column(&mut self, table: &Table, column: &str) -> Result<()> {
        if !self.table(&table.name)?.has_column(column) {
            return Err(missing(format!(
                "column \"{}\" of relation \"{}\" does not exist",
                column, table.name
            )));
        }
        let tables: Vec<Table> = self.schema.iter_tables().cloned().collect();
        let deps = dependents(&tables, &table.name, column);
        if !deps.is_empty() {
            let mut users: Vec<String> = deps.foreign_keys.into_iter().map(|fk| fk.name).collect();
            users.extend(deps.indices);
            return Err(Error::DependencyResolution(format!(
                "cannot drop column {}.{}: still used by {}",
                table.name,
                column,
                users.join(", ")
            )));
        }

        self.apply(Operation::DropColumn {
            table: table.name.clone(),
            column: column.to_string(),
        })?;
        self.table_mut(&table.name)?.remove_column(column);
        Ok(())
    }

    async fn change_column(&mut self, table: &Table, old: &Column, new: &Column) -> Result<()> {
        if !self.table(&table.name)?.has_column(&old.name) {
            return Err(missing(format!(
                "column \"{}\" of relation \"{}\" does not exist",
                old.name, table.name
            )));
        }
        self.normalize_type(&table.name, new)?;

        self.apply(Operation::ChangeColumn {
            table: table.name.clone(),
            from: old.clone(),
            to: new.clone(),
        })?;
        self.table_mut(&table.name)?.replace_column(new.clone());
        Ok(())
    }

    async fn create_foreign_key(&mut self, foreign_key: &ForeignKey) -> Result<()> {
        let owner = self.table(&foreign_key.table)?;
        if owner
            .foreign_keys
            .iter()
            .any(|fk| fk.name == foreign_key.name)
        {
            return Err(missing(format!(
                "constraint \"{}\" already exists",
                foreign_key.name
            )));
        }
        if let Some(col) = foreign_key.columns.iter().find(|c| !owner.has_column(c)) {
            return Err(missing(format!(
                "column \"{}\" referenced in foreign key constraint does not exist",
                col
            )));
        }

        let dangling = || {
            Error::DependencyResolution(format!(
                "foreign key {} points at {}({}), which is not a key",
                foreign_key.name,
                foreign_key.referenced_table,
                foreign_key.referenced_columns.join(", ")
            ))
        };
        let target = self
            .schema
            .get_table(&foreign_key.referenced_table)
            .ok_or_else(dangling)?;
        if !foreign_key
            .referenced_columns
            .iter()
            .all(|c| target.has_column(c))
            || !self.is_unique_key(target, &foreign_key.referenced_columns)
        {
            return Err(dangling());
        }

        self.apply(Operation::CreateForeignKey(foreign_key.clone()))?;
        self.table_mut(&foreign_key.table)?
            .foreign_keys
            .push(foreign_key.clone());
        Ok(())
    }

    async fn drop_foreign_key(&mut self, table: &str, name: &str) -> Result<()> {
        if self.table(table)?.get_foreign_key(name).is_none() {
            return Err(missing(format!("constraint \"{}\" does not exist", name)));
        }

        self.apply(Operation::DropForeignKey {
            table: table.to_string(),
            name: name.to_string(),
        })?;
        self.table_mut(table)?.remove_foreign_key(name);
        Ok(())
    }

    async fn create_index(&mut self, table: &str, index: &Index) -> Result<()> {
        let owner = self.table(table)?;
        if owner.get_index(&index.name).is_some() {
            return Err(missing(format!("relation \"{}\" already exists", index.name)));
        }
        if let Some(col) = index.columns.iter().find(|c| !owner.has_column(c)) {
            return Err(missing(format!("column \"{}\" does not exist", col)));
        }

        self.apply(Operation::CreateIndex {
            table: table.to_string(),
            index: index.clone(),
        })?;
        self.table_mut(table)?.indices.push(index.clone());
        Ok(())
    }

    async fn drop_index(&mut self, table: &str, name: &str) -> Result<()> {
        let owner = self.table(table)?;
        let Some(index) = owner.get_index(name) else {
            return Err(missing(format!("index \"{}\" does not exist", name)));
        };
        let backs_key = self
            .schema
            .iter_tables()
            .flat_map(|t| &t.foreign_keys)
            .any(|fk| {
                fk.referenced_table == table
                    && index.unique
                    && fk.referenced_columns.len() == index.columns.len()
                    && fk.referenced_columns.iter().all(|c| index.covers(c))
                    && !fk.referenced_columns.iter().all(|c| owner.is_primary(c))
            });
        if backs_key {
            return Err(Error::DependencyResolution(format!(
                "cannot drop index {}: a foreign key depends on it",
                name
            )));
        }

        self.apply(Operation::DropIndex {
            table: table.to_string(),
            name: name.to_string(),
        })?;
        self.table_mut(table)?.remove_index(name);
        Ok(())
    }

    async fn update_primary_keys(
        &mut self,
        table: &Table,
        added: &[String],
        removed: &[String],
    ) -> Result<()> {
        let owner = self.table(&table.name)?;
        if let Some(col) = added.iter().find(|c| !owner.has_column(c)) {
            return Err(missing(format!("column \"{}\" does not exist", col)));
        }
        let key = owner.primary_key_columns();
        let users: Vec<&str> = self
            .schema
            .iter_tables()
            .flat_map(|t| &t.foreign_keys)
            .filter(|fk| {
                fk.referenced_table == table.name
                    && fk.referenced_columns.iter().all(|c| key.contains(&c.as_str()))
            })
            .map(|fk| fk.name.as_str())
            .collect();
        if !users.is_empty() {
            return Err(Error::DependencyResolution(format!(
                "cannot change primary key of {}: still referenced by {}",
                table.name,
                users.join(", ")
            )));
        }

        self.apply(Operation::UpdatePrimaryKeys {
            table: table.name.clone(),
            added: added.to_vec(),
            removed: removed.to_vec(),
        })?;
        let owner = self.table_mut(&table.name)?;
        owner.primary_keys.retain(|pk| !removed.contains(&pk.column));
        for column in added {
            if !owner.is_primary(column) {
                owner.primary_keys.push(PrimaryKey {
                    table: table.name.clone(),
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        if self.saved.is_some() {
            return Err(Error::Transaction("transaction already open".to_string()));
        }
        self.saved = Some(self.schema.clone());
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<()> {
        if self.saved.take().is_none() {
            return Err(Error::Transaction("no transaction open".to_string()));
        }
        self.commits += 1;
        Ok(())
    }

    async fn rollback_transaction(&mut self) -> Result<()> {
        let Some(saved) = self.saved.take() else {
            return Err(Error::Transaction("no transaction open".to_string()));
        };
        self.schema = saved;
        self.rollbacks += 1;
        Ok(())
    }

    async fn release(&mut self) -> Result<()> {
        if let Some(saved) = self.saved.take() {
            tracing::warn!("released with an open transaction, rolling back");
            self.schema = saved;
            self.rollbacks += 1;
        }
        self.releases += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_db_schema::GenerationStrategy;

    fn post() -> Table {
        Table::new("post")
            .primary_column(Column::new("id", "int").generated(GenerationStrategy::Increment))
            .column(Column::new("title", "text"))
    }

    fn comment_fk() -> ForeignKey {
        ForeignKey::new("comment", &["post_id"], "post", &["id"])
    }

    fn comment() -> Table {
        Table::new("comment")
            .primary_column(Column::new("id", "int").generated(GenerationStrategy::Increment))
            .column(Column::new("post_id", "int"))
    }

    #[tokio::test]
    async fn test_rollback_restores_schema() {
        let mut driver = MemoryDriver::with_schema(Schema::from_tables([post()]));
        let before = driver.schema().clone();

        driver.begin_transaction().await.unwrap();
        driver.create_table(&comment()).await.unwrap();
        driver
            .add_column(&post(), &Column::new("body", "text"))
            .await
            .unwrap();
        driver.rollback_transaction().await.unwrap();

        assert_eq!(driver.schema(), &before);
        assert_eq!(driver.rollbacks(), 1);
        assert_eq!(driver.operations().len(), 2);
    }

    #[tokio::test]
    async fn test_foreign_key_needs_key_target() {
        let mut driver = MemoryDriver::with_schema(Schema::from_tables([post(), comment()]));
        driver.create_foreign_key(&comment_fk()).await.unwrap();

        let to_title = ForeignKey::new("comment", &["post_id"], "post", &["title"]).name("fk_title");
        assert!(matches!(
            driver.create_foreign_key(&to_title).await,
            Err(Error::DependencyResolution(_))
        ));

        let to_nowhere = ForeignKey::new("comment", &["post_id"], "author", &["id"]).name("fk_x");
        assert!(matches!(
            driver.create_foreign_key(&to_nowhere).await,
            Err(Error::DependencyResolution(_))
        ));
    }

    #[tokio::test]
    async fn test_cannot_drop_referenced_column() {
        let mut driver = MemoryDriver::with_schema(Schema::from_tables([post(), comment()]));
        driver.create_foreign_key(&comment_fk()).await.unwrap();

        let err = driver.drop_column(&post(), "id").await.unwrap_err();
        assert!(matches!(err, Error::DependencyResolution(_)));

        driver
            .drop_foreign_key("comment", "fk_comment_post_id")
            .await
            .unwrap();
        driver.drop_column(&post(), "id").await.unwrap();
        assert!(driver.schema().get_table("post").unwrap().primary_keys.is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let mut driver = MemoryDriver::new()
            .fail_when(|op| matches!(op, Operation::CreateTable(t) if t.name == "comment"));
        driver.create_table(&post()).await.unwrap();

        let err = driver.create_table(&comment()).await.unwrap_err();
        assert!(matches!(err, Error::DdlExecution { .. }));
        assert!(driver.schema().get_table("comment").is_none());
        assert_eq!(driver.operations().len(), 1);
    }

    #[tokio::test]
    async fn test_transaction_misuse() {
        let mut driver = MemoryDriver::new();
        assert!(matches!(
            driver.commit_transaction().await,
            Err(Error::Transaction(_))
        ));
        driver.begin_transaction().await.unwrap();
        assert!(matches!(
            driver.begin_transaction().await,
            Err(Error::Transaction(_))
        ));
        driver.release().await.unwrap();
        assert!(!driver.in_transaction());
        assert_eq!(driver.releases(), 1);
    }
}
