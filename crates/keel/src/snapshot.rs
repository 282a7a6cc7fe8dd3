//! Snapshot loader: materialize the live schema for a set of tables.

use std::collections::BTreeSet;

use keel_db_schema::Table;

use crate::driver::Introspect;
use crate::{Error, Result};

/// Load the live descriptors of every table in `names` that exists.
///
/// Missing tables are skipped, so an empty database yields an empty list.
/// Tables come back in the order the catalog reports them, columns in
/// ordinal order. Nothing is modified.
pub async fn load_table_schemas<I: Introspect + ?Sized>(
    introspect: &mut I,
    names: &BTreeSet<String>,
) -> Result<Vec<Table>> {
    if names.is_empty() {
        return Ok(Vec::new());
    }

    let existing = introspect
        .existing_tables(names)
        .await
        .map_err(introspection("tables"))?;
    if existing.is_empty() {
        return Ok(Vec::new());
    }

    let mut tables: Vec<Table> = existing.iter().map(Table::new).collect();

    for row in introspect
        .column_catalog(&existing)
        .await
        .map_err(introspection("columns"))?
    {
        if let Some(i) = slot(&tables, &row.table) {
            tables[i].columns.push(row.column);
        }
    }

    for row in introspect
        .index_catalog(&existing)
        .await
        .map_err(introspection("indices"))?
    {
        if let Some(i) = slot(&tables, &row.table) {
            tables[i].indices.push(row.index);
        }
    }

    for fk in introspect
        .foreign_key_catalog(&existing)
        .await
        .map_err(introspection("foreign keys"))?
    {
        if let Some(i) = slot(&tables, &fk.table) {
            tables[i].foreign_keys.push(fk);
        }
    }

    for pk in introspect
        .primary_key_catalog(&existing)
        .await
        .map_err(introspection("primary keys"))?
    {
        if let Some(i) = slot(&tables, &pk.table) {
            tables[i].primary_keys.push(pk);
        }
    }

    tracing::debug!(
        requested = names.len(),
        loaded = tables.len(),
        "loaded live schema"
    );
    Ok(tables)
}

fn slot(tables: &[Table], name: &str) -> Option<usize> {
    tables.iter().position(|t| t.name == name)
}

/// Report any catalog failure as an introspection error, keeping ones that already are.
fn introspection(catalog: &'static str) -> impl FnOnce(Error) -> Error {
    move |err| match err {
        err @ Error::Introspection { .. } => err,
        other => Error::Introspection {
            catalog,
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Driver;
    use crate::memory::MemoryDriver;
    use keel_db_schema::{Column, ForeignKey, GenerationStrategy, Index, Schema};

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn seeded() -> MemoryDriver {
        let post = Table::new("post")
            .primary_column(Column::new("id", "int").generated(GenerationStrategy::Increment))
            .column(Column::new("title", "text"));
        let comment = Table::new("comment")
            .primary_column(Column::new("id", "int").generated(GenerationStrategy::Increment))
            .column(Column::new("post_id", "int"))
            .column(Column::new("body", "text"))
            .index(Index::new("comment", &["post_id"], false))
            .foreign_key(ForeignKey::new("comment", &["post_id"], "post", &["id"]));
        MemoryDriver::with_schema(Schema::from_tables([post, comment]))
    }

    #[tokio::test]
    async fn test_loads_requested_tables_only() {
        let mut driver = seeded();
        let tables = driver
            .load_table_schemas(&names(&["comment", "missing"]))
            .await
            .unwrap();

        assert_eq!(tables.len(), 1);
        let comment = &tables[0];
        assert_eq!(comment.name, "comment");
        let columns: Vec<_> = comment.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(columns, vec!["id", "post_id", "body"]);
        assert_eq!(comment.indices.len(), 1);
        assert_eq!(comment.foreign_keys[0].referenced_table, "post");
        assert_eq!(comment.primary_key_columns(), vec!["id"]);
        assert!(!comment.just_created);
    }

    #[tokio::test]
    async fn test_empty_database() {
        let mut driver = MemoryDriver::new();
        let tables = driver.load_table_schemas(&names(&["post"])).await.unwrap();
        assert!(tables.is_empty());

        let tables = driver.load_table_schemas(&BTreeSet::new()).await.unwrap();
        assert!(tables.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_is_read_only() {
        let mut driver = seeded();
        let before = driver.schema().clone();
        driver
            .load_table_schemas(&names(&["post", "comment"]))
            .await
            .unwrap();
        assert_eq!(driver.schema(), &before);
        assert!(driver.operations().is_empty());
    }
}
