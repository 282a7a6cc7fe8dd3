//! The desired-state metadata graph.
//!
//! Built by whatever collects entity metadata, then handed to the
//! synchronizer by reference. Nothing in keel mutates it.

use crate::{Column, ForeignKey, Index, ReferentialAction, SchemaError, Table};
use std::collections::HashSet;

/// How an entity maps onto physical storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TableKind {
    /// A table of its own.
    #[default]
    Regular,
    /// Implicit table backing a many-to-many relation.
    Junction,
    /// Child in single-table inheritance; shares the parent's table.
    SingleTableChild,
}

impl TableKind {
    /// Whether tables of this kind own their physical table.
    pub fn is_synchronized(&self) -> bool {
        matches!(self, TableKind::Regular | TableKind::Junction)
    }
}

/// One desired table plus the flags that decide whether it gets synchronized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMetadata {
    pub table: Table,
    pub kind: TableKind,
    pub skip_sync: bool,
}

impl EntityMetadata {
    pub fn regular(table: Table) -> Self {
        Self {
            table,
            kind: TableKind::Regular,
            skip_sync: false,
        }
    }

    pub fn single_table_child(table: Table) -> Self {
        Self {
            table,
            kind: TableKind::SingleTableChild,
            skip_sync: false,
        }
    }

    /// Exclude this entity from synchronization.
    pub fn skip_sync(mut self) -> Self {
        self.skip_sync = true;
        self
    }

    /// Derive the junction table for a many-to-many relation from `owner` to `inverse`.
    ///
    /// The junction is named `{owner}_{inverse}` and carries one column per
    /// primary key column on each side (`{table}_{column}`), a composite
    /// primary key over all of them, an index per side and a cascading
    /// foreign key per side.
    pub fn junction(owner: &Table, inverse: &Table) -> Result<Self, SchemaError> {
        let name = format!("{}_{}", owner.name, inverse.name);
        let mut table = Table::new(name.clone());

        for side in [owner, inverse] {
            let key_columns = side.primary_key_columns();
            if key_columns.is_empty() {
                return Err(SchemaError::MissingPrimaryKey {
                    table: side.name.clone(),
                });
            }

            let mut local = Vec::with_capacity(key_columns.len());
            for key in &key_columns {
                let Some(referenced) = side.get_column(key) else {
                    return Err(SchemaError::UnknownColumn {
                        table: side.name.clone(),
                        column: key.to_string(),
                        context: "primary key".to_string(),
                    });
                };
                let column = junction_column(&side.name, referenced);
                local.push(column.name.clone());
                table = table.primary_column(column);
            }

            let local_refs: Vec<&str> = local.iter().map(String::as_str).collect();
            table = table
                .index(Index::new(&name, &local_refs, false))
                .foreign_key(
                    ForeignKey::new(&name, &local_refs, &side.name, &key_columns)
                        .on_delete(ReferentialAction::Cascade),
                );
        }

        Ok(Self {
            table,
            kind: TableKind::Junction,
            skip_sync: false,
        })
    }
}

/// A junction column mirrors the referenced key's type, without generation or default.
fn junction_column(table: &str, referenced: &Column) -> Column {
    Column {
        name: format!("{}_{}", table, referenced.name),
        column_type: referenced.column_type.clone(),
        length: referenced.length,
        precision: referenced.precision,
        scale: referenced.scale,
        nullable: false,
        unique: false,
        generated: None,
        default: None,
        comment: None,
    }
}

/// The full desired schema for one synchronization run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataGraph {
    entities: Vec<EntityMetadata>,
}

impl MetadataGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity, builder style.
    pub fn entity(mut self, entity: EntityMetadata) -> Self {
        self.entities.push(entity);
        self
    }

    /// Add a regular table, builder style.
    pub fn table(self, table: Table) -> Self {
        self.entity(EntityMetadata::regular(table))
    }

    pub fn push(&mut self, entity: EntityMetadata) {
        self.entities.push(entity);
    }

    pub fn entities(&self) -> &[EntityMetadata] {
        &self.entities
    }

    /// Exclude every entity backed by table `name` from synchronization.
    ///
    /// Returns false if no entity uses that table.
    pub fn skip(&mut self, name: &str) -> bool {
        let mut found = false;
        for entity in self.entities.iter_mut().filter(|e| e.table.name == name) {
            entity.skip_sync = true;
            found = true;
        }
        found
    }

    /// Desired tables that take part in synchronization, in declaration order.
    pub fn synchronizable(&self) -> impl Iterator<Item = &Table> {
        self.entities
            .iter()
            .filter(|e| e.kind.is_synchronized() && !e.skip_sync)
            .map(|e| &e.table)
    }

    /// Look up a synchronizable table by name.
    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.synchronizable().find(|t| t.name == name)
    }

    /// Validate every synchronizable table and reject duplicate table names.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        for table in self.synchronizable() {
            if !seen.insert(table.name.as_str()) {
                return Err(SchemaError::DuplicateTable {
                    table: table.name.clone(),
                });
            }
            table.validate()?;
        }
        Ok(())
    }
}
