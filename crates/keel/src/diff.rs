//! Schema diffing - compare a desired table against its live counterpart.
//!
//! [`diff_table`] is a pure function of one (desired, live) pair and the
//! dialect's normalizer. It never touches the database. The synchronizer
//! calls it again before each step so it always diffs against the state the
//! previous steps left behind.
//!
//! Foreign keys are only ever *added* by the table diff. Removing the ones
//! that are no longer wanted is a cross-table concern handled by
//! [`obsolete_foreign_keys`].

use std::fmt;

use keel_db_schema::{Column, ForeignKey, Index, MetadataGraph, Table};

use crate::Result;
use crate::compare::{ColumnAttribute, column_changes, foreign_key_matches, index_matches};
use crate::driver::Normalize;

/// A column present on both sides whose definition differs.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnChange {
    /// The live definition.
    pub from: Column,
    /// The desired definition.
    pub to: Column,
    /// What differs.
    pub changed: Vec<ColumnAttribute>,
}

/// Everything that separates one live table from its desired shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableDiff {
    /// Table name.
    pub table: String,
    /// Set when the table does not exist yet. All other fields are then empty.
    pub create: Option<Table>,
    pub add_columns: Vec<Column>,
    pub drop_columns: Vec<String>,
    pub change_columns: Vec<ColumnChange>,
    pub add_indices: Vec<Index>,
    pub drop_indices: Vec<String>,
    /// Primary key columns to add (generated columns excluded).
    pub add_primary_keys: Vec<String>,
    /// Primary key columns to remove (generated columns excluded).
    pub drop_primary_keys: Vec<String>,
    pub add_foreign_keys: Vec<ForeignKey>,
    /// Live foreign keys to drop. Only filled by [`SchemaDiff::compute`].
    pub drop_foreign_keys: Vec<ForeignKey>,
}

impl TableDiff {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    /// Returns true if there is nothing to do for this table.
    pub fn is_empty(&self) -> bool {
        self.create.is_none()
            && self.add_columns.is_empty()
            && self.drop_columns.is_empty()
            && self.change_columns.is_empty()
            && self.add_indices.is_empty()
            && self.drop_indices.is_empty()
            && self.add_primary_keys.is_empty()
            && self.drop_primary_keys.is_empty()
            && self.add_foreign_keys.is_empty()
            && self.drop_foreign_keys.is_empty()
    }

    /// Flatten into individual changes, in the order the synchronizer applies them.
    pub fn changes(&self) -> Vec<Change> {
        let mut changes = Vec::new();
        changes.extend(self.drop_foreign_keys.iter().cloned().map(Change::DropForeignKey));
        if let Some(table) = &self.create {
            changes.push(Change::AddTable(table.clone()));
        }
        changes.extend(self.drop_columns.iter().cloned().map(Change::DropColumn));
        changes.extend(self.add_columns.iter().cloned().map(Change::AddColumn));
        changes.extend(self.change_columns.iter().cloned().map(Change::AlterColumn));
        if !self.add_primary_keys.is_empty() {
            changes.push(Change::AddPrimaryKey(self.add_primary_keys.clone()));
        }
        if !self.drop_primary_keys.is_empty() {
            changes.push(Change::DropPrimaryKey(self.drop_primary_keys.clone()));
        }
        changes.extend(self.drop_indices.iter().cloned().map(Change::DropIndex));
        changes.extend(self.add_indices.iter().cloned().map(Change::AddIndex));
        changes.extend(self.add_foreign_keys.iter().cloned().map(Change::AddForeignKey));
        changes
    }
}

/// A single schema change, for display.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    AddTable(Table),
    AddColumn(Column),
    DropColumn(String),
    AlterColumn(ColumnChange),
    AddPrimaryKey(Vec<String>),
    DropPrimaryKey(Vec<String>),
    AddIndex(Index),
    DropIndex(String),
    AddForeignKey(ForeignKey),
    DropForeignKey(ForeignKey),
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::AddTable(t) => write!(f, "+ table {}", t.name),
            Change::AddColumn(col) => {
                let nullable = if col.nullable { " (nullable)" } else { "" };
                write!(f, "+ {}: {}{}", col.name, col.column_type, nullable)
            }
            Change::DropColumn(name) => write!(f, "- {}", name),
            Change::AlterColumn(change) => {
                let changed: Vec<String> = change.changed.iter().map(|a| a.to_string()).collect();
                write!(f, "~ {}: {}", change.to.name, changed.join(", "))
            }
            Change::AddPrimaryKey(cols) => write!(f, "+ PRIMARY KEY ({})", cols.join(", ")),
            Change::DropPrimaryKey(cols) => write!(f, "- PRIMARY KEY ({})", cols.join(", ")),
            Change::AddIndex(idx) => {
                let unique = if idx.unique { "UNIQUE " } else { "" };
                write!(f, "+ {}INDEX {} ({})", unique, idx.name, idx.columns.join(", "))
            }
            Change::DropIndex(name) => write!(f, "- INDEX {}", name),
            Change::AddForeignKey(fk) => write!(
                f,
                "+ FOREIGN KEY ({}) -> {}.{}",
                fk.columns.join(", "),
                fk.referenced_table,
                fk.referenced_columns.join(", ")
            ),
            Change::DropForeignKey(fk) => write!(
                f,
                "- FOREIGN KEY ({}) -> {}.{}",
                fk.columns.join(", "),
                fk.referenced_table,
                fk.referenced_columns.join(", ")
            ),
        }
    }
}

/// Diff one desired table against its live counterpart, if any.
pub fn diff_table<N: Normalize + ?Sized>(
    normalizer: &N,
    desired: &Table,
    live: Option<&Table>,
) -> Result<TableDiff> {
    let mut diff = TableDiff::new(&desired.name);

    let Some(live) = live else {
        diff.create = Some(desired.clone());
        return Ok(diff);
    };

    for column in &desired.columns {
        match live.get_column(&column.name) {
            None => diff.add_columns.push(column.clone()),
            Some(existing) => {
                let changed = column_changes(normalizer, &desired.name, column, existing)?;
                if !changed.is_empty() {
                    diff.change_columns.push(ColumnChange {
                        from: existing.clone(),
                        to: column.clone(),
                        changed,
                    });
                }
            }
        }
    }

    for column in &live.columns {
        if !desired.has_column(&column.name) {
            diff.drop_columns.push(column.name.clone());
        }
    }

    for index in &live.indices {
        match desired.get_index(&index.name) {
            None => diff.drop_indices.push(index.name.clone()),
            Some(wanted) if !index_matches(wanted, index) => {
                diff.drop_indices.push(index.name.clone());
                diff.add_indices.push(wanted.clone());
            }
            Some(_) => {}
        }
    }
    for index in &desired.indices {
        if live.get_index(&index.name).is_none() {
            diff.add_indices.push(index.clone());
        }
    }

    if !live.just_created {
        let wanted = key_columns(desired);
        let current = key_columns(live);
        diff.add_primary_keys = wanted
            .iter()
            .filter(|c| !current.contains(c))
            .map(|c| c.to_string())
            .collect();
        diff.drop_primary_keys = current
            .iter()
            .filter(|c| !wanted.contains(c))
            .map(|c| c.to_string())
            .collect();
    }

    for fk in &desired.foreign_keys {
        if live.get_foreign_key(&fk.name).is_none() {
            diff.add_foreign_keys.push(fk.clone());
        }
    }

    Ok(diff)
}

/// Primary key columns that are not generated by the database.
fn key_columns(table: &Table) -> Vec<&str> {
    table
        .primary_keys
        .iter()
        .filter(|pk| {
            table
                .get_column(&pk.column)
                .is_none_or(|col| !col.is_generated())
        })
        .map(|pk| pk.column.as_str())
        .collect()
}

/// Objects that must go before `table.column` can be dropped or altered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dependents {
    /// Foreign keys anywhere in the live graph that own or reference the column.
    pub foreign_keys: Vec<ForeignKey>,
    /// Indices on the table that cover the column.
    pub indices: Vec<String>,
}

impl Dependents {
    pub fn is_empty(&self) -> bool {
        self.foreign_keys.is_empty() && self.indices.is_empty()
    }
}

/// Find everything in `live` that depends on `table.column`.
pub fn dependents(live: &[Table], table: &str, column: &str) -> Dependents {
    let foreign_keys = live
        .iter()
        .flat_map(|t| &t.foreign_keys)
        .filter(|fk| fk.involves(table, column))
        .cloned()
        .collect();

    let indices = live
        .iter()
        .filter(|t| t.name == table)
        .flat_map(|t| &t.indices)
        .filter(|idx| idx.covers(column))
        .map(|idx| idx.name.clone())
        .collect();

    Dependents {
        foreign_keys,
        indices,
    }
}

/// Live foreign keys that are not desired, or are desired under the same
/// name with a different definition.
pub fn obsolete_foreign_keys(graph: &MetadataGraph, live: &[Table]) -> Vec<ForeignKey> {
    let mut obsolete = Vec::new();
    for table in live {
        let Some(desired) = graph.get_table(&table.name) else {
            continue;
        };
        for fk in &table.foreign_keys {
            let keep = desired
                .get_foreign_key(&fk.name)
                .is_some_and(|wanted| foreign_key_matches(wanted, fk));
            if !keep {
                obsolete.push(fk.clone());
            }
        }
    }
    obsolete
}

/// A diff between the desired graph and the live schema.
#[derive(Debug, Clone, Default)]
pub struct SchemaDiff {
    /// Changes organized by table. Tables with nothing to do are left out.
    pub table_diffs: Vec<TableDiff>,
}

impl SchemaDiff {
    /// Diff every synchronizable table in `graph` against `live`.
    pub fn compute<N: Normalize + ?Sized>(
        normalizer: &N,
        graph: &MetadataGraph,
        live: &[Table],
    ) -> Result<Self> {
        let obsolete = obsolete_foreign_keys(graph, live);

        let mut table_diffs = Vec::new();
        for desired in graph.synchronizable() {
            let existing = live.iter().find(|t| t.name == desired.name);
            let mut diff = diff_table(normalizer, desired, existing)?;
            diff.drop_foreign_keys = obsolete
                .iter()
                .filter(|fk| fk.table == desired.name)
                .cloned()
                .collect();
            if !diff.is_empty() {
                table_diffs.push(diff);
            }
        }

        Ok(Self { table_diffs })
    }

    /// Returns true if there are no differences.
    pub fn is_empty(&self) -> bool {
        self.table_diffs.is_empty()
    }

    /// Count total number of changes.
    pub fn change_count(&self) -> usize {
        self.table_diffs.iter().map(|t| t.changes().len()).sum()
    }
}

impl fmt::Display for SchemaDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            writeln!(f, "No changes detected.")?;
        } else {
            writeln!(f, "Changes detected:\n")?;
            for table_diff in &self.table_diffs {
                writeln!(f, "  {}:", table_diff.table)?;
                for change in table_diff.changes() {
                    writeln!(f, "    {}", change)?;
                }
            }
        }
        Ok(())
    }
}
