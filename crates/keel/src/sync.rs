//! Synchronization orchestrator - converge a live database on a metadata graph.
//!
//! A run walks nine steps in a fixed order, all inside one transaction:
//!
//! ```text
//! 1. load schema              live tables for every synchronizable entry
//! 2. drop old foreign keys    undesired or redefined
//! 3. create new tables        columns and primary key only
//! 4. drop removed columns     dependent FKs and indices first
//! 5. add new columns
//! 6. update changed columns   dependent FKs and indices first
//! 7. update primary keys      skipped for tables created in step 3
//! 8. create indices           drop obsolete, then create missing
//! 9. create foreign keys
//! ```
//!
//! Every step re-diffs the desired tables against the live descriptors as
//! the previous steps left them, so each object is handled exactly once.
//! Indices go in before foreign keys because a foreign key may need a
//! unique index on its target.
//!
//! ```ignore
//! let mut print = |line: &str| println!("{line}");
//! let report = Synchronizer::new(&mut driver, &graph)
//!     .observer(&mut print)
//!     .synchronize()
//!     .await?;
//! ```

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;
use keel_db_schema::{ForeignKey, MetadataGraph, PrimaryKey, Table};

use crate::diff::{dependents, diff_table, obsolete_foreign_keys};
use crate::driver::{Driver, Normalize, Operation, SyncObserver};
use crate::record::Recorder;
use crate::{Error, Result};

/// The steps of a run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SyncStep {
    LoadSchema,
    DropOldForeignKeys,
    CreateNewTables,
    DropRemovedColumns,
    AddNewColumns,
    UpdateChangedColumns,
    UpdatePrimaryKeys,
    CreateIndices,
    CreateForeignKeys,
}

impl SyncStep {
    pub const ALL: [SyncStep; 9] = [
        SyncStep::LoadSchema,
        SyncStep::DropOldForeignKeys,
        SyncStep::CreateNewTables,
        SyncStep::DropRemovedColumns,
        SyncStep::AddNewColumns,
        SyncStep::UpdateChangedColumns,
        SyncStep::UpdatePrimaryKeys,
        SyncStep::CreateIndices,
        SyncStep::CreateForeignKeys,
    ];

    /// 1-based position in the run.
    pub fn number(self) -> usize {
        self as usize + 1
    }
}

impl fmt::Display for SyncStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStep::LoadSchema => "load schema",
            SyncStep::DropOldForeignKeys => "drop old foreign keys",
            SyncStep::CreateNewTables => "create new tables",
            SyncStep::DropRemovedColumns => "drop removed columns",
            SyncStep::AddNewColumns => "add new columns",
            SyncStep::UpdateChangedColumns => "update changed columns",
            SyncStep::UpdatePrimaryKeys => "update primary keys",
            SyncStep::CreateIndices => "create indices",
            SyncStep::CreateForeignKeys => "create foreign keys",
        };
        f.write_str(name)
    }
}

/// What a successful run did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Every operation executed, in order.
    pub operations: Vec<Operation>,
    /// Tables created in step 3.
    pub created_tables: Vec<String>,
    /// Operations per step. Steps that did nothing are absent.
    pub step_counts: IndexMap<SyncStep, usize>,
}

impl SyncReport {
    /// Returns true if the database was already in sync.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn count(&self, step: SyncStep) -> usize {
        self.step_counts.get(&step).copied().unwrap_or(0)
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "Schema is up to date.");
        }
        writeln!(f, "Applied {} operations:\n", self.operations.len())?;
        for op in &self.operations {
            writeln!(f, "  {}", op)?;
        }
        Ok(())
    }
}

/// Drives one synchronization run over a single driver.
pub struct Synchronizer<'a, D: Driver> {
    driver: &'a mut D,
    graph: &'a MetadataGraph,
    observer: Option<&'a mut dyn SyncObserver>,
}

impl<'a, D: Driver> Synchronizer<'a, D> {
    pub fn new(driver: &'a mut D, graph: &'a MetadataGraph) -> Self {
        Self {
            driver,
            graph,
            observer: None,
        }
    }

    /// Send progress lines to `observer` as well as to `tracing`.
    pub fn observer(mut self, observer: &'a mut dyn SyncObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Bring the live schema in line with the graph.
    ///
    /// Either every step succeeds and the transaction commits, or it is
    /// rolled back and the first error is returned. The driver is released
    /// in both cases.
    pub async fn synchronize(self) -> Result<SyncReport> {
        let Synchronizer {
            driver,
            graph,
            observer,
        } = self;

        let outcome = match preflight(&*driver, graph) {
            Ok(()) => transact(driver, graph, observer).await,
            Err(err) => Err(err),
        };

        if let Err(err) = driver.release().await {
            tracing::warn!("failed to release connection: {}", err);
        }

        let report = outcome?;
        tracing::info!(
            operations = report.operations.len(),
            created = report.created_tables.len(),
            "schema synchronized"
        );
        Ok(report)
    }

    /// Compute the operations a run would execute, without executing them.
    ///
    /// The live schema is read through the driver. No transaction is opened
    /// and the driver is not released.
    pub async fn plan(self) -> Result<Vec<Operation>> {
        let Synchronizer {
            driver,
            graph,
            observer,
        } = self;
        preflight(&*driver, graph)?;

        let live = driver.load_table_schemas(&synchronized_names(graph)).await?;

        let mut recorder = Recorder::new(&*driver);
        {
            let mut run = Run::new(&mut recorder, graph, observer);
            run.live = live;
            run.apply_changes().await?;
        }
        Ok(recorder.into_operations())
    }
}

/// Checks that need no database: graph validity and type support.
fn preflight<N: Normalize + ?Sized>(normalizer: &N, graph: &MetadataGraph) -> Result<()> {
    graph.validate()?;
    for table in graph.synchronizable() {
        for column in &table.columns {
            normalizer.normalize_type(&table.name, column)?;
        }
    }
    Ok(())
}

fn synchronized_names(graph: &MetadataGraph) -> BTreeSet<String> {
    graph.synchronizable().map(|t| t.name.clone()).collect()
}

async fn transact<D: Driver>(
    driver: &mut D,
    graph: &MetadataGraph,
    observer: Option<&mut dyn SyncObserver>,
) -> Result<SyncReport> {
    driver.begin_transaction().await?;

    let mut run = Run::new(driver, graph, observer);
    let steps = match run.load().await {
        Ok(()) => run.apply_changes().await,
        Err(err) => Err(err),
    };

    match steps {
        Ok(()) => {
            run.driver.commit_transaction().await?;
            Ok(run.report)
        }
        Err(err) => {
            tracing::debug!("rolling back: {}", err);
            if let Err(rollback) = run.driver.rollback_transaction().await {
                tracing::warn!("rollback failed: {}", rollback);
            }
            Err(err)
        }
    }
}

/// State of one run: the driver, the desired graph and the live tables as
/// mutated by the steps so far.
struct Run<'r, 'o, D: Driver> {
    driver: &'r mut D,
    graph: &'r MetadataGraph,
    observer: Option<&'o mut dyn SyncObserver>,
    live: Vec<Table>,
    report: SyncReport,
}

impl<'r, 'o, D: Driver> Run<'r, 'o, D> {
    fn new(
        driver: &'r mut D,
        graph: &'r MetadataGraph,
        observer: Option<&'o mut dyn SyncObserver>,
    ) -> Self {
        Self {
            driver,
            graph,
            observer,
            live: Vec::new(),
            report: SyncReport::default(),
        }
    }

    fn log(&mut self, step: SyncStep, line: &str) {
        tracing::info!(step = step.number(), "{}: {}", step, line);
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.log(&format!("[{}] {}", step, line));
        }
    }

    async fn load(&mut self) -> Result<()> {
        let names = synchronized_names(self.graph);
        self.live = self.driver.load_table_schemas(&names).await?;
        let line = format!("{} of {} tables exist", self.live.len(), names.len());
        self.log(SyncStep::LoadSchema, &line);
        Ok(())
    }

    /// Steps 2 to 9.
    async fn apply_changes(&mut self) -> Result<()> {
        self.drop_old_foreign_keys().await?;
        self.create_new_tables().await?;
        self.drop_removed_columns().await?;
        self.add_new_columns().await?;
        self.update_changed_columns().await?;
        self.update_primary_keys().await?;
        self.create_indices().await?;
        self.create_foreign_keys().await
    }

    async fn drop_old_foreign_keys(&mut self) -> Result<()> {
        for fk in obsolete_foreign_keys(self.graph, &self.live) {
            self.drop_foreign_key(SyncStep::DropOldForeignKeys, &fk)
                .await?;
        }
        Ok(())
    }

    async fn create_new_tables(&mut self) -> Result<()> {
        let graph = self.graph;
        for desired in graph.synchronizable() {
            if find(&self.live, &desired.name).is_some() {
                continue;
            }
            let mut table = desired.clone();
            table.indices.clear();
            table.foreign_keys.clear();
            self.apply(SyncStep::CreateNewTables, Operation::CreateTable(table))
                .await?;
            self.report.created_tables.push(desired.name.clone());
        }
        Ok(())
    }

    async fn drop_removed_columns(&mut self) -> Result<()> {
        let step = SyncStep::DropRemovedColumns;
        let graph = self.graph;
        for desired in graph.synchronizable() {
            let diff = self.diff(desired)?;
            for column in diff.drop_columns {
                self.drop_dependents(step, &desired.name, &column).await?;
                self.apply(
                    step,
                    Operation::DropColumn {
                        table: desired.name.clone(),
                        column,
                    },
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn add_new_columns(&mut self) -> Result<()> {
        let graph = self.graph;
        for desired in graph.synchronizable() {
            let diff = self.diff(desired)?;
            for column in diff.add_columns {
                self.apply(
                    SyncStep::AddNewColumns,
                    Operation::AddColumn {
                        table: desired.name.clone(),
                        column,
                    },
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn update_changed_columns(&mut self) -> Result<()> {
        let step = SyncStep::UpdateChangedColumns;
        let graph = self.graph;
        for desired in graph.synchronizable() {
            let diff = self.diff(desired)?;
            for change in diff.change_columns {
                self.drop_dependents(step, &desired.name, &change.to.name)
                    .await?;
                self.apply(
                    step,
                    Operation::ChangeColumn {
                        table: desired.name.clone(),
                        from: change.from,
                        to: change.to,
                    },
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn update_primary_keys(&mut self) -> Result<()> {
        let step = SyncStep::UpdatePrimaryKeys;
        let graph = self.graph;
        for desired in graph.synchronizable() {
            let diff = self.diff(desired)?;
            if diff.add_primary_keys.is_empty() && diff.drop_primary_keys.is_empty() {
                continue;
            }

            // Foreign keys onto the current key go first; step 9 recreates them.
            let referencing: Vec<ForeignKey> = match find(&self.live, &desired.name) {
                Some(live) => {
                    let key = live.primary_key_columns();
                    self.live
                        .iter()
                        .flat_map(|t| &t.foreign_keys)
                        .filter(|fk| {
                            fk.referenced_table == desired.name
                                && fk
                                    .referenced_columns
                                    .iter()
                                    .all(|c| key.contains(&c.as_str()))
                        })
                        .cloned()
                        .collect()
                }
                None => Vec::new(),
            };
            for fk in referencing {
                self.drop_foreign_key(step, &fk).await?;
            }

            self.apply(
                step,
                Operation::UpdatePrimaryKeys {
                    table: desired.name.clone(),
                    added: diff.add_primary_keys,
                    removed: diff.drop_primary_keys,
                },
            )
            .await?;
        }
        Ok(())
    }

    async fn create_indices(&mut self) -> Result<()> {
        let step = SyncStep::CreateIndices;
        let graph = self.graph;

        let mut additions = Vec::new();
        for desired in graph.synchronizable() {
            let diff = self.diff(desired)?;
            for name in diff.drop_indices {
                self.apply(
                    step,
                    Operation::DropIndex {
                        table: desired.name.clone(),
                        name,
                    },
                )
                .await?;
            }
            additions.extend(diff.add_indices.into_iter().map(|index| Operation::CreateIndex {
                table: desired.name.clone(),
                index,
            }));
        }

        for op in additions {
            self.apply(step, op).await?;
        }
        Ok(())
    }

    async fn create_foreign_keys(&mut self) -> Result<()> {
        let graph = self.graph;
        for desired in graph.synchronizable() {
            let diff = self.diff(desired)?;
            for fk in diff.add_foreign_keys {
                self.apply(SyncStep::CreateForeignKeys, Operation::CreateForeignKey(fk))
                    .await?;
            }
        }
        Ok(())
    }

    fn diff(&self, desired: &Table) -> Result<crate::diff::TableDiff> {
        diff_table(&*self.driver, desired, find(&self.live, &desired.name))
    }

    /// Drop every foreign key and index that uses `table.column`.
    async fn drop_dependents(&mut self, step: SyncStep, table: &str, column: &str) -> Result<()> {
        let deps = dependents(&self.live, table, column);
        for fk in &deps.foreign_keys {
            self.drop_foreign_key(step, fk).await?;
        }
        for name in deps.indices {
            self.apply(
                step,
                Operation::DropIndex {
                    table: table.to_string(),
                    name,
                },
            )
            .await?;
        }
        Ok(())
    }

    async fn drop_foreign_key(&mut self, step: SyncStep, fk: &ForeignKey) -> Result<()> {
        self.apply(
            step,
            Operation::DropForeignKey {
                table: fk.table.clone(),
                name: fk.name.clone(),
            },
        )
        .await
    }

    /// Execute `op` through the driver, then mirror it on the live tables.
    async fn apply(&mut self, step: SyncStep, op: Operation) -> Result<()> {
        self.log(step, &op.to_string());

        match &op {
            Operation::CreateTable(table) => self.driver.create_table(table).await?,
            Operation::DropTable(name) => self.driver.drop_table(name).await?,
            Operation::AddColumn { table, column } => {
                let live = live_table(&self.live, table)?;
                self.driver.add_column(live, column).await?
            }
            Operation::DropColumn { table, column } => {
                let deps = dependents(&self.live, table, column);
                if !deps.is_empty() {
                    return Err(Error::DependencyResolution(format!(
                        "{}.{} is still used by {} foreign key(s) and {} index(es)",
                        table,
                        column,
                        deps.foreign_keys.len(),
                        deps.indices.len()
                    )));
                }
                let live = live_table(&self.live, table)?;
                self.driver.drop_column(live, column).await?
            }
            Operation::ChangeColumn { table, from, to } => {
                let live = live_table(&self.live, table)?;
                self.driver.change_column(live, from, to).await?
            }
            Operation::CreateForeignKey(fk) => self.driver.create_foreign_key(fk).await?,
            Operation::DropForeignKey { table, name } => {
                self.driver.drop_foreign_key(table, name).await?
            }
            Operation::CreateIndex { table, index } => {
                self.driver.create_index(table, index).await?
            }
            Operation::DropIndex { table, name } => self.driver.drop_index(table, name).await?,
            Operation::UpdatePrimaryKeys {
                table,
                added,
                removed,
            } => {
                let live = live_table(&self.live, table)?;
                self.driver.update_primary_keys(live, added, removed).await?
            }
        }

        self.mirror(&op)?;
        *self.report.step_counts.entry(step).or_insert(0) += 1;
        self.report.operations.push(op);
        Ok(())
    }

    /// Reflect an executed operation in the live descriptors.
    fn mirror(&mut self, op: &Operation) -> Result<()> {
        match op {
            Operation::CreateTable(table) => {
                let mut created = table.clone();
                created.just_created = true;
                self.live.push(created);
            }
            Operation::DropTable(name) => self.live.retain(|t| &t.name != name),
            Operation::AddColumn { table, column } => {
                live_table_mut(&mut self.live, table)?
                    .columns
                    .push(column.clone());
            }
            Operation::DropColumn { table, column } => {
                live_table_mut(&mut self.live, table)?.remove_column(column);
            }
            Operation::ChangeColumn { table, to, .. } => {
                live_table_mut(&mut self.live, table)?.replace_column(to.clone());
            }
            Operation::CreateForeignKey(fk) => {
                live_table_mut(&mut self.live, &fk.table)?
                    .foreign_keys
                    .push(fk.clone());
            }
            Operation::DropForeignKey { table, name } => {
                live_table_mut(&mut self.live, table)?.remove_foreign_key(name);
            }
            Operation::CreateIndex { table, index } => {
                live_table_mut(&mut self.live, table)?
                    .indices
                    .push(index.clone());
            }
            Operation::DropIndex { table, name } => {
                live_table_mut(&mut self.live, table)?.remove_index(name);
            }
            Operation::UpdatePrimaryKeys {
                table,
                added,
                removed,
            } => {
                let live = live_table_mut(&mut self.live, table)?;
                live.primary_keys.retain(|pk| !removed.contains(&pk.column));
                for column in added {
                    if !live.is_primary(column) {
                        live.primary_keys.push(PrimaryKey {
                            table: table.clone(),
                            column: column.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

fn find<'t>(live: &'t [Table], name: &str) -> Option<&'t Table> {
    live.iter().find(|t| t.name == name)
}

fn live_table<'t>(live: &'t [Table], name: &str) -> Result<&'t Table> {
    find(live, name).ok_or_else(|| {
        Error::DependencyResolution(format!("table {} is not part of the live schema", name))
    })
}

fn live_table_mut<'t>(live: &'t mut [Table], name: &str) -> Result<&'t mut Table> {
    live.iter_mut().find(|t| t.name == name).ok_or_else(|| {
        Error::DependencyResolution(format!("table {} is not part of the live schema", name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_are_numbered_in_order() {
        let numbers: Vec<usize> = SyncStep::ALL.iter().map(|s| s.number()).collect();
        assert_eq!(numbers, (1..=9).collect::<Vec<_>>());
        assert!(SyncStep::CreateIndices < SyncStep::CreateForeignKeys);
    }

    #[test]
    fn test_report_display() {
        let mut report = SyncReport::default();
        assert_eq!(report.to_string(), "Schema is up to date.\n");

        report.operations.push(Operation::DropIndex {
            table: "user".to_string(),
            name: "uk_legacy_flag".to_string(),
        });
        report.step_counts.insert(SyncStep::DropRemovedColumns, 1);
        assert_eq!(
            report.to_string(),
            "Applied 1 operations:\n\n  - INDEX uk_legacy_flag on user\n"
        );
        assert_eq!(report.count(SyncStep::DropRemovedColumns), 1);
        assert_eq!(report.count(SyncStep::CreateIndices), 0);
    }
}
