//! Database schema types for keel.
//!
//! These descriptors describe both sides of a synchronization run: the
//! desired schema (wrapped in a [`MetadataGraph`]) and the live schema loaded
//! from the database. Everything references other objects by name, so a
//! pair of tables pointing at each other is just two strings.

use indexmap::IndexMap;
use keel_sql::{foreign_key_name, index_name, unique_index_name};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::fmt;

mod graph;
pub use graph::*;

/// How a generated column gets its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerationStrategy {
    /// Sequence-backed auto increment (`SERIAL` and friends).
    Increment,
    /// Database-native identity column.
    Identity,
    /// Generated UUID.
    Uuid,
}

impl fmt::Display for GenerationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationStrategy::Increment => write!(f, "increment"),
            GenerationStrategy::Identity => write!(f, "identity"),
            GenerationStrategy::Uuid => write!(f, "uuid"),
        }
    }
}

/// A dialect-neutral column default.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DefaultValue {
    /// Numeric literal.
    Number(Decimal),
    /// Boolean literal.
    Bool(bool),
    /// String literal (unquoted).
    String(String),
    /// Raw SQL expression, e.g. `now()`.
    Expression(String),
}

impl DefaultValue {
    /// A string literal default.
    pub fn string(value: impl Into<String>) -> Self {
        DefaultValue::String(value.into())
    }

    /// A raw expression default.
    pub fn expr(value: impl Into<String>) -> Self {
        DefaultValue::Expression(value.into())
    }
}

impl From<bool> for DefaultValue {
    fn from(value: bool) -> Self {
        DefaultValue::Bool(value)
    }
}

impl From<i64> for DefaultValue {
    fn from(value: i64) -> Self {
        DefaultValue::Number(Decimal::from(value))
    }
}

impl From<Decimal> for DefaultValue {
    fn from(value: Decimal) -> Self {
        DefaultValue::Number(value)
    }
}

impl fmt::Display for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Number(n) => write!(f, "{}", n.normalize()),
            DefaultValue::Bool(b) => write!(f, "{}", b),
            DefaultValue::String(s) => write!(f, "{}", keel_sql::Lit(s)),
            DefaultValue::Expression(e) => write!(f, "{}", e),
        }
    }
}

/// Action taken on referencing rows when the referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferentialAction {
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
    NoAction,
}

impl ReferentialAction {
    /// SQL keywords for this action.
    pub fn to_sql(&self) -> &'static str {
        match self {
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::NoAction => "NO ACTION",
        }
    }

    /// Parse the SQL keywords back, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CASCADE" => Some(ReferentialAction::Cascade),
            "SET NULL" => Some(ReferentialAction::SetNull),
            "SET DEFAULT" => Some(ReferentialAction::SetDefault),
            "RESTRICT" => Some(ReferentialAction::Restrict),
            "NO ACTION" => Some(ReferentialAction::NoAction),
            _ => None,
        }
    }
}

impl fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_sql())
    }
}

/// A database column definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Base type as written in metadata or reported by the catalog
    pub column_type: String,
    /// Character length (varchar and friends)
    pub length: Option<u32>,
    /// Numeric precision
    pub precision: Option<u32>,
    /// Numeric scale
    pub scale: Option<u32>,
    /// Whether the column allows NULL
    pub nullable: bool,
    /// Whether the column carries a single-column unique constraint
    pub unique: bool,
    /// Generation strategy, if the database fills this column itself
    pub generated: Option<GenerationStrategy>,
    /// Default value (if any)
    pub default: Option<DefaultValue>,
    /// Column comment (if any)
    pub comment: Option<String>,
}

impl Column {
    /// A non-null column with no constraints.
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            length: None,
            precision: None,
            scale: None,
            nullable: false,
            unique: false,
            generated: None,
            default: None,
            comment: None,
        }
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn precision(mut self, precision: u32, scale: u32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Mark the column as generated. Generated columns are never nullable.
    pub fn generated(mut self, strategy: GenerationStrategy) -> Self {
        self.generated = Some(strategy);
        self.nullable = false;
        self
    }

    pub fn default(mut self, value: impl Into<DefaultValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Whether the column is generated by the database.
    pub fn is_generated(&self) -> bool {
        self.generated.is_some()
    }
}

/// A database index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    /// Index name
    pub name: String,
    /// Indexed columns, in order
    pub columns: Vec<String>,
    /// Whether this is a unique index
    pub unique: bool,
}

impl Index {
    /// An index whose name is derived from the table and columns.
    pub fn new(table: &str, columns: &[&str], unique: bool) -> Self {
        let name = if unique {
            unique_index_name(table, columns)
        } else {
            index_name(table, columns)
        };
        Self::named(name, columns, unique)
    }

    /// An index with an explicit name.
    pub fn named(name: impl Into<String>, columns: &[&str], unique: bool) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique,
        }
    }

    /// Whether the index covers the given column.
    pub fn covers(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

/// A foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignKey {
    /// Constraint name
    pub name: String,
    /// Owning table
    pub table: String,
    /// Column(s) in the owning table
    pub columns: Vec<String>,
    /// Referenced table
    pub referenced_table: String,
    /// Referenced column(s)
    pub referenced_columns: Vec<String>,
    /// ON DELETE action, database default when `None`
    pub on_delete: Option<ReferentialAction>,
}

impl ForeignKey {
    /// A foreign key whose name is derived from the owning table and columns.
    pub fn new(
        table: &str,
        columns: &[&str],
        referenced_table: &str,
        referenced_columns: &[&str],
    ) -> Self {
        Self {
            name: foreign_key_name(table, columns),
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            referenced_table: referenced_table.to_string(),
            referenced_columns: referenced_columns.iter().map(|c| c.to_string()).collect(),
            on_delete: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = Some(action);
        self
    }

    /// Whether this key touches `table.column`, either as owner or as target.
    pub fn involves(&self, table: &str, column: &str) -> bool {
        (self.table == table && self.columns.iter().any(|c| c == column))
            || (self.referenced_table == table
                && self.referenced_columns.iter().any(|c| c == column))
    }
}

/// One column of a table's primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrimaryKey {
    pub table: String,
    pub column: String,
}

/// A database table definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    /// Table name
    pub name: String,
    /// Columns, in declaration order
    pub columns: Vec<Column>,
    /// Indices
    pub indices: Vec<Index>,
    /// Foreign keys owned by this table
    pub foreign_keys: Vec<ForeignKey>,
    /// Primary key columns, one entry per column
    pub primary_keys: Vec<PrimaryKey>,
    /// Set when the table was created during the current synchronization run
    pub just_created: bool,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indices: Vec::new(),
            foreign_keys: Vec::new(),
            primary_keys: Vec::new(),
            just_created: false,
        }
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Add a column and make it part of the primary key.
    pub fn primary_column(mut self, column: Column) -> Self {
        self.primary_keys.push(PrimaryKey {
            table: self.name.clone(),
            column: column.name.clone(),
        });
        self.columns.push(column);
        self
    }

    pub fn index(mut self, index: Index) -> Self {
        self.indices.push(index);
        self
    }

    pub fn foreign_key(mut self, foreign_key: ForeignKey) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    /// Look up a column by name.
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.get_column(name).is_some()
    }

    pub fn get_index(&self, name: &str) -> Option<&Index> {
        self.indices.iter().find(|i| i.name == name)
    }

    pub fn get_foreign_key(&self, name: &str) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|fk| fk.name == name)
    }

    /// Names of the primary key columns, in key order.
    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.primary_keys.iter().map(|pk| pk.column.as_str()).collect()
    }

    pub fn is_primary(&self, column: &str) -> bool {
        self.primary_keys.iter().any(|pk| pk.column == column)
    }

    /// Replace a column in place, keeping its position.
    pub fn replace_column(&mut self, column: Column) {
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
    }

    /// Remove a column along with its primary key entry.
    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        let pos = self.columns.iter().position(|c| c.name == name)?;
        self.primary_keys.retain(|pk| pk.column != name);
        Some(self.columns.remove(pos))
    }

    pub fn remove_index(&mut self, name: &str) -> Option<Index> {
        let pos = self.indices.iter().position(|i| i.name == name)?;
        Some(self.indices.remove(pos))
    }

    pub fn remove_foreign_key(&mut self, name: &str) -> Option<ForeignKey> {
        let pos = self.foreign_keys.iter().position(|fk| fk.name == name)?;
        Some(self.foreign_keys.remove(pos))
    }

    /// Check the structural invariants of this table.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut names = HashSet::new();
        for col in &self.columns {
            if !names.insert(col.name.as_str()) {
                return Err(SchemaError::DuplicateColumn {
                    table: self.name.clone(),
                    column: col.name.clone(),
                });
            }
            if col.generated.is_some() && col.nullable {
                return Err(SchemaError::NullableGenerated {
                    table: self.name.clone(),
                    column: col.name.clone(),
                });
            }
        }

        let mut index_names = HashSet::new();
        for idx in &self.indices {
            if !index_names.insert(idx.name.as_str()) {
                return Err(SchemaError::DuplicateIndex {
                    table: self.name.clone(),
                    index: idx.name.clone(),
                });
            }
            self.check_columns(&idx.columns, || format!("index {}", idx.name))?;
        }

        for fk in &self.foreign_keys {
            if fk.table != self.name {
                return Err(SchemaError::ForeignKeyOwner {
                    table: self.name.clone(),
                    name: fk.name.clone(),
                    owner: fk.table.clone(),
                });
            }
            if fk.columns.is_empty() || fk.columns.len() != fk.referenced_columns.len() {
                return Err(SchemaError::ForeignKeyArity {
                    table: self.name.clone(),
                    name: fk.name.clone(),
                    columns: fk.columns.len(),
                    referenced: fk.referenced_columns.len(),
                });
            }
            self.check_columns(&fk.columns, || format!("foreign key {}", fk.name))?;
        }

        for pk in &self.primary_keys {
            self.check_columns(std::slice::from_ref(&pk.column), || "primary key".to_string())?;
        }

        Ok(())
    }

    fn check_columns(
        &self,
        columns: &[String],
        context: impl Fn() -> String,
    ) -> Result<(), SchemaError> {
        match columns.iter().find(|c| !self.has_column(c)) {
            Some(missing) => Err(SchemaError::UnknownColumn {
                table: self.name.clone(),
                column: missing.clone(),
                context: context(),
            }),
            None => Ok(()),
        }
    }
}

/// A set of tables, indexed by name in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    pub tables: IndexMap<String, Table>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tables(tables: impl IntoIterator<Item = Table>) -> Self {
        Self {
            tables: tables.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }

    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn get_table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.get_mut(name)
    }

    pub fn iter_tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }
}

/// Structural problems in a schema description.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("table '{table}' declares column '{column}' more than once")]
    DuplicateColumn { table: String, column: String },

    #[error("table '{table}' declares index '{index}' more than once")]
    DuplicateIndex { table: String, index: String },

    #[error("table '{table}' is declared more than once")]
    DuplicateTable { table: String },

    #[error("generated column '{table}.{column}' cannot be nullable")]
    NullableGenerated { table: String, column: String },

    #[error(
        "foreign key '{name}' on '{table}' has {columns} column(s) but references {referenced}"
    )]
    ForeignKeyArity {
        table: String,
        name: String,
        columns: usize,
        referenced: usize,
    },

    #[error("foreign key '{name}' is listed on '{table}' but owned by '{owner}'")]
    ForeignKeyOwner {
        table: String,
        name: String,
        owner: String,
    },

    #[error("{context} on '{table}' names unknown column '{column}'")]
    UnknownColumn {
        table: String,
        column: String,
        context: String,
    },

    #[error("table '{table}' has no primary key")]
    MissingPrimaryKey { table: String },
}

#[cfg(test)]
mod tests;
