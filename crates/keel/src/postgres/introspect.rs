//! Catalog queries for the Postgres driver.
//!
//! All queries are scoped to one namespace and a list of table names, and
//! cast every identifier to `text` so rows decode into plain `String`s.

use keel_db_schema::{
    Column, DefaultValue, ForeignKey, GenerationStrategy, Index, PrimaryKey, ReferentialAction,
};
use keel_sql::literal_value;
use rust_decimal::Decimal;

use super::traced::Traced;
use super::types::{base_type, has_length};
use crate::driver::{CatalogColumn, CatalogIndex};
use crate::{Error, Result};

fn catalog_error(catalog: &'static str) -> impl FnOnce(tokio_postgres::Error) -> Error {
    move |err| Error::Introspection {
        catalog,
        message: err.to_string(),
    }
}

const EXISTING_TABLES: &str = r#"
SELECT c.relname::text
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1
  AND c.relkind IN ('r', 'p')
  AND c.relname::text = ANY($2)
ORDER BY c.relname
"#;

pub async fn existing_tables(
    db: &Traced<'_>,
    schema: &str,
    names: &[String],
) -> Result<Vec<String>> {
    let rows = db
        .query(EXISTING_TABLES, &[&schema, &names])
        .await
        .map_err(catalog_error("tables"))?;
    Ok(rows.iter().map(|row| row.get(0)).collect())
}

const COLUMNS: &str = r#"
SELECT c.table_name::text,
       c.column_name::text,
       c.udt_name::text,
       c.is_nullable = 'YES',
       c.character_maximum_length::int4,
       c.numeric_precision::int4,
       c.numeric_scale::int4,
       c.column_default::text,
       c.is_identity = 'YES',
       col_description(format('%I.%I', c.table_schema, c.table_name)::regclass, c.ordinal_position::int4)
FROM information_schema.columns c
WHERE c.table_schema = $1
  AND c.table_name::text = ANY($2)
ORDER BY c.table_name, c.ordinal_position
"#;

const UNIQUE_COLUMNS: &str = r#"
SELECT rel.relname::text, att.attname::text
FROM pg_catalog.pg_constraint con
JOIN pg_catalog.pg_class rel ON rel.oid = con.conrelid
JOIN pg_catalog.pg_namespace n ON n.oid = rel.relnamespace
JOIN pg_catalog.pg_attribute att ON att.attrelid = con.conrelid AND att.attnum = con.conkey[1]
WHERE con.contype = 'u'
  AND array_length(con.conkey, 1) = 1
  AND n.nspname = $1
  AND rel.relname::text = ANY($2)
"#;

pub async fn columns(
    db: &Traced<'_>,
    schema: &str,
    tables: &[String],
) -> Result<Vec<CatalogColumn>> {
    let unique: Vec<(String, String)> = db
        .query(UNIQUE_COLUMNS, &[&schema, &tables])
        .await
        .map_err(catalog_error("unique constraints"))?
        .iter()
        .map(|row| (row.get(0), row.get(1)))
        .collect();

    let rows = db
        .query(COLUMNS, &[&schema, &tables])
        .await
        .map_err(catalog_error("columns"))?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        let table: String = row.get(0);
        let name: String = row.get(1);
        let udt: String = row.get(2);
        let length: Option<i32> = row.get(4);
        let precision: Option<i32> = row.get(5);
        let scale: Option<i32> = row.get(6);
        let raw_default: Option<String> = row.get(7);
        let identity: bool = row.get(8);

        let base = base_type(&udt);
        let (mut generated, default) = match raw_default.as_deref() {
            Some(raw) => parse_default(raw),
            None => (None, None),
        };
        if identity {
            generated = Some(GenerationStrategy::Identity);
        }

        let is_unique = unique.iter().any(|(t, c)| *t == table && *c == name);
        let column = Column {
            column_type: base.map(str::to_string).unwrap_or(udt),
            length: length
                .filter(|_| base.is_some_and(has_length))
                .and_then(|n| u32::try_from(n).ok()),
            precision: precision
                .filter(|_| base == Some("numeric"))
                .and_then(|n| u32::try_from(n).ok()),
            scale: scale
                .filter(|_| base == Some("numeric"))
                .and_then(|n| u32::try_from(n).ok()),
            nullable: row.get(3),
            unique: is_unique,
            generated,
            default,
            comment: row.get(9),
            name,
        };
        columns.push(CatalogColumn { table, column });
    }

    Ok(columns)
}

/// Standalone indices only: anything backing a primary key, unique or
/// exclusion constraint on the same table is left out.
const INDICES: &str = r#"
SELECT t.relname::text,
       i.relname::text,
       ix.indisunique,
       array(
           SELECT a.attname::text
           FROM unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
           JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
           ORDER BY k.ord
       )
FROM pg_catalog.pg_index ix
JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid
JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid
JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
WHERE n.nspname = $1
  AND t.relname::text = ANY($2)
  AND NOT EXISTS (
      SELECT 1 FROM pg_catalog.pg_constraint con
      WHERE con.conindid = ix.indexrelid
        AND con.conrelid = ix.indrelid
        AND con.contype IN ('p', 'u', 'x')
  )
ORDER BY t.relname, i.relname
"#;

pub async fn indices(
    db: &Traced<'_>,
    schema: &str,
    tables: &[String],
) -> Result<Vec<CatalogIndex>> {
    let rows = db
        .query(INDICES, &[&schema, &tables])
        .await
        .map_err(catalog_error("indices"))?;

    Ok(rows
        .iter()
        .map(|row| CatalogIndex {
            table: row.get(0),
            index: Index {
                name: row.get(1),
                unique: row.get(2),
                columns: row.get(3),
            },
        })
        .collect())
}

const FOREIGN_KEYS: &str = r#"
SELECT con.conname::text,
       rel.relname::text,
       array(
           SELECT a.attname::text
           FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
           JOIN pg_catalog.pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
           ORDER BY k.ord
       ),
       frel.relname::text,
       array(
           SELECT a.attname::text
           FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
           JOIN pg_catalog.pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
           ORDER BY k.ord
       ),
       con.confdeltype::text
FROM pg_catalog.pg_constraint con
JOIN pg_catalog.pg_class rel ON rel.oid = con.conrelid
JOIN pg_catalog.pg_class frel ON frel.oid = con.confrelid
JOIN pg_catalog.pg_namespace n ON n.oid = rel.relnamespace
WHERE con.contype = 'f'
  AND n.nspname = $1
  AND rel.relname::text = ANY($2)
ORDER BY rel.relname, con.conname
"#;

pub async fn foreign_keys(
    db: &Traced<'_>,
    schema: &str,
    tables: &[String],
) -> Result<Vec<ForeignKey>> {
    let rows = db
        .query(FOREIGN_KEYS, &[&schema, &tables])
        .await
        .map_err(catalog_error("foreign keys"))?;

    Ok(rows
        .iter()
        .map(|row| {
            let action: String = row.get(5);
            ForeignKey {
                name: row.get(0),
                table: row.get(1),
                columns: row.get(2),
                referenced_table: row.get(3),
                referenced_columns: row.get(4),
                on_delete: delete_action(&action),
            }
        })
        .collect())
}

/// `pg_constraint.confdeltype`. `a` (no action) is the default and maps to `None`.
fn delete_action(code: &str) -> Option<ReferentialAction> {
    match code {
        "c" => Some(ReferentialAction::Cascade),
        "n" => Some(ReferentialAction::SetNull),
        "d" => Some(ReferentialAction::SetDefault),
        "r" => Some(ReferentialAction::Restrict),
        _ => None,
    }
}

const PRIMARY_KEYS: &str = r#"
SELECT rel.relname::text, a.attname::text
FROM pg_catalog.pg_constraint con
JOIN pg_catalog.pg_class rel ON rel.oid = con.conrelid
JOIN pg_catalog.pg_namespace n ON n.oid = rel.relnamespace
CROSS JOIN LATERAL unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
JOIN pg_catalog.pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
WHERE con.contype = 'p'
  AND n.nspname = $1
  AND rel.relname::text = ANY($2)
ORDER BY rel.relname, k.ord
"#;

pub async fn primary_keys(
    db: &Traced<'_>,
    schema: &str,
    tables: &[String],
) -> Result<Vec<PrimaryKey>> {
    let rows = db
        .query(PRIMARY_KEYS, &[&schema, &tables])
        .await
        .map_err(catalog_error("primary keys"))?;

    Ok(rows
        .iter()
        .map(|row| PrimaryKey {
            table: row.get(0),
            column: row.get(1),
        })
        .collect())
}

const CONSTRAINT_NAME: &str = r#"
SELECT con.conname::text
FROM pg_catalog.pg_constraint con
JOIN pg_catalog.pg_class rel ON rel.oid = con.conrelid
JOIN pg_catalog.pg_namespace n ON n.oid = rel.relnamespace
LEFT JOIN pg_catalog.pg_attribute att ON att.attrelid = con.conrelid AND att.attnum = con.conkey[1]
WHERE con.contype = $3::text::"char"
  AND n.nspname = $1
  AND rel.relname::text = $2
  AND ($4::text IS NULL OR (att.attname::text = $4 AND array_length(con.conkey, 1) = 1))
LIMIT 1
"#;

/// Live name of a table's primary key constraint.
pub async fn primary_key_constraint(
    db: &Traced<'_>,
    schema: &str,
    table: &str,
) -> Result<Option<String>> {
    let column: Option<&str> = None;
    let row = db
        .query_opt(CONSTRAINT_NAME, &[&schema, &table, &"p", &column])
        .await
        .map_err(catalog_error("primary keys"))?;
    Ok(row.map(|r| r.get(0)))
}

/// Live name of the single-column unique constraint on `table.column`.
pub async fn unique_constraint(
    db: &Traced<'_>,
    schema: &str,
    table: &str,
    column: &str,
) -> Result<Option<String>> {
    let column = Some(column);
    let row = db
        .query_opt(CONSTRAINT_NAME, &[&schema, &table, &"u", &column])
        .await
        .map_err(catalog_error("unique constraints"))?;
    Ok(row.map(|r| r.get(0)))
}

/// Split a `column_default` into a generation strategy and a plain default.
///
/// `nextval(...)` means a serial column and `gen_random_uuid()` a generated
/// UUID. Quoted literals lose their `::type` cast, bare numbers and booleans
/// are recognized, anything else is kept as an expression.
pub fn parse_default(raw: &str) -> (Option<GenerationStrategy>, Option<DefaultValue>) {
    let raw = raw.trim();
    let lowered = raw.to_ascii_lowercase();

    if lowered.starts_with("nextval(") {
        return (Some(GenerationStrategy::Increment), None);
    }
    if lowered == "gen_random_uuid()" {
        return (Some(GenerationStrategy::Uuid), None);
    }

    if let Some(literal) = literal_value(raw) {
        return (None, Some(DefaultValue::String(literal)));
    }

    let bare = strip_cast(raw);
    let bare = bare
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(bare);
    match bare.to_ascii_lowercase().as_str() {
        "true" => return (None, Some(DefaultValue::Bool(true))),
        "false" => return (None, Some(DefaultValue::Bool(false))),
        _ => {}
    }
    if let Ok(number) = bare.parse::<Decimal>() {
        return (None, Some(DefaultValue::Number(number)));
    }

    (None, Some(DefaultValue::Expression(raw.to_string())))
}

fn strip_cast(raw: &str) -> &str {
    match raw.find("::") {
        Some(pos) => &raw[..pos],
        None => raw,
    }
}
