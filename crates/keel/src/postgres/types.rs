//! Postgres type vocabulary.
//!
//! Metadata and the catalog spell the same type many ways (`int`, `int4`,
//! `integer`, `serial`). [`canonical_type`] folds all of them onto one
//! spelling, which doubles as the type used in rendered DDL.

use keel_db_schema::{Column, GenerationStrategy};

use crate::{Error, Result};

/// Fold a base type name onto its canonical spelling, without parameters.
pub fn base_type(name: &str) -> Option<&'static str> {
    let lowered = name.trim().to_ascii_lowercase();
    let ty = match lowered.as_str() {
        "smallint" | "int2" | "smallserial" | "serial2" => "smallint",
        "int" | "integer" | "int4" | "serial" | "serial4" => "integer",
        "bigint" | "int8" | "bigserial" | "serial8" => "bigint",
        "real" | "float4" => "real",
        "double precision" | "double" | "float8" | "float" => "double precision",
        "numeric" | "decimal" => "numeric",
        "boolean" | "bool" => "boolean",
        "text" | "string" => "text",
        "varchar" | "character varying" => "varchar",
        "char" | "character" | "bpchar" => "char",
        "bytea" | "blob" | "binary" => "bytea",
        "timestamp" | "timestamp without time zone" | "datetime" => "timestamp",
        "timestamptz" | "timestamp with time zone" => "timestamptz",
        "date" => "date",
        "time" | "time without time zone" => "time",
        "uuid" => "uuid",
        "json" => "json",
        "jsonb" => "jsonb",
        _ => return None,
    };
    Some(ty)
}

/// Canonical type string for a column, including length, precision and scale.
///
/// Returns `None` when the base type has no Postgres mapping.
pub fn canonical_type(column: &Column) -> Option<String> {
    let base = base_type(&column.column_type)?;
    let ty = match base {
        "varchar" => match column.length {
            Some(n) => format!("varchar({})", n),
            None => "varchar".to_string(),
        },
        "char" => format!("char({})", column.length.unwrap_or(1)),
        "numeric" => match column.precision {
            Some(p) => format!("numeric({},{})", p, column.scale.unwrap_or(0)),
            None => "numeric".to_string(),
        },
        other => other.to_string(),
    };
    Some(ty)
}

/// The type to write in a column definition, taking generation into account.
///
/// `Increment` turns the integer types into their `serial` counterparts.
/// Returns `None` when the combination cannot be expressed.
pub fn ddl_type(column: &Column) -> Option<String> {
    let canonical = canonical_type(column)?;
    match column.generated {
        Some(GenerationStrategy::Increment) => serial_type(&canonical).map(str::to_string),
        Some(GenerationStrategy::Identity) => is_integer(&canonical).then_some(canonical),
        Some(GenerationStrategy::Uuid) => (canonical == "uuid").then_some(canonical),
        None => Some(canonical),
    }
}

/// Canonical type of a column, failing when it cannot be expressed.
///
/// Also rejects generation strategies the base type cannot carry, so a bad
/// combination surfaces before any DDL runs.
pub fn checked_type(dialect: &'static str, table: &str, column: &Column) -> Result<String> {
    match (ddl_type(column), canonical_type(column)) {
        (Some(_), Some(canonical)) => Ok(canonical),
        _ => Err(Error::UnsupportedType {
            table: table.to_string(),
            column: column.name.clone(),
            column_type: column.column_type.clone(),
            dialect,
        }),
    }
}

/// The `serial` pseudo-type backing an integer type.
pub fn serial_type(canonical: &str) -> Option<&'static str> {
    match canonical {
        "smallint" => Some("smallserial"),
        "integer" => Some("serial"),
        "bigint" => Some("bigserial"),
        _ => None,
    }
}

fn is_integer(canonical: &str) -> bool {
    matches!(canonical, "smallint" | "integer" | "bigint")
}

/// Whether the catalog reports a length for this base type.
pub fn has_length(base: &str) -> bool {
    matches!(base, "varchar" | "char")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_fold_together() {
        for alias in ["int", "INTEGER", "int4", "serial"] {
            assert_eq!(canonical_type(&Column::new("id", alias)).unwrap(), "integer");
        }
        assert_eq!(
            canonical_type(&Column::new("at", "timestamp with time zone")).unwrap(),
            "timestamptz"
        );
        assert_eq!(canonical_type(&Column::new("x", "float")).unwrap(), "double precision");
    }

    #[test]
    fn test_parameters() {
        let col = Column::new("title", "character varying").length(255);
        assert_eq!(canonical_type(&col).unwrap(), "varchar(255)");
        assert_eq!(canonical_type(&Column::new("body", "varchar")).unwrap(), "varchar");
        assert_eq!(canonical_type(&Column::new("flag", "bpchar")).unwrap(), "char(1)");

        let price = Column::new("price", "decimal").precision(10, 2);
        assert_eq!(canonical_type(&price).unwrap(), "numeric(10,2)");
    }

    #[test]
    fn test_unknown_type() {
        assert!(canonical_type(&Column::new("shape", "geometry")).is_none());
    }

    #[test]
    fn test_ddl_type_generation() {
        let id = Column::new("id", "bigint").generated(GenerationStrategy::Increment);
        assert_eq!(ddl_type(&id).unwrap(), "bigserial");

        let id = Column::new("id", "int").generated(GenerationStrategy::Identity);
        assert_eq!(ddl_type(&id).unwrap(), "integer");

        let id = Column::new("id", "uuid").generated(GenerationStrategy::Uuid);
        assert_eq!(ddl_type(&id).unwrap(), "uuid");

        let bad = Column::new("id", "text").generated(GenerationStrategy::Increment);
        assert!(ddl_type(&bad).is_none());
        assert!(matches!(
            checked_type("postgres", "t", &bad),
            Err(Error::UnsupportedType { column_type, .. }) if column_type == "text"
        ));
    }
}
