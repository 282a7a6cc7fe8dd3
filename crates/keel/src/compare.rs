//! Comparison helpers shared by the differ and the synchronizer.
//!
//! Desired and live descriptors rarely agree byte for byte: the catalog
//! reports `integer` where metadata says `int`, a boolean default comes back
//! as the string `t`, an expression gains or loses whitespace. Everything
//! here compares through the dialect's [`Normalize`] implementation.

use std::fmt;

use keel_db_schema::{Column, DefaultValue, ForeignKey, Index, ReferentialAction};
use keel_sql::{fold_sql_case, literal_value, normalize_sql_expr};
use rust_decimal::Decimal;

use crate::Result;
use crate::driver::Normalize;

/// A column attribute that differs between desired and live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnAttribute {
    Type,
    Nullable,
    Generated,
    Unique,
    Default,
    Comment,
}

impl fmt::Display for ColumnAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ColumnAttribute::Type => "type",
            ColumnAttribute::Nullable => "nullable",
            ColumnAttribute::Generated => "generated",
            ColumnAttribute::Unique => "unique",
            ColumnAttribute::Default => "default",
            ColumnAttribute::Comment => "comment",
        };
        f.write_str(s)
    }
}

/// List the attributes of `live` that have to change to match `desired`.
pub fn column_changes<N: Normalize + ?Sized>(
    normalizer: &N,
    table: &str,
    desired: &Column,
    live: &Column,
) -> Result<Vec<ColumnAttribute>> {
    let mut changed = Vec::new();

    if normalizer.normalize_type(table, desired)? != normalizer.normalize_type(table, live)? {
        changed.push(ColumnAttribute::Type);
    }
    if desired.nullable != live.nullable {
        changed.push(ColumnAttribute::Nullable);
    }
    if desired.generated != live.generated {
        changed.push(ColumnAttribute::Generated);
    }
    if desired.unique != live.unique {
        changed.push(ColumnAttribute::Unique);
    }
    if !defaults_equivalent(normalizer, desired.default.as_ref(), live.default.as_ref()) {
        changed.push(ColumnAttribute::Default);
    }
    if non_empty(&desired.comment) != non_empty(&live.comment) {
        changed.push(ColumnAttribute::Comment);
    }

    Ok(changed)
}

fn non_empty(comment: &Option<String>) -> Option<&str> {
    comment.as_deref().filter(|c| !c.is_empty())
}

/// Compare two optional defaults, coercing across representations.
///
/// Numbers match numeric strings, booleans match `true/false/t/f/1/0` and the
/// numbers 0 and 1, expressions match by whitespace-normalized text (case
/// folded outside quotes). A cast literal such as `'{}'::jsonb` also matches
/// its bare value. Anything else falls back to comparing the dialect's
/// normalized strings.
pub fn defaults_equivalent<N: Normalize + ?Sized>(
    normalizer: &N,
    desired: Option<&DefaultValue>,
    live: Option<&DefaultValue>,
) -> bool {
    match (desired, live) {
        (None, None) => true,
        (Some(a), Some(b)) => values_equivalent(normalizer, a, b),
        _ => false,
    }
}

fn values_equivalent<N: Normalize + ?Sized>(
    normalizer: &N,
    a: &DefaultValue,
    b: &DefaultValue,
) -> bool {
    use DefaultValue::*;

    match (a, b) {
        (Number(x), Number(y)) => x == y,
        (Bool(x), Bool(y)) => x == y,
        (Number(n), String(s)) | (String(s), Number(n)) => {
            s.trim().parse::<Decimal>().is_ok_and(|parsed| parsed == *n)
        }
        (Bool(b), String(s)) | (String(s), Bool(b)) => parse_bool(s) == Some(*b),
        (Bool(b), Number(n)) | (Number(n), Bool(b)) => {
            (*b && *n == Decimal::ONE) || (!*b && n.is_zero())
        }
        (Expression(x), Expression(y)) => expressions_equal(x, y),
        (Expression(e), other) | (other, Expression(e)) => {
            expressions_equal(e, &normalizer.normalize_default(other))
                || literal_value(e.trim())
                    .is_some_and(|literal| values_equivalent(normalizer, &String(literal), other))
        }
        _ => normalizer.normalize_default(a) == normalizer.normalize_default(b),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" => Some(true),
        "false" | "f" | "0" => Some(false),
        _ => None,
    }
}

fn expressions_equal(a: &str, b: &str) -> bool {
    fold_sql_case(&normalize_sql_expr(a)) == fold_sql_case(&normalize_sql_expr(b))
}

/// Same columns, same target, same delete action. Names are not compared.
///
/// A missing `on_delete` is the database default, `NO ACTION`.
pub fn foreign_key_matches(desired: &ForeignKey, live: &ForeignKey) -> bool {
    let action = |fk: &ForeignKey| fk.on_delete.unwrap_or(ReferentialAction::NoAction);

    desired.table == live.table
        && desired.columns == live.columns
        && desired.referenced_table == live.referenced_table
        && desired.referenced_columns == live.referenced_columns
        && action(desired) == action(live)
}

/// Same column list (in order) and same uniqueness. Names are not compared.
pub fn index_matches(desired: &Index, live: &Index) -> bool {
    desired.columns == live.columns && desired.unique == live.unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDriver;
    use crate::postgres::parse_default;
    use keel_db_schema::GenerationStrategy;

    fn eq(a: DefaultValue, b: DefaultValue) -> bool {
        defaults_equivalent(&MemoryDriver::new(), Some(&a), Some(&b))
    }

    #[test]
    fn test_number_defaults_coerce_from_strings() {
        assert!(eq(DefaultValue::from(42), DefaultValue::string("42")));
        assert!(eq(DefaultValue::string("42.0"), DefaultValue::from(42)));
        assert!(!eq(DefaultValue::from(42), DefaultValue::string("forty-two")));
    }

    #[test]
    fn test_bool_defaults_coerce() {
        assert!(eq(DefaultValue::from(true), DefaultValue::string("t")));
        assert!(eq(DefaultValue::from(false), DefaultValue::string("FALSE")));
        assert!(eq(DefaultValue::from(true), DefaultValue::from(1)));
        assert!(eq(DefaultValue::from(0), DefaultValue::from(false)));
        assert!(!eq(DefaultValue::from(true), DefaultValue::from(0)));
        assert!(!eq(DefaultValue::from(true), DefaultValue::string("maybe")));
    }

    #[test]
    fn test_expression_defaults_ignore_whitespace_and_case() {
        assert!(eq(DefaultValue::expr("now()"), DefaultValue::expr("NOW()")));
        assert!(eq(
            DefaultValue::expr("coalesce(a,  b)"),
            DefaultValue::expr(" coalesce(a, b) ")
        ));
        assert!(!eq(DefaultValue::expr("now()"), DefaultValue::expr("clock_timestamp()")));
    }

    #[test]
    fn test_expression_literals_keep_their_case() {
        assert!(!eq(DefaultValue::expr("'A'"), DefaultValue::expr("'a'")));
        assert!(!eq(DefaultValue::expr("'Pending'"), DefaultValue::expr("'pending'")));
        assert!(eq(
            DefaultValue::expr("'Pending'::TEXT"),
            DefaultValue::expr("'Pending'::text")
        ));
        assert!(!eq(DefaultValue::expr("'Pending'"), DefaultValue::string("pending")));
    }

    #[test]
    fn test_cast_literal_matches_catalog_default() {
        for raw in ["'{}'::jsonb", "'active'::text", "'it''s'::character varying"] {
            let (generated, live) = parse_default(raw);
            assert_eq!(generated, None);
            assert!(
                defaults_equivalent(
                    &MemoryDriver::new(),
                    Some(&DefaultValue::expr(raw)),
                    live.as_ref()
                ),
                "{raw} read back as {live:?}"
            );
        }

        let (_, live) = parse_default("'active'::text");
        assert!(!eq(DefaultValue::expr("'inactive'::text"), live.unwrap()));
    }

    #[test]
    fn test_cast_literal_coerces_to_numbers_and_booleans() {
        assert!(eq(DefaultValue::expr("'42'::integer"), DefaultValue::from(42)));
        assert!(eq(DefaultValue::from(true), DefaultValue::expr("'t'::boolean")));
        assert!(!eq(DefaultValue::expr("'7'::integer"), DefaultValue::from(42)));
    }

    #[test]
    fn test_missing_default_on_one_side() {
        let driver = MemoryDriver::new();
        assert!(defaults_equivalent(&driver, None, None));
        assert!(!defaults_equivalent(&driver, Some(&DefaultValue::from(1)), None));
        assert!(!defaults_equivalent(&driver, None, Some(&DefaultValue::from(1))));
    }

    #[test]
    fn test_column_changes_through_type_aliases() {
        let driver = MemoryDriver::new();
        let desired = Column::new("id", "int").generated(GenerationStrategy::Increment);
        let live = Column::new("id", "integer").generated(GenerationStrategy::Increment);
        assert!(column_changes(&driver, "post", &desired, &live).unwrap().is_empty());

        let live = Column::new("id", "bigint").nullable();
        assert_eq!(
            column_changes(&driver, "post", &desired, &live).unwrap(),
            vec![
                ColumnAttribute::Type,
                ColumnAttribute::Nullable,
                ColumnAttribute::Generated
            ]
        );
    }

    #[test]
    fn test_empty_comment_is_no_comment() {
        let driver = MemoryDriver::new();
        let desired = Column::new("title", "text");
        let live = Column::new("title", "text").comment("");
        assert!(column_changes(&driver, "post", &desired, &live).unwrap().is_empty());
    }

    #[test]
    fn test_foreign_key_matching_treats_no_action_as_default() {
        let desired = ForeignKey::new("comment", &["post_id"], "post", &["id"]);
        let live = desired.clone().on_delete(ReferentialAction::NoAction);
        assert!(foreign_key_matches(&desired, &live));

        let cascading = desired.clone().on_delete(ReferentialAction::Cascade);
        assert!(!foreign_key_matches(&desired, &cascading));

        let retargeted = ForeignKey::new("comment", &["post_id"], "article", &["id"]);
        assert!(!foreign_key_matches(&desired, &retargeted));
    }

    #[test]
    fn test_index_matching() {
        let a = Index::new("post", &["title"], false);
        assert!(index_matches(&a, &Index::named("other", &["title"], false)));
        assert!(!index_matches(&a, &Index::new("post", &["title"], true)));
        assert!(!index_matches(&a, &Index::new("post", &["title", "id"], false)));
    }
}
