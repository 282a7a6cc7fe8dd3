//! SQL text helpers shared by the keel crates.
//!
//! Identifier quoting, literal escaping, and the deterministic naming rules
//! for indices and constraints. Names derived here are stable across runs,
//! which is what lets repeated synchronizations compare indices and foreign
//! keys by name alone.

/// Longest identifier Postgres keeps without truncating.
pub const MAX_IDENT_LEN: usize = 63;

/// A SQL string literal wrapper.
///
/// Display writes the value escaped and quoted with single quotes.
///
/// # Example
/// ```
/// use keel_sql::Lit;
/// assert_eq!(format!("{}", Lit("foo")), "'foo'");
/// assert_eq!(format!("{}", Lit("it's")), "'it''s'");
/// ```
pub struct Lit<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Lit<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'")?;
        for c in self.0.as_ref().chars() {
            if c == '\'' {
                write!(f, "''")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "'")
    }
}

/// A SQL identifier wrapper.
///
/// Display writes the value escaped and quoted with double quotes.
///
/// # Example
/// ```
/// use keel_sql::Ident;
/// assert_eq!(format!("{}", Ident("user")), "\"user\"");
/// assert_eq!(format!("{}", Ident("bla\"h")), "\"bla\"\"h\"");
/// ```
pub struct Ident<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"")?;
        for c in self.0.as_ref().chars() {
            if c == '"' {
                write!(f, "\"\"")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "\"")
    }
}

/// Escape a string literal for SQL.
pub fn escape_string(s: &str) -> String {
    format!("{}", Lit(s))
}

/// Quote an identifier.
///
/// Always quotes, so reserved words like `user` or `order` are safe as table
/// names. Doubles any embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("{}", Ident(name))
}

/// Quote and join a list of identifiers with `, `.
pub fn quote_ident_list(names: &[impl AsRef<str>]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Generate a standard index name for a table and columns.
///
/// # Examples
///
/// ```
/// assert_eq!(keel_sql::index_name("user", &["email"]), "idx_user_email");
/// assert_eq!(
///     keel_sql::index_name("post", &["author_id", "created_at"]),
///     "idx_post_author_id_created_at"
/// );
/// ```
pub fn index_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    derived_name("idx", table, columns)
}

/// Generate a standard unique index name for a table and columns.
///
/// ```
/// assert_eq!(keel_sql::unique_index_name("user", &["email"]), "uq_user_email");
/// ```
pub fn unique_index_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    derived_name("uq", table, columns)
}

/// Generate a foreign key constraint name for a table and its owning columns.
///
/// ```
/// assert_eq!(keel_sql::foreign_key_name("post", &["author_id"]), "fk_post_author_id");
/// ```
pub fn foreign_key_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    derived_name("fk", table, columns)
}

/// Name of the single-column unique constraint backing a `unique` column.
pub fn unique_constraint_name(table: &str, column: &str) -> String {
    derived_name("uk", table, &[column])
}

/// Name of a table's primary key constraint.
pub fn primary_key_name(table: &str) -> String {
    derived_name("pk", table, &[] as &[&str])
}

/// Build `{prefix}_{table}_{columns}`, falling back to a hashed suffix when the
/// result would exceed [`MAX_IDENT_LEN`].
fn derived_name(prefix: &str, table: &str, columns: &[impl AsRef<str>]) -> String {
    let mut name = format!("{}_{}", prefix, table);
    for col in columns {
        name.push('_');
        name.push_str(col.as_ref());
    }

    if name.len() <= MAX_IDENT_LEN {
        return name;
    }

    let hex = blake3::hash(name.as_bytes()).to_hex().to_string();
    let suffix = &hex[..16];

    // keep room for "_" + suffix
    let mut len = MAX_IDENT_LEN - suffix.len() - 1;
    while len > 0 && !name.is_char_boundary(len) {
        len -= 1;
    }
    format!("{}_{}", &name[..len], suffix)
}

/// Collapse whitespace outside of quoted sections and trim.
///
/// Used to compare SQL expressions (defaults, mostly) without caring about
/// how they were indented. Quoted text is kept verbatim.
pub fn normalize_sql_expr(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut pending_space = false;

    let mut in_single_quote = false;
    let mut in_double_quote = false;

    let mut chars = expr.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_single_quote {
            out.push(ch);
            if ch == '\'' {
                // '' is an escaped quote, not the end of the literal
                if let Some(next) = chars.next_if_eq(&'\'') {
                    out.push(next);
                } else {
                    in_single_quote = false;
                }
            }
            continue;
        }

        if in_double_quote {
            out.push(ch);
            if ch == '"' {
                if let Some(next) = chars.next_if_eq(&'"') {
                    out.push(next);
                } else {
                    in_double_quote = false;
                }
            }
            continue;
        }

        match ch {
            c if c.is_whitespace() => {
                pending_space = true;
            }
            c => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                if c == '\'' {
                    in_single_quote = true;
                } else if c == '"' {
                    in_double_quote = true;
                }
                out.push(c);
            }
        }
    }

    out
}

/// Lowercase ASCII outside of quoted sections.
///
/// String literals and quoted identifiers keep their case.
pub fn fold_sql_case(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut quote = None;

    for ch in expr.chars() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                }
                out.push(ch);
            }
            None => {
                if ch == '\'' || ch == '"' {
                    quote = Some(ch);
                }
                out.push(ch.to_ascii_lowercase());
            }
        }
    }

    out
}

/// `'it''s'::text` -> `it's`. `None` when `raw` is not a quoted literal
/// followed by at most one cast.
pub fn literal_value(raw: &str) -> Option<String> {
    let mut chars = raw.strip_prefix('\'')?.char_indices().peekable();
    let mut literal = String::new();
    while let Some((i, ch)) = chars.next() {
        if ch != '\'' {
            literal.push(ch);
            continue;
        }
        if chars.next_if(|(_, c)| *c == '\'').is_some() {
            literal.push('\'');
            continue;
        }
        // closing quote: only a single cast may follow
        let rest = &raw[i + 2..];
        return (rest.is_empty() || is_cast(rest)).then_some(literal);
    }
    None
}

/// `::character varying`, `::text[]` and the like.
fn is_cast(rest: &str) -> bool {
    rest.strip_prefix("::").is_some_and(|ty| {
        !ty.is_empty()
            && ty
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '[' | ']' | '"'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_list() {
        assert_eq!(quote_ident_list(&["a", "b"]), "\"a\", \"b\"");
        assert_eq!(quote_ident_list(&[] as &[&str]), "");
    }

    #[test]
    fn test_derived_names() {
        assert_eq!(index_name("post", &["title"]), "idx_post_title");
        assert_eq!(unique_index_name("post", &["slug"]), "uq_post_slug");
        assert_eq!(foreign_key_name("comment", &["post_id"]), "fk_comment_post_id");
        assert_eq!(unique_constraint_name("user", "email"), "uk_user_email");
        assert_eq!(primary_key_name("user"), "pk_user");
    }

    #[test]
    fn test_long_names_are_truncated_deterministically() {
        let table = "a_rather_long_table_name_for_an_audit_log_of_things";
        let cols = ["first_very_long_column_name", "second_very_long_column_name"];

        let a = index_name(table, &cols);
        let b = index_name(table, &cols);
        assert_eq!(a, b);
        assert!(a.len() <= MAX_IDENT_LEN, "{} is too long", a);
        assert!(a.starts_with("idx_a_rather_long_table_name"));

        // a different column set must not collide
        let c = index_name(table, &["first_very_long_column_name", "third_very_long_column"]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_normalize_sql_expr() {
        assert_eq!(normalize_sql_expr("  now( )  "), "now( )");
        assert_eq!(normalize_sql_expr("a\n   +\tb"), "a + b");
        assert_eq!(normalize_sql_expr("'two  spaces'"), "'two  spaces'");
        assert_eq!(normalize_sql_expr("'it''s   ok'  ||  x"), "'it''s   ok' || x");
        assert_eq!(normalize_sql_expr("\"Mixed  Case\"   col"), "\"Mixed  Case\" col");
    }

    #[test]
    fn test_fold_sql_case_keeps_quoted_text() {
        assert_eq!(fold_sql_case("NOW()"), "now()");
        assert_eq!(fold_sql_case("'Pending'::TEXT"), "'Pending'::text");
        assert_eq!(fold_sql_case("'It''S'"), "'It''S'");
        assert_eq!(fold_sql_case("LOWER(\"Name\")"), "lower(\"Name\")");
    }

    #[test]
    fn test_literal_value() {
        assert_eq!(literal_value("'{}'::jsonb").as_deref(), Some("{}"));
        assert_eq!(literal_value("'it''s'").as_deref(), Some("it's"));
        assert_eq!(literal_value("'a'::character varying").as_deref(), Some("a"));
        assert_eq!(literal_value("'a'::text || 'b'::text"), None);
        assert_eq!(literal_value("now()"), None);
        assert_eq!(literal_value("'unterminated"), None);
    }

    #[test]
    fn snapshot_escaping() {
        insta::assert_snapshot!(escape_string("o'clock"), @"'o''clock'");
        insta::assert_snapshot!(quote_ident("order"), @r#""order""#);
    }
}
