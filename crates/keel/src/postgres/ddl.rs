//! DDL rendering for Postgres.
//!
//! Every function here is pure: it turns descriptors into statements and
//! leaves execution to the driver. Identifiers are always quoted and tables
//! are always schema-qualified.

use keel_db_schema::{Column, ForeignKey, GenerationStrategy, Index, Table};
use keel_sql::{Lit, primary_key_name, quote_ident, quote_ident_list, unique_constraint_name};

use super::types::{canonical_type, ddl_type};
use crate::compare::ColumnAttribute;
use crate::{Error, Result};

/// `"schema"."name"`
pub fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

fn unsupported(table: &str, column: &Column) -> Error {
    Error::UnsupportedType {
        table: table.to_string(),
        column: column.name.clone(),
        column_type: column.column_type.clone(),
        dialect: "postgres",
    }
}

/// Column definition as it appears in `CREATE TABLE` and `ADD COLUMN`.
///
/// Unique and primary key constraints are table constraints, not part of this.
pub fn column_definition(table: &str, column: &Column) -> Result<String> {
    let ty = ddl_type(column).ok_or_else(|| unsupported(table, column))?;
    let mut def = format!("{} {}", quote_ident(&column.name), ty);

    match column.generated {
        Some(GenerationStrategy::Identity) => def.push_str(" GENERATED BY DEFAULT AS IDENTITY"),
        Some(GenerationStrategy::Uuid) => def.push_str(" DEFAULT gen_random_uuid()"),
        Some(GenerationStrategy::Increment) => {}
        None => {
            if let Some(default) = &column.default {
                def.push_str(&format!(" DEFAULT {}", default));
            }
        }
    }

    def.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
    Ok(def)
}

/// `CREATE TABLE` plus column comments.
///
/// Carries the primary key and single-column unique constraints. Foreign keys
/// and secondary indices are created separately.
pub fn create_table_sql(schema: &str, table: &Table) -> Result<Vec<String>> {
    let mut parts = Vec::with_capacity(table.columns.len() + 1);
    for column in &table.columns {
        parts.push(format!("    {}", column_definition(&table.name, column)?));
    }

    let pk_columns = table.primary_key_columns();
    if !pk_columns.is_empty() {
        parts.push(format!(
            "    CONSTRAINT {} PRIMARY KEY ({})",
            quote_ident(&primary_key_name(&table.name)),
            quote_ident_list(&pk_columns)
        ));
    }

    for column in table.columns.iter().filter(|c| c.unique) {
        parts.push(format!(
            "    CONSTRAINT {} UNIQUE ({})",
            quote_ident(&unique_constraint_name(&table.name, &column.name)),
            quote_ident(&column.name)
        ));
    }

    let mut statements = vec![format!(
        "CREATE TABLE {} (\n{}\n)",
        qualified(schema, &table.name),
        parts.join(",\n")
    )];

    for column in &table.columns {
        if let Some(comment) = &column.comment {
            statements.push(comment_sql(schema, &table.name, &column.name, Some(comment)));
        }
    }

    Ok(statements)
}

pub fn drop_table_sql(schema: &str, table: &str) -> String {
    format!("DROP TABLE {}", qualified(schema, table))
}

/// `COMMENT ON COLUMN`; `None` clears the comment.
pub fn comment_sql(schema: &str, table: &str, column: &str, comment: Option<&str>) -> String {
    let value = match comment {
        Some(text) => Lit(text).to_string(),
        None => "NULL".to_string(),
    };
    format!(
        "COMMENT ON COLUMN {}.{} IS {}",
        qualified(schema, table),
        quote_ident(column),
        value
    )
}

pub fn add_column_sql(schema: &str, table: &str, column: &Column) -> Result<Vec<String>> {
    let mut statements = vec![format!(
        "ALTER TABLE {} ADD COLUMN {}",
        qualified(schema, table),
        column_definition(table, column)?
    )];

    if column.unique {
        statements.push(add_unique_sql(schema, table, &column.name));
    }
    if let Some(comment) = &column.comment {
        statements.push(comment_sql(schema, table, &column.name, Some(comment)));
    }

    Ok(statements)
}

/// Drop a column from the live `table`.
///
/// Dropping a key column takes the whole primary key constraint with it, so
/// the key is put back on whatever key columns remain.
pub fn drop_column_sql(schema: &str, table: &Table, column: &str) -> Vec<String> {
    let mut statements = vec![format!(
        "ALTER TABLE {} DROP COLUMN {}",
        qualified(schema, &table.name),
        quote_ident(column)
    )];

    if table.is_primary(column) {
        let remaining: Vec<&str> = table
            .primary_key_columns()
            .into_iter()
            .filter(|c| *c != column)
            .collect();
        if !remaining.is_empty() {
            statements.push(add_primary_key_sql(schema, &table.name, &remaining));
        }
    }

    statements
}

/// Bring `old` in line with `new`, touching only the attributes in `changed`.
///
/// `unique_constraint` is the live name of the column's unique constraint, if
/// known; otherwise the derived name is assumed.
pub fn alter_column_sql(
    schema: &str,
    table: &str,
    old: &Column,
    new: &Column,
    changed: &[ColumnAttribute],
    unique_constraint: Option<&str>,
) -> Result<Vec<String>> {
    let has = |attr: ColumnAttribute| changed.contains(&attr);
    let target = qualified(schema, table);
    let alter = format!("ALTER TABLE {} ALTER COLUMN {}", target, quote_ident(&new.name));
    let generation_changed = has(ColumnAttribute::Generated);
    let mut statements = Vec::new();

    if generation_changed {
        match old.generated {
            Some(GenerationStrategy::Identity) => {
                statements.push(format!("{} DROP IDENTITY IF EXISTS", alter));
            }
            Some(_) => statements.push(format!("{} DROP DEFAULT", alter)),
            None if old.default.is_some() => statements.push(format!("{} DROP DEFAULT", alter)),
            None => {}
        }
    }

    if has(ColumnAttribute::Type) {
        let ty = canonical_type(new).ok_or_else(|| unsupported(table, new))?;
        statements.push(format!(
            "{} TYPE {} USING {}::{}",
            alter,
            ty,
            quote_ident(&new.name),
            ty
        ));
    }

    if generation_changed {
        match new.generated {
            Some(GenerationStrategy::Identity) => {
                statements.push(format!("{} ADD GENERATED BY DEFAULT AS IDENTITY", alter));
            }
            Some(GenerationStrategy::Increment) => {
                let sequence = qualified(schema, &format!("{}_{}_seq", table, new.name));
                statements.push(format!(
                    "CREATE SEQUENCE IF NOT EXISTS {} OWNED BY {}.{}",
                    sequence,
                    target,
                    quote_ident(&new.name)
                ));
                statements.push(format!("{} SET DEFAULT nextval({})", alter, Lit(&sequence)));
            }
            Some(GenerationStrategy::Uuid) => {
                statements.push(format!("{} SET DEFAULT gen_random_uuid()", alter));
            }
            None => {}
        }
    }

    if has(ColumnAttribute::Nullable) {
        let action = if new.nullable { "DROP" } else { "SET" };
        statements.push(format!("{} {} NOT NULL", alter, action));
    }

    if new.generated.is_none() && (has(ColumnAttribute::Default) || generation_changed) {
        match &new.default {
            Some(default) => statements.push(format!("{} SET DEFAULT {}", alter, default)),
            None if !generation_changed => statements.push(format!("{} DROP DEFAULT", alter)),
            None => {}
        }
    }

    if has(ColumnAttribute::Unique) {
        if new.unique {
            statements.push(add_unique_sql(schema, table, &new.name));
        } else {
            let name = unique_constraint
                .map(str::to_string)
                .unwrap_or_else(|| unique_constraint_name(table, &new.name));
            statements.push(drop_constraint_sql(schema, table, &name));
        }
    }

    if has(ColumnAttribute::Comment) {
        statements.push(comment_sql(schema, table, &new.name, new.comment.as_deref()));
    }

    Ok(statements)
}

fn add_unique_sql(schema: &str, table: &str, column: &str) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
        qualified(schema, table),
        quote_ident(&unique_constraint_name(table, column)),
        quote_ident(column)
    )
}

pub fn drop_constraint_sql(schema: &str, table: &str, name: &str) -> String {
    format!(
        "ALTER TABLE {} DROP CONSTRAINT {}",
        qualified(schema, table),
        quote_ident(name)
    )
}

pub fn add_primary_key_sql(schema: &str, table: &str, columns: &[&str]) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({})",
        qualified(schema, table),
        quote_ident(&primary_key_name(table)),
        quote_ident_list(columns)
    )
}

pub fn create_foreign_key_sql(schema: &str, fk: &ForeignKey) -> String {
    let mut sql = format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        qualified(schema, &fk.table),
        quote_ident(&fk.name),
        quote_ident_list(&fk.columns),
        qualified(schema, &fk.referenced_table),
        quote_ident_list(&fk.referenced_columns)
    );
    if let Some(action) = fk.on_delete {
        sql.push_str(&format!(" ON DELETE {}", action.to_sql()));
    }
    sql
}

pub fn create_index_sql(schema: &str, table: &str, index: &Index) -> String {
    let unique = if index.unique { "UNIQUE " } else { "" };
    format!(
        "CREATE {}INDEX {} ON {} ({})",
        unique,
        quote_ident(&index.name),
        qualified(schema, table),
        quote_ident_list(&index.columns)
    )
}

pub fn drop_index_sql(schema: &str, name: &str) -> String {
    format!("DROP INDEX {}", qualified(schema, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_db_schema::{DefaultValue, ReferentialAction};

    fn post() -> Table {
        Table::new("post")
            .primary_column(Column::new("id", "int").generated(GenerationStrategy::Increment))
            .column(Column::new("title", "varchar").length(255))
            .column(Column::new("slug", "text").unique())
            .column(
                Column::new("published", "bool")
                    .default(false)
                    .comment("visible to readers"),
            )
    }

    #[test]
    fn test_create_table() {
        let statements = create_table_sql("public", &post()).unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[0],
            "CREATE TABLE \"public\".\"post\" (\n    \
             \"id\" serial NOT NULL,\n    \
             \"title\" varchar(255) NOT NULL,\n    \
             \"slug\" text NOT NULL,\n    \
             \"published\" boolean DEFAULT false NOT NULL,\n    \
             CONSTRAINT \"pk_post\" PRIMARY KEY (\"id\"),\n    \
             CONSTRAINT \"uk_post_slug\" UNIQUE (\"slug\")\n)"
        );
        insta::assert_snapshot!(
            statements[1],
            @r#"COMMENT ON COLUMN "public"."post"."published" IS 'visible to readers'"#
        );
    }

    #[test]
    fn test_identity_and_uuid_columns() {
        let id = Column::new("id", "bigint").generated(GenerationStrategy::Identity);
        insta::assert_snapshot!(
            column_definition("t", &id).unwrap(),
            @r#""id" bigint GENERATED BY DEFAULT AS IDENTITY NOT NULL"#
        );

        let key = Column::new("key", "uuid").generated(GenerationStrategy::Uuid);
        insta::assert_snapshot!(
            column_definition("t", &key).unwrap(),
            @r#""key" uuid DEFAULT gen_random_uuid() NOT NULL"#
        );
    }

    #[test]
    fn test_unsupported_type() {
        let col = Column::new("shape", "geometry");
        assert!(matches!(
            column_definition("place", &col),
            Err(Error::UnsupportedType { dialect: "postgres", .. })
        ));
    }

    #[test]
    fn test_add_unique_column() {
        let col = Column::new("email", "text").nullable().unique();
        let statements = add_column_sql("public", "user", &col).unwrap();
        assert_eq!(
            statements,
            vec![
                "ALTER TABLE \"public\".\"user\" ADD COLUMN \"email\" text NULL",
                "ALTER TABLE \"public\".\"user\" ADD CONSTRAINT \"uk_user_email\" UNIQUE (\"email\")",
            ]
        );
    }

    #[test]
    fn test_drop_key_column_restores_remaining_key() {
        let table = Table::new("tagging")
            .primary_column(Column::new("post_id", "int"))
            .primary_column(Column::new("tag_id", "int"));
        let statements = drop_column_sql("public", &table, "tag_id");
        assert_eq!(
            statements,
            vec![
                "ALTER TABLE \"public\".\"tagging\" DROP COLUMN \"tag_id\"".to_string(),
                "ALTER TABLE \"public\".\"tagging\" ADD CONSTRAINT \"pk_tagging\" PRIMARY KEY (\"post_id\")"
                    .to_string(),
            ]
        );
    }

    #[test]
    fn test_alter_column_type_and_nullability() {
        let old = Column::new("title", "varchar").length(100).nullable();
        let new = Column::new("title", "text");
        let statements = alter_column_sql(
            "public",
            "post",
            &old,
            &new,
            &[ColumnAttribute::Type, ColumnAttribute::Nullable],
            None,
        )
        .unwrap();
        assert_eq!(
            statements,
            vec![
                "ALTER TABLE \"public\".\"post\" ALTER COLUMN \"title\" TYPE text USING \"title\"::text",
                "ALTER TABLE \"public\".\"post\" ALTER COLUMN \"title\" SET NOT NULL",
            ]
        );
    }

    #[test]
    fn test_alter_column_to_increment() {
        let old = Column::new("id", "int");
        let new = Column::new("id", "int").generated(GenerationStrategy::Increment);
        let statements =
            alter_column_sql("public", "post", &old, &new, &[ColumnAttribute::Generated], None)
                .unwrap();
        assert_eq!(
            statements,
            vec![
                "CREATE SEQUENCE IF NOT EXISTS \"public\".\"post_id_seq\" OWNED BY \"public\".\"post\".\"id\"",
                "ALTER TABLE \"public\".\"post\" ALTER COLUMN \"id\" SET DEFAULT nextval('\"public\".\"post_id_seq\"')",
            ]
        );
    }

    #[test]
    fn test_alter_default_and_unique() {
        let old = Column::new("status", "text")
            .default(DefaultValue::string("draft"))
            .unique();
        let new = Column::new("status", "text");
        let statements = alter_column_sql(
            "public",
            "post",
            &old,
            &new,
            &[ColumnAttribute::Unique, ColumnAttribute::Default],
            Some("post_status_key"),
        )
        .unwrap();
        assert_eq!(
            statements,
            vec![
                "ALTER TABLE \"public\".\"post\" ALTER COLUMN \"status\" DROP DEFAULT",
                "ALTER TABLE \"public\".\"post\" DROP CONSTRAINT \"post_status_key\"",
            ]
        );
    }

    #[test]
    fn test_foreign_key_and_index() {
        let fk = ForeignKey::new("comment", &["post_id"], "post", &["id"])
            .on_delete(ReferentialAction::Cascade);
        insta::assert_snapshot!(
            create_foreign_key_sql("public", &fk),
            @r#"ALTER TABLE "public"."comment" ADD CONSTRAINT "fk_comment_post_id" FOREIGN KEY ("post_id") REFERENCES "public"."post" ("id") ON DELETE CASCADE"#
        );

        let idx = Index::new("comment", &["post_id", "created_at"], false);
        insta::assert_snapshot!(
            create_index_sql("public", "comment", &idx),
            @r#"CREATE INDEX "idx_comment_post_id_created_at" ON "public"."comment" ("post_id", "created_at")"#
        );
        insta::assert_snapshot!(
            drop_index_sql("public", &idx.name),
            @r#"DROP INDEX "public"."idx_comment_post_id_created_at""#
        );
    }
}
