use super::*;

fn post() -> Table {
    Table::new("post")
        .primary_column(Column::new("id", "int").generated(GenerationStrategy::Increment))
        .column(Column::new("title", "varchar").length(255))
}

fn tag() -> Table {
    Table::new("tag")
        .primary_column(Column::new("id", "bigint").generated(GenerationStrategy::Increment))
        .column(Column::new("label", "text").unique())
}

#[test]
fn test_generated_column_is_not_nullable() {
    let col = Column::new("id", "int").nullable().generated(GenerationStrategy::Identity);
    assert!(!col.nullable);
    assert!(col.is_generated());
}

#[test]
fn test_primary_column_registers_key() {
    let table = post();
    assert_eq!(table.primary_key_columns(), vec!["id"]);
    assert!(table.is_primary("id"));
    assert!(!table.is_primary("title"));
    assert_eq!(table.primary_keys[0].table, "post");
}

#[test]
fn test_derived_index_and_fk_names() {
    let idx = Index::new("post", &["author_id", "created_at"], false);
    assert_eq!(idx.name, "idx_post_author_id_created_at");

    let uq = Index::new("post", &["slug"], true);
    assert_eq!(uq.name, "uq_post_slug");
    assert!(uq.covers("slug"));
    assert!(!uq.covers("title"));

    let fk = ForeignKey::new("comment", &["post_id"], "post", &["id"]);
    assert_eq!(fk.name, "fk_comment_post_id");
    assert!(fk.involves("comment", "post_id"));
    assert!(fk.involves("post", "id"));
    assert!(!fk.involves("post", "title"));
}

#[test]
fn test_validate_duplicate_column() {
    let table = post().column(Column::new("title", "text"));
    assert_eq!(
        table.validate(),
        Err(SchemaError::DuplicateColumn {
            table: "post".to_string(),
            column: "title".to_string()
        })
    );
}

#[test]
fn test_validate_nullable_generated() {
    let mut table = post();
    table.columns[0].nullable = true;
    assert!(matches!(
        table.validate(),
        Err(SchemaError::NullableGenerated { column, .. }) if column == "id"
    ));
}

#[test]
fn test_validate_fk_arity() {
    let table = post()
        .column(Column::new("author_id", "int"))
        .foreign_key(ForeignKey::new("post", &["author_id"], "user", &["id", "tenant_id"]));
    assert!(matches!(
        table.validate(),
        Err(SchemaError::ForeignKeyArity { columns: 1, referenced: 2, .. })
    ));
}

#[test]
fn test_validate_unknown_index_column() {
    let table = post().index(Index::new("post", &["slug"], true));
    assert!(matches!(
        table.validate(),
        Err(SchemaError::UnknownColumn { column, .. }) if column == "slug"
    ));
}

#[test]
fn test_validate_duplicate_index() {
    let table = post()
        .index(Index::new("post", &["title"], false))
        .index(Index::new("post", &["title"], false));
    assert!(matches!(table.validate(), Err(SchemaError::DuplicateIndex { .. })));
}

#[test]
fn test_remove_column_prunes_primary_key() {
    let mut table = post();
    let removed = table.remove_column("id");
    assert!(removed.is_some());
    assert!(table.primary_keys.is_empty());
    assert_eq!(table.columns.len(), 1);
    assert!(table.remove_column("id").is_none());
}

#[test]
fn test_replace_column_keeps_position() {
    let mut table = post().column(Column::new("body", "text"));
    table.replace_column(Column::new("title", "text"));
    let names: Vec<_> = table.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "title", "body"]);
    assert_eq!(table.get_column("title").unwrap().column_type, "text");
}

#[test]
fn test_referential_action_roundtrip_keywords() {
    for action in [
        ReferentialAction::Cascade,
        ReferentialAction::SetNull,
        ReferentialAction::SetDefault,
        ReferentialAction::Restrict,
        ReferentialAction::NoAction,
    ] {
        assert_eq!(ReferentialAction::parse(action.to_sql()), Some(action));
    }
    assert_eq!(ReferentialAction::parse("set null"), Some(ReferentialAction::SetNull));
    assert_eq!(ReferentialAction::parse("explode"), None);
}

#[test]
fn test_default_value_display() {
    assert_eq!(DefaultValue::from(42).to_string(), "42");
    assert_eq!(DefaultValue::from(false).to_string(), "false");
    assert_eq!(DefaultValue::string("it's").to_string(), "'it''s'");
    assert_eq!(DefaultValue::expr("now()").to_string(), "now()");
}

#[test]
fn test_graph_synchronizable_filters_kinds() {
    let graph = MetadataGraph::new()
        .table(post())
        .entity(EntityMetadata::regular(tag()).skip_sync())
        .entity(EntityMetadata::single_table_child(Table::new("post")));

    let names: Vec<_> = graph.synchronizable().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["post"]);
    assert!(graph.get_table("tag").is_none());
    // the single-table child shares the parent's name but is not counted twice
    assert!(graph.validate().is_ok());
}

#[test]
fn test_graph_skip_by_name() {
    let mut graph = MetadataGraph::new().table(post()).table(tag());
    assert!(graph.skip("tag"));
    assert!(!graph.skip("missing"));

    let names: Vec<_> = graph.synchronizable().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["post"]);
}

#[test]
fn test_graph_rejects_duplicate_tables() {
    let graph = MetadataGraph::new().table(post()).table(post());
    assert!(matches!(
        graph.validate(),
        Err(SchemaError::DuplicateTable { table }) if table == "post"
    ));
}

#[test]
fn test_junction_table_derivation() {
    let junction = EntityMetadata::junction(&post(), &tag()).unwrap();
    assert_eq!(junction.kind, TableKind::Junction);

    let table = &junction.table;
    assert_eq!(table.name, "post_tag");
    assert_eq!(table.primary_key_columns(), vec!["post_id", "tag_id"]);

    let post_id = table.get_column("post_id").unwrap();
    assert_eq!(post_id.column_type, "int");
    assert!(post_id.generated.is_none());
    assert!(!post_id.nullable);
    assert_eq!(table.get_column("tag_id").unwrap().column_type, "bigint");

    assert_eq!(table.foreign_keys.len(), 2);
    assert_eq!(table.foreign_keys[0].referenced_table, "post");
    assert_eq!(table.foreign_keys[1].referenced_table, "tag");
    assert!(
        table
            .foreign_keys
            .iter()
            .all(|fk| fk.on_delete == Some(ReferentialAction::Cascade))
    );
    assert_eq!(table.indices.len(), 2);
    assert!(table.validate().is_ok());
}

#[test]
fn test_junction_requires_primary_keys() {
    let keyless = Table::new("note").column(Column::new("body", "text"));
    assert!(matches!(
        EntityMetadata::junction(&post(), &keyless),
        Err(SchemaError::MissingPrimaryKey { table }) if table == "note"
    ));
}

#[test]
fn test_schema_lookup() {
    let mut schema = Schema::from_tables([post(), tag()]);
    assert_eq!(schema.iter_tables().count(), 2);
    assert!(schema.get_table("post").is_some());
    schema.get_table_mut("tag").unwrap().just_created = true;
    assert!(schema.get_table("tag").unwrap().just_created);
}
