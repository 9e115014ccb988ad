mod common;
use common::*;

#[test]
fn many_to_many_builds_a_single_junction() {
    let graph = resolve(&blog_registry()).unwrap();
    assert_eq!(graph.len(), 3);

    let post = graph.find("Post").unwrap();
    let category = graph.find("Category").unwrap();
    let junction = graph.junction_entities().next().unwrap();
    assert_eq!(junction.kind, EntityKind::Junction);
    assert_eq!(junction.table_name, "post_categories_category");

    let names: Vec<_> = junction.columns.iter().map(|c| c.database_name.as_str()).collect();
    assert_eq!(names, vec!["postId", "categoryId"]);
    assert!(junction.columns.iter().all(|c| c.primary && !c.nullable));

    assert_eq!(junction.foreign_keys.len(), 2);
    let owner_fk = &junction.foreign_keys[0];
    assert_eq!(owner_fk.column_names, vec!["postId"]);
    assert_eq!(owner_fk.referenced_table_name, "post");
    assert_eq!(owner_fk.referenced_column_names, vec!["id"]);
    assert_eq!(owner_fk.on_delete, ReferentialAction::Cascade);
    let inverse_fk = &junction.foreign_keys[1];
    assert_eq!(inverse_fk.column_names, vec!["categoryId"]);
    assert_eq!(inverse_fk.referenced_table_name, "category");

    let categories = post.find_relation_with_property_path("categories").unwrap();
    let posts = category.find_relation_with_property_path("posts").unwrap();
    assert!(categories.is_owning);
    assert!(!posts.is_owning);
    assert_eq!(categories.junction_entity, Some(junction.id));
    assert_eq!(posts.junction_entity, Some(junction.id));
}

#[test]
fn junction_declared_on_both_sides_is_rejected() {
    let mut registry = blog_registry();
    registry.join_table("Category", "posts", JoinTableOptions::default());
    assert!(matches!(
        resolve(&registry),
        Err(ResolutionError::DuplicateJoinTable { .. })
    ));
}

#[test]
fn junction_declared_on_neither_side_is_rejected() {
    let mut registry = Registry::new();
    registry
        .table("Post", TableOptions::default())
        .column("Post", "id", ColumnOptions::primary_generated())
        .relation("Post", "tags", RelationOptions::many_to_many("Tag").inverse("posts"))
        .table("Tag", TableOptions::default())
        .column("Tag", "id", ColumnOptions::primary_generated())
        .relation("Tag", "posts", RelationOptions::many_to_many("Post").inverse("tags"));
    assert!(matches!(
        resolve(&registry),
        Err(ResolutionError::MissingJoinTable { .. })
    ));
}

fn profile_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .table("User", TableOptions::default())
        .column("User", "id", ColumnOptions::primary_generated())
        .relation("User", "profile", RelationOptions::one_to_one("Profile").inverse("user"))
        .table("Profile", TableOptions::default())
        .column("Profile", "id", ColumnOptions::primary_generated())
        .relation("Profile", "user", RelationOptions::one_to_one("User").inverse("profile"));
    registry
}

#[test]
fn one_to_one_needs_exactly_one_join_column() {
    let missing = resolve(&profile_registry()).unwrap_err();
    assert!(matches!(missing, ResolutionError::MissingJoinColumn { .. }));

    let mut one_side = profile_registry();
    one_side.join_column("User", "profile", JoinColumnOptions::default());
    let graph = resolve(&one_side).unwrap();
    let user = graph.find("User").unwrap();
    let join = user.find_column_with_database_name("profileId").unwrap();
    assert!(join.nullable);
    assert_eq!(user.foreign_keys[0].referenced_table_name, "profile");
    assert_eq!(user.uniques.len(), 1);
    assert!(user.uniques[0].name.starts_with("REL_"));
    assert!(graph.find("Profile").unwrap().foreign_keys.is_empty());

    let mut both_sides = one_side.clone();
    both_sides.join_column("Profile", "user", JoinColumnOptions::default());
    assert!(matches!(
        resolve(&both_sides),
        Err(ResolutionError::AmbiguousJoinColumn { .. })
    ));
}

#[test]
fn primary_relation_keys_the_owner() {
    let mut registry = Registry::new();
    registry
        .table("User", TableOptions::default())
        .column("User", "id", ColumnOptions::primary_generated())
        .table("Profile", TableOptions::default())
        .relation("Profile", "user", RelationOptions::one_to_one("User").primary())
        .join_column("Profile", "user", JoinColumnOptions::default());

    let graph = resolve(&registry).unwrap();
    let profile = graph.find("Profile").unwrap();
    let primaries: Vec<_> = profile.primary_columns().map(|c| c.database_name.as_str()).collect();
    assert_eq!(primaries, vec!["userId"]);
    assert!(!profile.find_column_with_database_name("userId").unwrap().nullable);

    assert_eq!(profile.foreign_keys.len(), 1);
    assert_eq!(profile.foreign_keys[0].referenced_table_name, "user");
    assert_eq!(profile.foreign_keys[0].referenced_column_names, vec!["id"]);
    assert!(profile.uniques.is_empty());
}

#[test]
fn entity_without_any_key_is_rejected() {
    let mut registry = Registry::new();
    registry
        .table("Log", TableOptions::default())
        .column("Log", "message", ColumnOptions::of(ColumnType::Text));
    assert!(matches!(
        resolve(&registry),
        Err(ResolutionError::MissingPrimaryColumn { entity }) if entity == "Log"
    ));
}

#[test]
fn many_to_one_synthesizes_join_column() {
    let graph = resolve(&comment_registry()).unwrap();
    let comment = graph.find("Comment").unwrap();
    let column = comment.find_column_with_database_name("postId").unwrap();
    assert_eq!(column.column_type, ColumnType::Int);
    assert!(column.is_join_column());
    assert_eq!(comment.foreign_keys.len(), 1);
    assert!(comment.foreign_keys[0].name.starts_with("FK_"));
}

#[test]
fn missing_relation_target_is_rejected() {
    let mut registry = Registry::new();
    registry
        .table("Comment", TableOptions::default())
        .column("Comment", "id", ColumnOptions::primary_generated())
        .relation("Comment", "post", RelationOptions::many_to_one("Post"));
    assert!(matches!(
        resolve(&registry),
        Err(ResolutionError::MissingRelationTarget { target, .. }) if target == "Post"
    ));
}

#[test]
fn missing_referenced_column_is_rejected() {
    let mut registry = comment_registry();
    registry.join_column(
        "Comment",
        "post",
        JoinColumnOptions::named("postSlug").referencing("slug"),
    );
    let err = resolve(&registry).unwrap_err();
    assert!(
        matches!(&err, ResolutionError::MissingReferencedColumn { column, target, .. } if column == "slug" && target == "Post"),
        "unexpected error: {err}"
    );
}

/// `Content{id}` stored in one table with its `Photo{size}` and
/// `Question{answers}` subclasses, told apart by `type`.
fn content_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .table("Content", TableOptions::default())
        .table_inheritance("Content", ColumnOptions::of(ColumnType::Varchar).named("type"))
        .column("Content", "id", ColumnOptions::primary_generated())
        .column("Content", "title", ColumnOptions::of(ColumnType::Varchar))
        .table("Photo", TableOptions::child("photo"))
        .extends("Photo", "Content")
        .column("Photo", "size", ColumnOptions::of(ColumnType::Int))
        .table("Question", TableOptions::child("question"))
        .extends("Question", "Content")
        .column("Question", "answers", ColumnOptions::of(ColumnType::Int));
    registry
}

#[test]
fn single_table_children_add_nullable_columns() {
    let graph = resolve(&content_registry()).unwrap();
    let content = graph.find("Content").unwrap();
    let column = |name: &str| content.find_column_with_database_name(name).unwrap();

    assert!(!column("id").nullable);
    assert!(!column("title").nullable);
    assert!(!column("type").nullable);
    assert!(column("size").nullable);
    assert!(column("answers").nullable);
}

#[test]
fn single_table_root_gets_discriminator_keys() {
    let index_columns = |registry: &Registry| -> Vec<Vec<String>> {
        let graph = resolve(registry).unwrap();
        let content = graph.find("Content").unwrap();
        content.indices.iter().map(|i| i.column_names.clone()).collect()
    };
    let discriminator = vec!["type".to_string()];
    let composite = vec!["id".to_string(), "type".to_string()];

    let synthesized = index_columns(&content_registry());
    assert!(synthesized.contains(&discriminator));
    assert!(synthesized.contains(&composite));

    // A declared discriminator index replaces the synthesized one only.
    let mut declared = content_registry();
    declared.index("Content", Some("type"), IndexOptions::default());
    let indices = index_columns(&declared);
    assert_eq!(indices.iter().filter(|c| **c == discriminator).count(), 1);
    assert!(indices.contains(&composite));
}

fn closure_registry(with_level: bool) -> Registry {
    let mut registry = Registry::new();
    registry
        .table("Category", TableOptions::default())
        .tree("Category", TreeOptions::new(TreeStrategy::Closure))
        .column("Category", "id", ColumnOptions::primary_generated())
        .column("Category", "name", ColumnOptions::of(ColumnType::Varchar));
    if with_level {
        registry.column("Category", "level", ColumnOptions::mode(ColumnMode::TreeLevel));
    }
    registry
}

#[test]
fn closure_tree_gets_ancestor_descendant_table() {
    let graph = resolve(&closure_registry(false)).unwrap();
    let closure = graph
        .entities()
        .iter()
        .find(|e| e.kind == EntityKind::ClosureJunction)
        .unwrap();
    assert_eq!(closure.table_name, "category_closure");
    let names: Vec<_> = closure.columns.iter().map(|c| c.database_name.as_str()).collect();
    assert_eq!(names, vec!["ancestor_id", "descendant_id"]);
    assert_eq!(closure.foreign_keys.len(), 2);
    for fk in &closure.foreign_keys {
        assert_eq!(fk.referenced_table_name, "category");
        assert_eq!(fk.referenced_column_names, vec!["id"]);
    }
}

#[test]
fn closure_tree_with_level_column_adds_level() {
    let graph = resolve(&closure_registry(true)).unwrap();
    let closure = graph
        .entities()
        .iter()
        .find(|e| e.kind == EntityKind::ClosureJunction)
        .unwrap();
    let level = closure.find_column_with_database_name("level").unwrap();
    assert!(!level.primary);
}

#[test]
fn closure_tree_rejects_composite_primary_key() {
    let mut registry = closure_registry(false);
    registry.column("Category", "locale", ColumnOptions::primary(ColumnType::Varchar));
    assert!(matches!(
        resolve(&registry),
        Err(ResolutionError::UnsupportedClosurePrimaryKey { count: 2, .. })
    ));
}

#[test]
fn resolution_is_deterministic() {
    let first = serde_json::to_string(&resolve(&blog_registry()).unwrap()).unwrap();
    let second = serde_json::to_string(&resolve(&blog_registry()).unwrap()).unwrap();
    assert_eq!(first, second);
}
