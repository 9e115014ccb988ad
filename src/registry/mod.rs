//! Append-only store of declaration records.
//!
//! Records are produced by whatever front end describes the entities
//! (annotations, a DSL, or JSON declaration files) and are consumed once by
//! the metadata builder. The registry never interprets them.

mod options;

pub use options::*;

use crate::util::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationRecord {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    #[serde(flatten)]
    pub kind: DeclarationKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "options", rename_all = "snake_case")]
pub enum DeclarationKind {
    Table(TableOptions),
    Column(ColumnOptions),
    Relation(RelationOptions),
    Index(IndexOptions),
    Unique(UniqueOptions),
    Check(CheckOptions),
    Exclusion(ExclusionOptions),
    JoinColumn(JoinColumnOptions),
    JoinTable(JoinTableOptions),
    Embedded(EmbeddedOptions),
    Tree(TreeOptions),
    Inheritance { parent: String },
    TableInheritance { column: ColumnOptions },
    RelationId(RelationIdOptions),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registry {
    records: Vec<DeclarationRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads and concatenates every JSON declaration file matching `pattern`,
    /// in sorted path order.
    pub fn load_glob(pattern: &str) -> Result<Self> {
        let mut paths = glob::glob(pattern)
            .map_err(|e| Error::config(format!("Invalid declaration pattern {pattern}: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::config(format!("Failed to read declaration path: {e}")))?;
        paths.sort();

        let mut registry = Self::new();
        for path in &paths {
            registry.extend(Self::load_file(path)?);
        }
        tracing::debug!(files = paths.len(), records = registry.len(), "loaded declarations");
        Ok(registry)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content).map_err(|e| {
            Error::config(format!("Failed to parse declarations in {}: {e}", path.display()))
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn push(&mut self, record: DeclarationRecord) -> &mut Self {
        self.records.push(record);
        self
    }

    pub fn extend(&mut self, other: Registry) -> &mut Self {
        self.records.extend(other.records);
        self
    }

    /// Drops every record. Used between test runs.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[DeclarationRecord] {
        &self.records
    }

    fn declare(&mut self, target: &str, property: Option<&str>, kind: DeclarationKind) -> &mut Self {
        self.push(DeclarationRecord {
            target: target.to_string(),
            property: property.map(str::to_string),
            kind,
        })
    }

    pub fn table(&mut self, target: &str, options: TableOptions) -> &mut Self {
        self.declare(target, None, DeclarationKind::Table(options))
    }

    pub fn column(&mut self, target: &str, property: &str, options: ColumnOptions) -> &mut Self {
        self.declare(target, Some(property), DeclarationKind::Column(options))
    }

    pub fn relation(&mut self, target: &str, property: &str, options: RelationOptions) -> &mut Self {
        self.declare(target, Some(property), DeclarationKind::Relation(options))
    }

    pub fn join_column(
        &mut self,
        target: &str,
        property: &str,
        options: JoinColumnOptions,
    ) -> &mut Self {
        self.declare(target, Some(property), DeclarationKind::JoinColumn(options))
    }

    pub fn join_table(
        &mut self,
        target: &str,
        property: &str,
        options: JoinTableOptions,
    ) -> &mut Self {
        self.declare(target, Some(property), DeclarationKind::JoinTable(options))
    }

    pub fn index(&mut self, target: &str, property: Option<&str>, options: IndexOptions) -> &mut Self {
        self.declare(target, property, DeclarationKind::Index(options))
    }

    pub fn unique(&mut self, target: &str, options: UniqueOptions) -> &mut Self {
        self.declare(target, None, DeclarationKind::Unique(options))
    }

    pub fn check(&mut self, target: &str, options: CheckOptions) -> &mut Self {
        self.declare(target, None, DeclarationKind::Check(options))
    }

    pub fn exclusion(&mut self, target: &str, options: ExclusionOptions) -> &mut Self {
        self.declare(target, None, DeclarationKind::Exclusion(options))
    }

    pub fn embedded(&mut self, target: &str, property: &str, options: EmbeddedOptions) -> &mut Self {
        self.declare(target, Some(property), DeclarationKind::Embedded(options))
    }

    pub fn tree(&mut self, target: &str, options: TreeOptions) -> &mut Self {
        self.declare(target, None, DeclarationKind::Tree(options))
    }

    pub fn extends(&mut self, target: &str, parent: &str) -> &mut Self {
        self.declare(
            target,
            None,
            DeclarationKind::Inheritance {
                parent: parent.to_string(),
            },
        )
    }

    pub fn table_inheritance(&mut self, target: &str, column: ColumnOptions) -> &mut Self {
        self.declare(target, None, DeclarationKind::TableInheritance { column })
    }

    pub fn relation_id(&mut self, target: &str, property: &str, relation: &str) -> &mut Self {
        self.declare(
            target,
            Some(property),
            DeclarationKind::RelationId(RelationIdOptions {
                relation: relation.to_string(),
            }),
        )
    }

    /// Records declared directly on `target`, in declaration order.
    pub fn declared_on<'a, 'b>(&'a self, target: &'b str) -> impl Iterator<Item = &'a DeclarationRecord> + use<'a, 'b> {
        self.records.iter().filter(move |r| r.target == target)
    }

    pub fn table_options(&self, target: &str) -> Option<&TableOptions> {
        self.declared_on(target).find_map(|r| match &r.kind {
            DeclarationKind::Table(options) => Some(options),
            _ => None,
        })
    }

    pub fn parent_of(&self, target: &str) -> Option<&str> {
        self.declared_on(target).find_map(|r| match &r.kind {
            DeclarationKind::Inheritance { parent } => Some(parent.as_str()),
            _ => None,
        })
    }

    pub fn tree_options(&self, target: &str) -> Option<&TreeOptions> {
        self.declared_on(target).find_map(|r| match &r.kind {
            DeclarationKind::Tree(options) => Some(options),
            _ => None,
        })
    }

    pub fn table_inheritance_column(&self, target: &str) -> Option<&ColumnOptions> {
        self.declared_on(target).find_map(|r| match &r.kind {
            DeclarationKind::TableInheritance { column } => Some(column),
            _ => None,
        })
    }

    /// Targets carrying a table declaration, in declaration order.
    pub fn table_targets(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.records
            .iter()
            .filter(|r| matches!(r.kind, DeclarationKind::Table(_)))
            .filter(|r| seen.insert(r.target.as_str()))
            .map(|r| r.target.as_str())
            .collect()
    }

    pub fn has_declarations(&self, target: &str) -> bool {
        self.declared_on(target).next().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fluent_declarations_append_in_order() {
        let mut registry = Registry::new();
        registry
            .table("Post", TableOptions::default())
            .column("Post", "id", ColumnOptions::primary_generated())
            .column("Post", "title", ColumnOptions::of(ColumnType::Varchar));

        assert_eq!(registry.len(), 3);
        let properties: Vec<_> = registry
            .declared_on("Post")
            .filter_map(|r| r.property.as_deref())
            .collect();
        assert_eq!(properties, vec!["id", "title"]);
    }

    #[test]
    fn clear_empties_the_store() {
        let mut registry = Registry::new();
        registry.table("Post", TableOptions::default());
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.table_targets().is_empty());
    }

    #[test]
    fn parses_json_declarations() {
        let json = r#"[
            {"target": "Post", "kind": "table", "options": {"name": "posts"}},
            {"target": "Post", "property": "id", "kind": "column",
             "options": {"column_type": "int", "primary": true, "generated": "increment"}},
            {"target": "Post", "property": "category", "kind": "relation",
             "options": {"relation_type": "many_to_one", "target": "Category"}},
            {"target": "Admin", "kind": "inheritance", "options": {"parent": "User"}}
        ]"#;

        let registry = Registry::from_json(json).unwrap();
        assert_eq!(registry.len(), 4);
        assert_eq!(
            registry.table_options("Post").and_then(|t| t.name.as_deref()),
            Some("posts")
        );
        assert_eq!(registry.parent_of("Admin"), Some("User"));
        match &registry.records()[2].kind {
            DeclarationKind::Relation(rel) => {
                assert_eq!(rel.relation_type, RelationType::ManyToOne);
                assert!(rel.nullable);
                assert!(rel.create_foreign_key_constraints);
            }
            other => panic!("expected relation, got {other:?}"),
        }
    }

    #[test]
    fn json_round_trip_preserves_records() {
        let mut registry = Registry::new();
        registry
            .table("Category", TableOptions::default())
            .tree("Category", TreeOptions::new(TreeStrategy::Closure))
            .column(
                "Category",
                "name",
                ColumnOptions::of(ColumnType::Varchar)
                    .length(100)
                    .default_value(DefaultValue::String("misc".into())),
            );

        let json = registry.to_json().unwrap();
        assert_eq!(Registry::from_json(&json).unwrap(), registry);
    }

    #[test]
    fn load_glob_reads_files_in_path_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b.json"),
            r#"[{"target": "B", "kind": "table", "options": {}}]"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            r#"[{"target": "A", "kind": "table", "options": {}}]"#,
        )
        .unwrap();

        let pattern = format!("{}/*.json", dir.path().display());
        let registry = Registry::load_glob(&pattern).unwrap();
        assert_eq!(registry.table_targets(), vec!["A", "B"]);
    }

    #[test]
    fn table_targets_are_deduplicated() {
        let mut registry = Registry::new();
        registry
            .table("Post", TableOptions::default())
            .table("Post", TableOptions::named("posts"));
        assert_eq!(registry.table_targets(), vec!["Post"]);
    }
}
