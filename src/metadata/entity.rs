use super::{
    CheckMetadata, ColumnMetadata, EmbeddedMetadata, ExclusionMetadata, ForeignKeyMetadata,
    IndexMetadata, RelationIdMetadata, RelationMetadata, UniqueMetadata,
};
use crate::registry::{ColumnMode, TreeRole, TreeStrategy};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityId(pub usize);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Regular,
    View,
    Junction,
    Closure,
    ClosureJunction,
    EntityChild,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityMetadata {
    pub id: EntityId,
    pub target: String,
    pub given_table_name: Option<String>,
    pub table_name_without_prefix: String,
    pub table_name: String,
    pub schema: Option<String>,
    pub kind: EntityKind,
    pub expression: Option<String>,
    pub synchronize: bool,
    /// Base-first chain of targets whose declarations were merged.
    pub inheritance_tree: Vec<String>,
    pub discriminator_value: Option<String>,
    /// Table-inheritance root for child entities, owner for junctions.
    pub parent_entity: Option<EntityId>,
    pub child_entities: Vec<EntityId>,
    pub tree_type: Option<TreeStrategy>,
    pub closure_junction: Option<EntityId>,
    pub primary_key_name: Option<String>,
    pub columns: Vec<ColumnMetadata>,
    pub relations: Vec<RelationMetadata>,
    pub relation_ids: Vec<RelationIdMetadata>,
    pub embeddeds: Vec<EmbeddedMetadata>,
    pub foreign_keys: Vec<ForeignKeyMetadata>,
    pub indices: Vec<IndexMetadata>,
    pub uniques: Vec<UniqueMetadata>,
    pub checks: Vec<CheckMetadata>,
    pub exclusions: Vec<ExclusionMetadata>,
}

impl EntityMetadata {
    pub(crate) fn new(id: EntityId, target: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            id,
            target: target.into(),
            given_table_name: None,
            table_name_without_prefix: String::new(),
            table_name: String::new(),
            schema: None,
            kind,
            expression: None,
            synchronize: true,
            inheritance_tree: Vec::new(),
            discriminator_value: None,
            parent_entity: None,
            child_entities: Vec::new(),
            tree_type: None,
            closure_junction: None,
            primary_key_name: None,
            columns: Vec::new(),
            relations: Vec::new(),
            relation_ids: Vec::new(),
            embeddeds: Vec::new(),
            foreign_keys: Vec::new(),
            indices: Vec::new(),
            uniques: Vec::new(),
            checks: Vec::new(),
            exclusions: Vec::new(),
        }
    }

    pub fn is_junction(&self) -> bool {
        matches!(self.kind, EntityKind::Junction | EntityKind::ClosureJunction)
    }

    /// Whether this entity owns a physical table the synchronizer manages.
    pub fn has_own_table(&self) -> bool {
        !matches!(self.kind, EntityKind::View | EntityKind::EntityChild)
    }

    pub fn table_path(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.table_name),
            None => self.table_name.clone(),
        }
    }

    pub fn column_index(&self, database_name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.database_name == database_name)
    }

    pub fn find_column_with_property_path(&self, path: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.property_path == path)
    }

    pub fn find_column_with_database_name(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.database_name == name)
    }

    pub fn find_relation_with_property_path(&self, path: &str) -> Option<&RelationMetadata> {
        self.relations.iter().find(|r| r.property_path == path)
    }

    pub fn primary_columns(&self) -> impl Iterator<Item = &ColumnMetadata> {
        self.columns.iter().filter(|c| c.primary)
    }

    pub fn primary_column_names(&self) -> Vec<String> {
        self.primary_columns().map(|c| c.database_name.clone()).collect()
    }

    pub fn has_multiple_primary_keys(&self) -> bool {
        self.primary_columns().count() > 1
    }

    pub fn generated_columns(&self) -> impl Iterator<Item = &ColumnMetadata> {
        self.columns.iter().filter(|c| c.is_generated())
    }

    fn column_with_mode(&self, mode: ColumnMode) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.mode == mode)
    }

    pub fn create_date_column(&self) -> Option<&ColumnMetadata> {
        self.column_with_mode(ColumnMode::CreateDate)
    }

    pub fn update_date_column(&self) -> Option<&ColumnMetadata> {
        self.column_with_mode(ColumnMode::UpdateDate)
    }

    pub fn delete_date_column(&self) -> Option<&ColumnMetadata> {
        self.column_with_mode(ColumnMode::DeleteDate)
    }

    pub fn version_column(&self) -> Option<&ColumnMetadata> {
        self.column_with_mode(ColumnMode::Version)
    }

    pub fn discriminator_column(&self) -> Option<&ColumnMetadata> {
        self.column_with_mode(ColumnMode::Discriminator)
    }

    pub fn tree_level_column(&self) -> Option<&ColumnMetadata> {
        self.column_with_mode(ColumnMode::TreeLevel)
    }

    pub fn tree_parent_relation(&self) -> Option<&RelationMetadata> {
        self.relations
            .iter()
            .find(|r| r.tree_role == Some(TreeRole::Parent))
    }

    pub fn tree_children_relation(&self) -> Option<&RelationMetadata> {
        self.relations
            .iter()
            .find(|r| r.tree_role == Some(TreeRole::Children))
    }

    pub fn one_to_one_relations(&self) -> impl Iterator<Item = &RelationMetadata> {
        self.relations.iter().filter(|r| r.is_one_to_one())
    }

    pub fn owner_one_to_one_relations(&self) -> impl Iterator<Item = &RelationMetadata> {
        self.relations.iter().filter(|r| r.is_one_to_one_owner())
    }

    pub fn one_to_many_relations(&self) -> impl Iterator<Item = &RelationMetadata> {
        self.relations.iter().filter(|r| r.is_one_to_many())
    }

    pub fn many_to_one_relations(&self) -> impl Iterator<Item = &RelationMetadata> {
        self.relations.iter().filter(|r| r.is_many_to_one())
    }

    pub fn many_to_many_relations(&self) -> impl Iterator<Item = &RelationMetadata> {
        self.relations.iter().filter(|r| r.is_many_to_many())
    }

    pub fn owner_many_to_many_relations(&self) -> impl Iterator<Item = &RelationMetadata> {
        self.relations.iter().filter(|r| r.is_many_to_many_owner())
    }

    pub fn relations_with_join_columns(&self) -> impl Iterator<Item = &RelationMetadata> {
        self.relations.iter().filter(|r| r.has_join_columns())
    }

    pub fn eager_relations(&self) -> impl Iterator<Item = &RelationMetadata> {
        self.relations.iter().filter(|r| r.eager)
    }

    pub fn lazy_relations(&self) -> impl Iterator<Item = &RelationMetadata> {
        self.relations.iter().filter(|r| r.lazy)
    }
}
