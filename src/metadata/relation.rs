use super::{ColumnRef, EntityId};
use crate::registry::{CascadeOptions, ReferentialAction, RelationType, TreeRole};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RelationRef {
    pub entity: EntityId,
    pub relation: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationMetadata {
    pub entity: EntityId,
    pub embedded: Option<usize>,
    pub property_name: String,
    pub property_path: String,
    pub relation_type: RelationType,
    pub target: String,
    pub inverse_entity: EntityId,
    pub inverse_side_property_path: Option<String>,
    pub inverse_relation: Option<RelationRef>,
    pub is_owning: bool,
    pub cascade: CascadeOptions,
    pub nullable: bool,
    pub primary: bool,
    pub lazy: bool,
    pub eager: bool,
    pub on_delete: Option<ReferentialAction>,
    pub on_update: Option<ReferentialAction>,
    pub create_foreign_key_constraints: bool,
    pub tree_role: Option<TreeRole>,
    /// Join columns on the owning entity (many-to-one and owning one-to-one).
    pub join_columns: Vec<usize>,
    /// Junction columns pointing back at this relation's entity.
    pub junction_columns: Vec<ColumnRef>,
    /// Junction columns pointing at the related entity.
    pub inverse_junction_columns: Vec<ColumnRef>,
    pub junction_entity: Option<EntityId>,
    pub foreign_key: Option<usize>,
}

impl RelationMetadata {
    pub fn is_one_to_one(&self) -> bool {
        self.relation_type == RelationType::OneToOne
    }

    pub fn is_one_to_many(&self) -> bool {
        self.relation_type == RelationType::OneToMany
    }

    pub fn is_many_to_one(&self) -> bool {
        self.relation_type == RelationType::ManyToOne
    }

    pub fn is_many_to_many(&self) -> bool {
        self.relation_type == RelationType::ManyToMany
    }

    pub fn is_one_to_one_owner(&self) -> bool {
        self.is_one_to_one() && self.is_owning
    }

    pub fn is_many_to_many_owner(&self) -> bool {
        self.is_many_to_many() && self.is_owning
    }

    pub fn has_join_columns(&self) -> bool {
        !self.join_columns.is_empty()
    }

    pub fn is_self_referencing(&self) -> bool {
        self.entity == self.inverse_entity
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationIdMetadata {
    pub property_name: String,
    pub relation: usize,
}
