//! Resolved, immutable description of every entity.
//!
//! Entities live in an arena indexed by [`EntityId`]; relations, foreign keys
//! and junction links refer to each other through ids rather than owning
//! references, so the graph can be shared freely across tasks once built.

mod column;
mod constraint;
mod embedded;
mod entity;
mod relation;

pub use column::*;
pub use constraint::*;
pub use embedded::*;
pub use entity::*;
pub use relation::*;

use crate::util::ResolutionError;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetadataGraph {
    entities: Vec<EntityMetadata>,
    #[serde(skip)]
    by_target: HashMap<String, EntityId>,
}

impl MetadataGraph {
    pub(crate) fn from_entities(entities: Vec<EntityMetadata>) -> Self {
        let by_target = entities
            .iter()
            .map(|e| (e.target.clone(), e.id))
            .collect();
        Self {
            entities,
            by_target,
        }
    }

    pub fn entities(&self) -> &[EntityMetadata] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity(&self, id: EntityId) -> &EntityMetadata {
        &self.entities[id.0]
    }

    pub fn find(&self, target: &str) -> Option<&EntityMetadata> {
        self.by_target.get(target).map(|id| self.entity(*id))
    }

    pub fn find_by_table(&self, table_name: &str) -> Option<&EntityMetadata> {
        self.entities
            .iter()
            .find(|e| e.has_own_table() && e.table_name == table_name)
    }

    pub fn column(&self, reference: ColumnRef) -> &ColumnMetadata {
        &self.entity(reference.entity).columns[reference.column]
    }

    pub fn relation(&self, reference: RelationRef) -> &RelationMetadata {
        &self.entity(reference.entity).relations[reference.relation]
    }

    pub fn inverse_of(&self, relation: &RelationMetadata) -> Option<&RelationMetadata> {
        relation.inverse_relation.map(|r| self.relation(r))
    }

    pub fn junction_entities(&self) -> impl Iterator<Item = &EntityMetadata> {
        self.entities.iter().filter(|e| e.is_junction())
    }

    /// Entities whose tables are created and diffed by the synchronizer.
    pub fn synchronized_tables(&self) -> impl Iterator<Item = &EntityMetadata> {
        self.entities
            .iter()
            .filter(|e| e.synchronize && e.has_own_table())
    }

    pub fn views(&self) -> impl Iterator<Item = &EntityMetadata> {
        self.entities
            .iter()
            .filter(|e| e.synchronize && e.kind == EntityKind::View)
    }

    /// Order in which rows can be inserted so that every required reference
    /// already exists. Nullable and self-referencing relations do not
    /// constrain the order.
    pub fn persistence_order(&self) -> Result<Vec<EntityId>, ResolutionError> {
        let mut graph: DiGraph<EntityId, ()> = DiGraph::new();
        let nodes: Vec<NodeIndex> = self
            .entities
            .iter()
            .map(|e| graph.add_node(e.id))
            .collect();

        for entity in &self.entities {
            if entity.kind == EntityKind::View {
                continue;
            }
            if entity.is_junction() {
                for fk in &entity.foreign_keys {
                    if fk.referenced_entity != entity.id {
                        graph.update_edge(nodes[fk.referenced_entity.0], nodes[entity.id.0], ());
                    }
                }
                continue;
            }
            for relation in &entity.relations {
                if !relation.is_owning
                    || !relation.has_join_columns()
                    || relation.nullable
                    || relation.is_self_referencing()
                {
                    continue;
                }
                graph.update_edge(nodes[relation.inverse_entity.0], nodes[entity.id.0], ());
            }
        }

        match toposort(&graph, None) {
            Ok(order) => Ok(order.into_iter().map(|n| graph[n]).collect()),
            Err(cycle) => {
                let offending = cycle.node_id();
                let members = tarjan_scc(&graph)
                    .into_iter()
                    .find(|scc| scc.contains(&offending))
                    .unwrap_or_else(|| vec![offending]);
                let mut entities: Vec<String> = members
                    .into_iter()
                    .map(|n| self.entity(graph[n]).target.clone())
                    .collect();
                entities.sort();
                Err(ResolutionError::CyclicDependency { entities })
            }
        }
    }
}
