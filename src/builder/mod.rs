//! Resolves registry declarations into a [`MetadataGraph`].
//!
//! Resolution runs in fixed phases: entities are instantiated from their
//! merged declarations, relations are linked to their inverses, join columns
//! and junction tables are synthesized, then indices and constraint names are
//! derived. Any inconsistency aborts the whole build.

mod collect;
mod constraints;
mod junction;
mod relations;
mod validate;

use crate::metadata::{
    ColumnMetadata, EmbeddedMetadata, EntityId, EntityKind, EntityMetadata, MetadataGraph,
};
use crate::naming::{DefaultNamingStrategy, NamingStrategy};
use crate::registry::{
    ColumnMode, ColumnOptions, ColumnType, DefaultValue, GenerationStrategy, Registry, TableType,
    TreeStrategy,
};
use crate::util::ResolutionError;
use collect::{inheritance_chain, Collected, CollectedColumn, Scope};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub entity_prefix: Option<String>,
    /// Schema applied to entities that do not declare one.
    pub schema: Option<String>,
}

pub struct MetadataBuilder<'a> {
    registry: &'a Registry,
    naming: &'a dyn NamingStrategy,
    options: BuildOptions,
}

#[derive(Default)]
pub(crate) struct BuildState {
    entities: Vec<EntityMetadata>,
    /// Merged declarations, aligned with declared entities. Synthesized
    /// junctions have no entry.
    collected: Vec<Collected>,
    by_target: HashMap<String, EntityId>,
}

/// Resolves `registry` with the default naming strategy and no prefix.
pub fn resolve(registry: &Registry) -> Result<MetadataGraph, ResolutionError> {
    MetadataBuilder::new(registry, &DefaultNamingStrategy).build()
}

impl<'a> MetadataBuilder<'a> {
    pub fn new(registry: &'a Registry, naming: &'a dyn NamingStrategy) -> Self {
        Self {
            registry,
            naming,
            options: BuildOptions::default(),
        }
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_entity_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.options.entity_prefix = Some(prefix.into());
        self
    }

    pub fn build(&self) -> Result<MetadataGraph, ResolutionError> {
        let mut state = BuildState::default();

        self.instantiate_entities(&mut state)?;
        self.link_table_inheritance(&mut state)?;
        self.collect_declarations(&mut state)?;
        self.build_columns(&mut state);

        relations::build_relations(&mut state)?;
        relations::link_inverses(&mut state)?;
        relations::assign_ownership(&mut state)?;
        relations::build_join_columns(self, &mut state)?;
        validate::validate_primary_columns(&state)?;

        junction::build_junctions(self, &mut state)?;
        junction::build_closure_junctions(self, &mut state)?;

        constraints::build_constraints(self, &mut state)?;
        constraints::build_relation_ids(&mut state)?;
        constraints::build_primary_key_names(self, &mut state);

        validate::validate_columns(&state)?;

        let graph = MetadataGraph::from_entities(state.entities);
        graph.persistence_order()?;
        info!(entities = graph.len(), "metadata graph built");
        Ok(graph)
    }

    fn prefixed(&self, table_name: &str) -> String {
        match &self.options.entity_prefix {
            Some(prefix) => self.naming.prefix_table_name(prefix, table_name),
            None => table_name.to_string(),
        }
    }

    fn instantiate_entities(&self, state: &mut BuildState) -> Result<(), ResolutionError> {
        let targets: Vec<&str> = self
            .registry
            .table_targets()
            .into_iter()
            .filter(|t| {
                self.registry
                    .table_options(t)
                    .is_some_and(|o| o.table_type != TableType::Abstract)
            })
            .collect();

        for (index, target) in targets.into_iter().enumerate() {
            let options = self.registry.table_options(target).cloned().unwrap_or_default();
            let chain = inheritance_chain(self.registry, target)?;
            let tree = chain
                .iter()
                .rev()
                .find_map(|class| self.registry.tree_options(class))
                .map(|t| t.strategy);

            let kind = match options.table_type {
                TableType::View => EntityKind::View,
                TableType::EntityChild => EntityKind::EntityChild,
                _ if tree == Some(TreeStrategy::Closure) => EntityKind::Closure,
                _ => EntityKind::Regular,
            };
            if kind == EntityKind::View && options.expression.is_none() {
                return Err(ResolutionError::InvalidDeclaration {
                    entity: target.to_string(),
                    property: String::new(),
                    message: "view entity without an expression".to_string(),
                });
            }

            let id = EntityId(index);
            let mut entity = EntityMetadata::new(id, target, kind);
            let base_name = self.naming.table_name(target, options.name.as_deref());
            entity.table_name = self.prefixed(&base_name);
            entity.table_name_without_prefix = base_name;
            entity.given_table_name = options.name;
            entity.schema = options.schema.or_else(|| self.options.schema.clone());
            entity.expression = options.expression;
            entity.synchronize = options.synchronize;
            entity.discriminator_value = options.discriminator_value;
            entity.tree_type = tree;
            entity.inheritance_tree = chain;

            state.by_target.insert(target.to_string(), id);
            state.entities.push(entity);
        }
        Ok(())
    }

    /// Points single-table-inheritance children at the nearest ancestor
    /// entity that declares table inheritance and shares its table.
    fn link_table_inheritance(&self, state: &mut BuildState) -> Result<(), ResolutionError> {
        for index in 0..state.entities.len() {
            if state.entities[index].kind != EntityKind::EntityChild {
                continue;
            }
            let root = state.entities[index]
                .inheritance_tree
                .iter()
                .rev()
                .skip(1)
                .filter(|class| self.registry.table_inheritance_column(class).is_some())
                .find_map(|class| state.by_target.get(class).copied())
                .ok_or_else(|| ResolutionError::MissingTableInheritance {
                    entity: state.entities[index].target.clone(),
                })?;

            let (table_name, without_prefix, schema) = {
                let root = &state.entities[root.0];
                (
                    root.table_name.clone(),
                    root.table_name_without_prefix.clone(),
                    root.schema.clone(),
                )
            };
            let child = &mut state.entities[index];
            child.parent_entity = Some(root);
            child.table_name = table_name;
            child.table_name_without_prefix = without_prefix;
            child.schema = schema;
            if child.discriminator_value.is_none() {
                child.discriminator_value = Some(child.target.clone());
            }
            let child_id = child.id;
            state.entities[root.0].child_entities.push(child_id);
        }
        Ok(())
    }

    fn collect_declarations(&self, state: &mut BuildState) -> Result<(), ResolutionError> {
        for entity in &state.entities {
            let mut collected = Collected::default();
            let mut stack = entity.inheritance_tree.clone();
            for class in &entity.inheritance_tree {
                collected.collect_class(
                    self.registry,
                    &entity.target,
                    class,
                    &Scope::default(),
                    &mut stack,
                    false,
                )?;
            }

            // The shared table carries every child's own columns too. Rows of
            // the other classes leave them empty.
            let (own_columns, own_relations) = (collected.columns.len(), collected.relations.len());
            for child in &entity.child_entities {
                let child = &state.entities[child.0];
                for class in child
                    .inheritance_tree
                    .iter()
                    .filter(|c| !entity.inheritance_tree.contains(c))
                {
                    collected.collect_class(
                        self.registry,
                        &entity.target,
                        class,
                        &Scope::default(),
                        &mut stack,
                        true,
                    )?;
                }
            }
            for column in &mut collected.columns[own_columns..] {
                column.options.nullable = true;
            }
            for relation in &mut collected.relations[own_relations..] {
                relation.options.nullable = true;
            }
            state.collected.push(collected);
        }
        Ok(())
    }

    fn build_columns(&self, state: &mut BuildState) {
        for index in 0..state.entities.len() {
            let collected = &state.collected[index];
            let entity = &state.entities[index];
            let id = entity.id;

            let mut embeddeds: Vec<EmbeddedMetadata> = collected
                .embeddeds
                .iter()
                .map(|e| EmbeddedMetadata {
                    entity: id,
                    parent: e.parent,
                    property_name: e.property_name.clone(),
                    property_path: e.property_path.clone(),
                    target: e.target.clone(),
                    prefix: e.prefix.clone(),
                    columns: Vec::new(),
                    relations: Vec::new(),
                    children: Vec::new(),
                })
                .collect();
            for child in 0..embeddeds.len() {
                if let Some(parent) = embeddeds[child].parent {
                    embeddeds[parent].children.push(child);
                }
            }

            let mut columns: Vec<ColumnMetadata> = collected
                .columns
                .iter()
                .map(|c| self.build_column(id, c))
                .collect();
            for (position, column) in columns.iter().enumerate() {
                if let Some(embedded) = column.embedded {
                    embeddeds[embedded].columns.push(position);
                }
            }

            if let Some(discriminator) = self.discriminator_options(state, entity) {
                self.add_discriminator_column(id, &mut columns, &discriminator);
            }
            match entity.tree_type {
                Some(TreeStrategy::NestedSet) => {
                    let (left, right) = self.naming.nested_set_column_names();
                    for (name, start) in [(left, 1), (right, 2)] {
                        columns.push(self.synthesized_column(
                            id,
                            &name,
                            ColumnOptions::of(ColumnType::Int)
                                .default_value(DefaultValue::Number(start)),
                        ));
                    }
                }
                Some(TreeStrategy::MaterializedPath) => {
                    let name = self.naming.materialized_path_column_name();
                    columns.push(self.synthesized_column(
                        id,
                        &name,
                        ColumnOptions::of(ColumnType::Varchar)
                            .nullable()
                            .default_value(DefaultValue::String(String::new())),
                    ));
                }
                _ => {}
            }

            debug!(
                entity = %entity.target,
                table = %entity.table_name,
                columns = columns.len(),
                "resolved entity columns"
            );
            let entity = &mut state.entities[index];
            entity.columns = columns;
            entity.embeddeds = embeddeds;
        }
    }

    fn discriminator_options(
        &self,
        state: &BuildState,
        entity: &EntityMetadata,
    ) -> Option<ColumnOptions> {
        let root = match entity.parent_entity {
            Some(root) if entity.kind == EntityKind::EntityChild => &state.entities[root.0],
            _ => entity,
        };
        root.inheritance_tree
            .iter()
            .rev()
            .find_map(|class| self.registry.table_inheritance_column(class))
            .cloned()
    }

    fn add_discriminator_column(
        &self,
        id: EntityId,
        columns: &mut Vec<ColumnMetadata>,
        options: &ColumnOptions,
    ) {
        let property = options.name.clone().unwrap_or_else(|| "type".to_string());
        if let Some(existing) = columns.iter_mut().find(|c| c.property_path == property) {
            existing.mode = ColumnMode::Discriminator;
            existing.nullable = false;
            return;
        }
        let mut options = options.clone();
        options.mode = ColumnMode::Discriminator;
        options.name = None;
        options.nullable = false;
        columns.push(self.synthesized_column(id, &property, options));
    }

    fn synthesized_column(&self, id: EntityId, property: &str, options: ColumnOptions) -> ColumnMetadata {
        self.build_column(
            id,
            &CollectedColumn {
                property_name: property.to_string(),
                property_path: property.to_string(),
                embedded: None,
                prefixes: Vec::new(),
                options,
            },
        )
    }

    fn build_column(&self, entity: EntityId, collected: &CollectedColumn) -> ColumnMetadata {
        let options = &collected.options;
        let column_type = options
            .column_type
            .clone()
            .unwrap_or_else(|| default_column_type(options));
        let default = options.default.clone().or_else(|| match options.mode {
            ColumnMode::CreateDate | ColumnMode::UpdateDate => {
                Some(DefaultValue::Raw("CURRENT_TIMESTAMP".to_string()))
            }
            _ => None,
        });
        let nullable = !options.primary
            && (options.nullable || options.mode == ColumnMode::DeleteDate);

        ColumnMetadata {
            entity,
            embedded: collected.embedded,
            property_name: collected.property_name.clone(),
            property_path: collected.property_path.clone(),
            database_name: self.naming.column_name(
                &collected.property_name,
                options.name.as_deref(),
                &collected.prefixes,
            ),
            column_type,
            length: options.length,
            precision: options.precision,
            scale: options.scale,
            nullable,
            unique: options.unique,
            primary: options.primary,
            generation: options.generated,
            default,
            mode: options.mode,
            comment: options.comment.clone(),
            relation: None,
            referenced_column: None,
        }
    }
}

fn default_column_type(options: &ColumnOptions) -> ColumnType {
    match (options.generated, options.mode) {
        (Some(GenerationStrategy::Uuid), _) => ColumnType::Uuid,
        (Some(_), _) => ColumnType::Int,
        (_, ColumnMode::CreateDate | ColumnMode::UpdateDate | ColumnMode::DeleteDate) => {
            ColumnType::Timestamp
        }
        (_, ColumnMode::Version | ColumnMode::TreeLevel | ColumnMode::TreeChildrenCount) => {
            ColumnType::Int
        }
        _ => ColumnType::Varchar,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{EmbeddedOptions, TableOptions};

    fn post_registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .table("Post", TableOptions::default())
            .column("Post", "id", ColumnOptions::primary_generated())
            .column("Post", "title", ColumnOptions::of(ColumnType::Varchar).length(120))
            .column("Post", "createdAt", ColumnOptions::mode(ColumnMode::CreateDate))
            .column("Post", "deletedAt", ColumnOptions::mode(ColumnMode::DeleteDate));
        registry
    }

    #[test]
    fn resolves_plain_entity() {
        let graph = resolve(&post_registry()).unwrap();
        let post = graph.find("Post").unwrap();
        assert_eq!(post.table_name, "post");
        assert_eq!(post.columns.len(), 4);
        assert_eq!(post.primary_column_names(), vec!["id"]);
        assert!(!post.columns[0].nullable);
        assert!(post.primary_key_name.as_deref().unwrap().starts_with("PK_"));
    }

    #[test]
    fn date_columns_get_defaults_and_nullability() {
        let graph = resolve(&post_registry()).unwrap();
        let post = graph.find("Post").unwrap();
        let created = post.create_date_column().unwrap();
        assert_eq!(created.column_type, ColumnType::Timestamp);
        assert_eq!(
            created.default,
            Some(DefaultValue::Raw("CURRENT_TIMESTAMP".into()))
        );
        assert!(post.delete_date_column().unwrap().nullable);
    }

    #[test]
    fn entity_prefix_applies_to_tables() {
        let registry = post_registry();
        let graph = MetadataBuilder::new(&registry, &DefaultNamingStrategy)
            .with_entity_prefix("app_")
            .build()
            .unwrap();
        let post = graph.find("Post").unwrap();
        assert_eq!(post.table_name, "app_post");
        assert_eq!(post.table_name_without_prefix, "post");
    }

    #[test]
    fn abstract_bases_contribute_columns_only() {
        let mut registry = Registry::new();
        registry
            .table(
                "Base",
                TableOptions {
                    table_type: TableType::Abstract,
                    ..TableOptions::default()
                },
            )
            .column("Base", "id", ColumnOptions::primary_generated())
            .column("Base", "version", ColumnOptions::mode(ColumnMode::Version))
            .table("Post", TableOptions::default())
            .extends("Post", "Base")
            .column("Post", "title", ColumnOptions::default());

        let graph = resolve(&registry).unwrap();
        assert_eq!(graph.len(), 1);
        let post = graph.find("Post").unwrap();
        let names: Vec<_> = post.columns.iter().map(|c| c.database_name.as_str()).collect();
        assert_eq!(names, vec!["id", "version", "title"]);
        assert_eq!(post.inheritance_tree, vec!["Base", "Post"]);
        assert!(post.version_column().is_some());
    }

    #[test]
    fn embedded_columns_are_flattened_with_prefix() {
        let mut registry = post_registry();
        registry
            .embedded("Post", "counters", EmbeddedOptions::of("Counters"))
            .column("Counters", "likes", ColumnOptions::of(ColumnType::Int))
            .embedded("Post", "meta", EmbeddedOptions::of("Meta").without_prefix())
            .column("Meta", "views", ColumnOptions::of(ColumnType::Int));

        let graph = resolve(&registry).unwrap();
        let post = graph.find("Post").unwrap();
        let likes = post.find_column_with_property_path("counters.likes").unwrap();
        assert_eq!(likes.database_name, "countersLikes");
        assert_eq!(likes.embedded, Some(0));
        assert_eq!(post.embeddeds[0].columns.len(), 1);
        assert_eq!(
            post.find_column_with_property_path("meta.views").unwrap().database_name,
            "views"
        );
    }

    #[test]
    fn nested_set_and_materialized_path_columns_are_added() {
        let mut registry = Registry::new();
        registry
            .table("Node", TableOptions::default())
            .tree("Node", crate::registry::TreeOptions::new(TreeStrategy::NestedSet))
            .column("Node", "id", ColumnOptions::primary_generated())
            .table("Path", TableOptions::default())
            .tree("Path", crate::registry::TreeOptions::new(TreeStrategy::MaterializedPath))
            .column("Path", "id", ColumnOptions::primary_generated());

        let graph = resolve(&registry).unwrap();
        let node = graph.find("Node").unwrap();
        assert!(node.find_column_with_database_name("nsleft").is_some());
        assert!(node.find_column_with_database_name("nsright").is_some());
        let path = graph.find("Path").unwrap();
        let mpath = path.find_column_with_database_name("mpath").unwrap();
        assert_eq!(mpath.default, Some(DefaultValue::String(String::new())));
    }

    #[test]
    fn view_requires_expression() {
        let mut registry = Registry::new();
        registry.table(
            "Stats",
            TableOptions {
                table_type: TableType::View,
                ..TableOptions::default()
            },
        );
        assert!(matches!(
            resolve(&registry),
            Err(ResolutionError::InvalidDeclaration { .. })
        ));
    }
}
