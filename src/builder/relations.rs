use super::{BuildState, MetadataBuilder};
use crate::metadata::{
    ColumnMetadata, ColumnRef, EntityKind, EntityMetadata, ForeignKeyMetadata, RelationMetadata,
    RelationRef, UniqueMetadata,
};
use crate::registry::{ColumnMode, JoinColumnOptions, ReferentialAction, RelationType};
use crate::util::ResolutionError;
use tracing::warn;

pub(super) fn build_relations(state: &mut BuildState) -> Result<(), ResolutionError> {
    for index in 0..state.collected.len() {
        let entity_id = state.entities[index].id;
        let mut relations = Vec::new();
        for collected in &state.collected[index].relations {
            let target = state
                .by_target
                .get(&collected.options.target)
                .copied()
                .ok_or_else(|| ResolutionError::MissingRelationTarget {
                    entity: state.entities[index].target.clone(),
                    property: collected.property_path.clone(),
                    target: collected.options.target.clone(),
                })?;
            let options = &collected.options;
            relations.push(RelationMetadata {
                entity: entity_id,
                embedded: collected.embedded,
                property_name: collected.property_name.clone(),
                property_path: collected.property_path.clone(),
                relation_type: options.relation_type,
                target: options.target.clone(),
                inverse_entity: target,
                inverse_side_property_path: options.inverse_side.clone(),
                inverse_relation: None,
                is_owning: false,
                cascade: options.cascade,
                nullable: options.nullable && !options.primary,
                primary: options.primary,
                lazy: options.lazy,
                eager: options.eager,
                on_delete: options.on_delete,
                on_update: options.on_update,
                create_foreign_key_constraints: options.create_foreign_key_constraints,
                tree_role: options.tree_role,
                join_columns: Vec::new(),
                junction_columns: Vec::new(),
                inverse_junction_columns: Vec::new(),
                junction_entity: None,
                foreign_key: None,
            });
        }

        let entity = &mut state.entities[index];
        for (position, relation) in relations.iter().enumerate() {
            if let Some(embedded) = relation.embedded {
                entity.embeddeds[embedded].relations.push(position);
            }
        }
        entity.relations = relations;
    }
    Ok(())
}

/// Two relations are inverses only when each one's declared inverse path
/// resolves back to the other.
pub(super) fn link_inverses(state: &mut BuildState) -> Result<(), ResolutionError> {
    let mut links = Vec::new();
    for entity in &state.entities {
        for (index, relation) in entity.relations.iter().enumerate() {
            let Some(inverse_path) = &relation.inverse_side_property_path else {
                continue;
            };
            let target = &state.entities[relation.inverse_entity.0];
            let position = target
                .relations
                .iter()
                .position(|r| &r.property_path == inverse_path)
                .ok_or_else(|| ResolutionError::MissingInverseSide {
                    entity: entity.target.clone(),
                    property: relation.property_path.clone(),
                    target: target.target.clone(),
                    inverse: inverse_path.clone(),
                })?;
            let candidate = &target.relations[position];
            if candidate.inverse_side_property_path.as_deref() == Some(relation.property_path.as_str())
            {
                links.push((
                    entity.id,
                    index,
                    RelationRef {
                        entity: target.id,
                        relation: position,
                    },
                ));
            } else {
                warn!(
                    entity = %entity.target,
                    property = %relation.property_path,
                    inverse = %inverse_path,
                    "inverse side does not point back, relation left unidirectional"
                );
            }
        }
    }
    for (entity, relation, inverse) in links {
        state.entities[entity.0].relations[relation].inverse_relation = Some(inverse);
    }
    Ok(())
}

pub(super) fn assign_ownership(state: &mut BuildState) -> Result<(), ResolutionError> {
    let mut owning = Vec::new();
    for index in 0..state.collected.len() {
        let entity = &state.entities[index];
        let collected = &state.collected[index];
        for (position, relation) in entity.relations.iter().enumerate() {
            let path = &relation.property_path;
            let has_join_column = collected.join_columns.contains_key(path);
            let has_join_table = collected.join_tables.contains_key(path);
            let inverse = relation.inverse_relation.map(|r| {
                let inverse = &state.entities[r.entity.0].relations[r.relation];
                let inverse_collected = &state.collected[r.entity.0];
                (
                    inverse,
                    inverse_collected
                        .join_columns
                        .contains_key(&inverse.property_path),
                    inverse_collected
                        .join_tables
                        .contains_key(&inverse.property_path),
                )
            });
            let error_context = || (entity.target.clone(), path.clone());

            let is_owning = match relation.relation_type {
                RelationType::ManyToOne => true,
                RelationType::OneToMany => {
                    if has_join_column {
                        let (entity, property) = error_context();
                        return Err(ResolutionError::UnexpectedJoinColumn {
                            entity,
                            property,
                            relation_type: relation.relation_type.to_string(),
                        });
                    }
                    match inverse {
                        Some((inverse, _, _)) if inverse.is_many_to_one() => false,
                        _ => {
                            let (entity, property) = error_context();
                            return Err(ResolutionError::MissingManyToOneInverse {
                                entity,
                                property,
                                target: relation.target.clone(),
                            });
                        }
                    }
                }
                RelationType::OneToOne => match (has_join_column, inverse) {
                    (true, Some((_, true, _))) => {
                        let (entity, property) = error_context();
                        return Err(ResolutionError::AmbiguousJoinColumn { entity, property });
                    }
                    (false, Some((_, false, _))) | (false, None) => {
                        let (entity, property) = error_context();
                        return Err(ResolutionError::MissingJoinColumn { entity, property });
                    }
                    (owns, _) => owns,
                },
                RelationType::ManyToMany => {
                    if has_join_column {
                        let (entity, property) = error_context();
                        return Err(ResolutionError::UnexpectedJoinColumn {
                            entity,
                            property,
                            relation_type: relation.relation_type.to_string(),
                        });
                    }
                    match (has_join_table, inverse) {
                        (true, Some((_, _, true))) => {
                            let (entity, property) = error_context();
                            return Err(ResolutionError::DuplicateJoinTable { entity, property });
                        }
                        (false, Some((_, _, false))) => {
                            let (entity, property) = error_context();
                            return Err(ResolutionError::MissingJoinTable { entity, property });
                        }
                        (false, None) => {
                            warn!(
                                entity = %entity.target,
                                property = %path,
                                "many-to-many relation without join table or inverse is unmapped"
                            );
                            false
                        }
                        (owns, _) => owns,
                    }
                }
            };
            if is_owning {
                owning.push((index, position));
            }
        }
    }
    for (entity, relation) in owning {
        state.entities[entity].relations[relation].is_owning = true;
    }
    Ok(())
}

/// Synthesizes join columns and foreign keys for every owning many-to-one and
/// one-to-one relation. Primary relations go first so that entities keyed by
/// a relation can themselves be referenced.
pub(super) fn build_join_columns(
    builder: &MetadataBuilder<'_>,
    state: &mut BuildState,
) -> Result<(), ResolutionError> {
    let mut pending: Vec<(usize, usize, bool)> = Vec::new();
    for (index, entity) in state.entities.iter().enumerate() {
        for (position, relation) in entity.relations.iter().enumerate() {
            if relation.is_owning && (relation.is_many_to_one() || relation.is_one_to_one()) {
                pending.push((index, position, relation.primary));
            }
        }
    }
    pending.sort_by_key(|(_, _, primary)| !primary);

    for (index, position, _) in pending {
        build_relation_join_columns(builder, state, index, position)?;
    }
    Ok(())
}

fn build_relation_join_columns(
    builder: &MetadataBuilder<'_>,
    state: &mut BuildState,
    index: usize,
    position: usize,
) -> Result<(), ResolutionError> {
    let relation = state.entities[index].relations[position].clone();
    let owner_target = state.entities[index].target.clone();
    let options = state.collected[index]
        .join_columns
        .get(&relation.property_path)
        .cloned()
        .unwrap_or_default();
    let target = &state.entities[relation.inverse_entity.0];
    let referenced = resolve_referenced_columns(&owner_target, &relation, target, &options)?;
    let referenced: Vec<(ColumnRef, ColumnMetadata, Option<JoinColumnOptions>)> = referenced
        .into_iter()
        .map(|(r, o)| (r, target.columns[r.column].clone(), o))
        .collect();
    let target_table = target.table_name.clone();
    let target_is_view = target.kind == EntityKind::View;

    let entity = &mut state.entities[index];
    let mut join_columns = Vec::new();
    let mut column_names = Vec::new();
    let mut referenced_names = Vec::new();
    for (reference, referenced_column, option) in &referenced {
        let name = option
            .as_ref()
            .and_then(|o| o.name.clone())
            .unwrap_or_else(|| {
                builder
                    .naming
                    .join_column_name(&relation.property_name, &referenced_column.property_name)
            });

        let column_index = match entity.column_index(&name) {
            Some(existing) => {
                let column = &mut entity.columns[existing];
                column.relation = Some(position);
                column.referenced_column = Some(*reference);
                if relation.primary {
                    column.primary = true;
                    column.nullable = false;
                }
                existing
            }
            None => {
                let property_path = match relation.property_path.rsplit_once('.') {
                    Some((prefix, _)) => format!("{prefix}.{name}"),
                    None => name.clone(),
                };
                entity.columns.push(ColumnMetadata {
                    entity: entity.id,
                    embedded: relation.embedded,
                    property_name: name.clone(),
                    property_path,
                    database_name: name.clone(),
                    column_type: referenced_column.column_type.clone(),
                    length: referenced_column.length,
                    precision: referenced_column.precision,
                    scale: referenced_column.scale,
                    nullable: relation.nullable,
                    unique: false,
                    primary: relation.primary,
                    generation: None,
                    default: None,
                    mode: ColumnMode::Virtual,
                    comment: None,
                    relation: Some(position),
                    referenced_column: Some(*reference),
                });
                let added = entity.columns.len() - 1;
                if let Some(embedded) = relation.embedded {
                    entity.embeddeds[embedded].columns.push(added);
                }
                added
            }
        };
        join_columns.push(column_index);
        column_names.push(name);
        referenced_names.push(referenced_column.database_name.clone());
    }

    let mut foreign_key = None;
    if relation.create_foreign_key_constraints && !target_is_view {
        let name = options
            .iter()
            .find_map(|o| o.foreign_key_constraint_name.clone())
            .unwrap_or_else(|| {
                builder.naming.foreign_key_name(
                    &entity.table_name,
                    &column_names,
                    &target_table,
                    &referenced_names,
                )
            });
        entity.foreign_keys.push(ForeignKeyMetadata {
            name,
            entity: entity.id,
            referenced_entity: relation.inverse_entity,
            columns: join_columns.clone(),
            referenced_columns: referenced.iter().map(|(r, _, _)| *r).collect(),
            column_names: column_names.clone(),
            referenced_table_name: target_table,
            referenced_column_names: referenced_names,
            on_delete: relation.on_delete.unwrap_or(ReferentialAction::NoAction),
            on_update: relation.on_update.unwrap_or(ReferentialAction::NoAction),
        });
        foreign_key = Some(entity.foreign_keys.len() - 1);
    }

    if relation.is_one_to_one() && !relation.primary {
        entity.uniques.push(UniqueMetadata {
            name: builder
                .naming
                .relation_constraint_name(&entity.table_name, &column_names),
            columns: join_columns.clone(),
            column_names,
        });
    }

    let relation = &mut entity.relations[position];
    relation.join_columns = join_columns;
    relation.foreign_key = foreign_key;
    Ok(())
}

/// Columns on `target` a relation's join columns point at: the explicitly
/// referenced ones, or the target's primary columns.
pub(super) fn resolve_referenced_columns(
    owner: &str,
    relation: &RelationMetadata,
    target: &EntityMetadata,
    options: &[JoinColumnOptions],
) -> Result<Vec<(ColumnRef, Option<JoinColumnOptions>)>, ResolutionError> {
    let column_ref = |column: usize| ColumnRef {
        entity: target.id,
        column,
    };
    let first_primary = || {
        target
            .columns
            .iter()
            .position(|c| c.primary)
            .ok_or_else(|| ResolutionError::MissingPrimaryColumn {
                entity: target.target.clone(),
            })
    };

    if options.iter().any(|o| o.referenced_column_name.is_some()) {
        return options
            .iter()
            .map(|option| {
                let column = match &option.referenced_column_name {
                    Some(name) => target
                        .columns
                        .iter()
                        .position(|c| c.property_path == *name || c.database_name == *name)
                        .ok_or_else(|| ResolutionError::MissingReferencedColumn {
                            entity: owner.to_string(),
                            property: relation.property_path.clone(),
                            target: target.target.clone(),
                            column: name.clone(),
                        })?,
                    None => first_primary()?,
                };
                Ok((column_ref(column), Some(option.clone())))
            })
            .collect();
    }

    let primaries: Vec<usize> = target
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.primary)
        .map(|(i, _)| i)
        .collect();
    if primaries.is_empty() {
        return Err(ResolutionError::MissingPrimaryColumn {
            entity: target.target.clone(),
        });
    }
    Ok(primaries
        .into_iter()
        .enumerate()
        .map(|(i, column)| (column_ref(column), options.get(i).cloned()))
        .collect())
}
