use super::{BuildState, MetadataBuilder};
use crate::metadata::{
    CheckMetadata, EntityKind, EntityMetadata, ExclusionMetadata, IndexMetadata,
    RelationIdMetadata, UniqueMetadata,
};
use crate::util::ResolutionError;

fn resolve_columns(
    entity: &EntityMetadata,
    name: &str,
    paths: &[String],
) -> Result<(Vec<usize>, Vec<String>), ResolutionError> {
    let mut columns = Vec::new();
    for path in paths {
        if let Some(position) = entity.columns.iter().position(|c| c.property_path == *path) {
            columns.push(position);
        } else if let Some(relation) = entity.find_relation_with_property_path(path) {
            columns.extend(relation.join_columns.iter().copied());
        } else if let Some(position) = entity.column_index(path) {
            columns.push(position);
        } else {
            return Err(ResolutionError::MissingIndexColumn {
                entity: entity.target.clone(),
                name: name.to_string(),
                property: path.clone(),
            });
        }
    }
    let names = columns
        .iter()
        .map(|c| entity.columns[*c].database_name.clone())
        .collect();
    Ok((columns, names))
}

/// Builds indices, unique/check/exclusion constraints and the keys
/// single-table inheritance needs on the shared table.
pub(super) fn build_constraints(
    builder: &MetadataBuilder<'_>,
    state: &mut BuildState,
) -> Result<(), ResolutionError> {
    for index in 0..state.collected.len() {
        let collected = &state.collected[index];
        let entity = &state.entities[index];
        let table = entity.table_name.clone();

        let mut indices = Vec::new();
        for options in &collected.indices {
            let label = options.name.clone().unwrap_or_else(|| options.columns.join(","));
            let (columns, column_names) = resolve_columns(entity, &label, &options.columns)?;
            indices.push(IndexMetadata {
                name: options.name.clone().unwrap_or_else(|| {
                    builder.naming.index_name(
                        &table,
                        &column_names,
                        options.where_clause.as_deref(),
                    )
                }),
                columns,
                column_names,
                unique: options.unique,
                where_clause: options.where_clause.clone(),
                synchronize: options.synchronize,
            });
        }

        let mut uniques = Vec::new();
        for options in &collected.uniques {
            let label = options.name.clone().unwrap_or_else(|| options.columns.join(","));
            let (columns, column_names) = resolve_columns(entity, &label, &options.columns)?;
            uniques.push(UniqueMetadata {
                name: options
                    .name
                    .clone()
                    .unwrap_or_else(|| builder.naming.unique_constraint_name(&table, &column_names)),
                columns,
                column_names,
            });
        }
        for (position, column) in entity.columns.iter().enumerate() {
            if column.unique && !column.primary {
                let names = vec![column.database_name.clone()];
                uniques.push(UniqueMetadata {
                    name: builder.naming.unique_constraint_name(&table, &names),
                    columns: vec![position],
                    column_names: names,
                });
            }
        }

        let checks: Vec<CheckMetadata> = collected
            .checks
            .iter()
            .map(|c| CheckMetadata {
                name: c
                    .name
                    .clone()
                    .unwrap_or_else(|| builder.naming.check_constraint_name(&table, &c.expression)),
                expression: c.expression.clone(),
            })
            .collect();
        let exclusions: Vec<ExclusionMetadata> = collected
            .exclusions
            .iter()
            .map(|x| ExclusionMetadata {
                name: x.name.clone().unwrap_or_else(|| {
                    builder.naming.exclusion_constraint_name(&table, &x.expression)
                }),
                expression: x.expression.clone(),
            })
            .collect();

        if entity.kind != EntityKind::EntityChild {
            if let Some(discriminator) = entity
                .columns
                .iter()
                .position(|c| c.mode == crate::registry::ColumnMode::Discriminator)
            {
                add_inheritance_keys(builder, entity, discriminator, &mut indices);
            }
        }

        let entity = &mut state.entities[index];
        entity.indices.extend(indices);
        entity.uniques.extend(uniques);
        entity.checks = checks;
        entity.exclusions = exclusions;
    }
    Ok(())
}

fn add_inheritance_keys(
    builder: &MetadataBuilder<'_>,
    entity: &EntityMetadata,
    discriminator: usize,
    indices: &mut Vec<IndexMetadata>,
) {
    let mut composite: Vec<usize> = entity
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.primary)
        .map(|(i, _)| i)
        .collect();
    composite.push(discriminator);

    // Each key is added unless a declared index already covers exactly its columns.
    for columns in [vec![discriminator], composite] {
        if indices.iter().any(|i| i.columns == columns) {
            continue;
        }
        let names: Vec<String> = columns
            .iter()
            .map(|c| entity.columns[*c].database_name.clone())
            .collect();
        indices.push(IndexMetadata {
            name: builder.naming.index_name(&entity.table_name, &names, None),
            columns,
            column_names: names,
            unique: false,
            where_clause: None,
            synchronize: true,
        });
    }
}

pub(super) fn build_relation_ids(state: &mut BuildState) -> Result<(), ResolutionError> {
    for index in 0..state.collected.len() {
        let mut relation_ids = Vec::new();
        let entity = &state.entities[index];
        for (property, relation_path) in &state.collected[index].relation_ids {
            let relation = entity
                .relations
                .iter()
                .position(|r| r.property_path == *relation_path)
                .ok_or_else(|| ResolutionError::MissingRelationIdRelation {
                    entity: entity.target.clone(),
                    property: property.clone(),
                    relation: relation_path.clone(),
                })?;
            relation_ids.push(RelationIdMetadata {
                property_name: property.clone(),
                relation,
            });
        }
        state.entities[index].relation_ids = relation_ids;
    }
    Ok(())
}

pub(super) fn build_primary_key_names(builder: &MetadataBuilder<'_>, state: &mut BuildState) {
    for entity in &mut state.entities {
        let columns = entity.primary_column_names();
        if columns.is_empty() || entity.kind == EntityKind::View {
            continue;
        }
        entity.primary_key_name = Some(builder.naming.primary_key_name(&entity.table_name, &columns));
    }
}
