use super::relations::resolve_referenced_columns;
use super::{BuildState, MetadataBuilder};
use crate::metadata::{
    ColumnMetadata, ColumnRef, EntityId, EntityKind, EntityMetadata, ForeignKeyMetadata,
    IndexMetadata, RelationMetadata,
};
use crate::registry::{ColumnMode, ColumnType, JoinColumnOptions, ReferentialAction};
use crate::util::ResolutionError;
use tracing::debug;

struct JunctionSide {
    names: Vec<String>,
    referenced: Vec<(ColumnRef, ColumnMetadata)>,
}

fn junction_column(
    entity: EntityId,
    name: &str,
    referenced: Option<(ColumnRef, &ColumnMetadata)>,
    column_type: ColumnType,
) -> ColumnMetadata {
    ColumnMetadata {
        entity,
        embedded: None,
        property_name: name.to_string(),
        property_path: name.to_string(),
        database_name: name.to_string(),
        column_type,
        length: referenced.and_then(|(_, c)| c.length),
        precision: referenced.and_then(|(_, c)| c.precision),
        scale: referenced.and_then(|(_, c)| c.scale),
        nullable: false,
        unique: false,
        primary: true,
        generation: None,
        default: None,
        mode: ColumnMode::Virtual,
        comment: None,
        relation: None,
        referenced_column: referenced.map(|(r, _)| r),
    }
}

fn index_over(
    builder: &MetadataBuilder<'_>,
    table: &str,
    columns: Vec<usize>,
    names: Vec<String>,
) -> IndexMetadata {
    IndexMetadata {
        name: builder.naming.index_name(table, &names, None),
        columns,
        column_names: names,
        unique: false,
        where_clause: None,
        synchronize: true,
    }
}

#[allow(clippy::too_many_arguments)]
fn foreign_key_to(
    builder: &MetadataBuilder<'_>,
    junction: &EntityMetadata,
    columns: Vec<usize>,
    referenced_entity: &EntityMetadata,
    referenced: &[(ColumnRef, ColumnMetadata)],
    on_delete: ReferentialAction,
    on_update: ReferentialAction,
) -> ForeignKeyMetadata {
    let column_names: Vec<String> = columns
        .iter()
        .map(|c| junction.columns[*c].database_name.clone())
        .collect();
    let referenced_column_names: Vec<String> = referenced
        .iter()
        .map(|(_, c)| c.database_name.clone())
        .collect();
    ForeignKeyMetadata {
        name: builder.naming.foreign_key_name(
            &junction.table_name,
            &column_names,
            &referenced_entity.table_name,
            &referenced_column_names,
        ),
        entity: junction.id,
        referenced_entity: referenced_entity.id,
        columns,
        referenced_columns: referenced.iter().map(|(r, _)| *r).collect(),
        column_names,
        referenced_table_name: referenced_entity.table_name.clone(),
        referenced_column_names,
        on_delete,
        on_update,
    }
}

/// Creates one junction entity per owning many-to-many relation and links
/// both sides of the relation to it.
pub(super) fn build_junctions(
    builder: &MetadataBuilder<'_>,
    state: &mut BuildState,
) -> Result<(), ResolutionError> {
    let mut owners = Vec::new();
    for (index, entity) in state.entities.iter().enumerate() {
        for (position, relation) in entity.relations.iter().enumerate() {
            if relation.is_many_to_many_owner() {
                owners.push((index, position));
            }
        }
    }

    for (index, position) in owners {
        let owner = &state.entities[index];
        let relation = owner.relations[position].clone();
        let target = &state.entities[relation.inverse_entity.0];
        let join_table = state.collected[index]
            .join_tables
            .get(&relation.property_path)
            .cloned()
            .unwrap_or_default();
        let inverse = relation
            .inverse_relation
            .map(|r| state.entities[r.entity.0].relations[r.relation].clone());

        let owner_side = junction_side(
            builder,
            owner,
            owner,
            &join_table.join_columns,
            &relation,
        )?;
        let inverse_side = junction_side(
            builder,
            owner,
            target,
            &join_table.inverse_join_columns,
            &relation,
        )?;

        let base_name = join_table.name.clone().unwrap_or_else(|| {
            builder.naming.join_table_name(
                &owner.table_name_without_prefix,
                &target.table_name_without_prefix,
                &relation.property_path,
                inverse.as_ref().map(|r| r.property_path.as_str()).unwrap_or(""),
            )
        });
        let table_name = builder.prefixed(&base_name);

        let mut owner_names = owner_side.names;
        let mut inverse_names = inverse_side.names;
        if owner_names.iter().any(|n| inverse_names.contains(n)) {
            owner_names = owner_names
                .iter()
                .map(|n| builder.naming.join_table_column_duplication_prefix(n, 1))
                .collect();
            inverse_names = inverse_names
                .iter()
                .map(|n| builder.naming.join_table_column_duplication_prefix(n, 2))
                .collect();
        }

        let junction_id = EntityId(state.entities.len());
        let mut junction = EntityMetadata::new(junction_id, table_name.clone(), EntityKind::Junction);
        junction.table_name = table_name.clone();
        junction.table_name_without_prefix = base_name;
        junction.schema = owner.schema.clone();
        junction.parent_entity = Some(owner.id);
        junction.synchronize = owner.synchronize;

        for (name, (reference, column)) in owner_names.iter().zip(&owner_side.referenced) {
            junction.columns.push(junction_column(
                junction_id,
                name,
                Some((*reference, column)),
                column.column_type.clone(),
            ));
        }
        let owner_columns: Vec<usize> = (0..owner_names.len()).collect();
        for (name, (reference, column)) in inverse_names.iter().zip(&inverse_side.referenced) {
            junction.columns.push(junction_column(
                junction_id,
                name,
                Some((*reference, column)),
                column.column_type.clone(),
            ));
        }
        let inverse_columns: Vec<usize> =
            (owner_names.len()..owner_names.len() + inverse_names.len()).collect();

        if relation.create_foreign_key_constraints {
            let owner_fk = foreign_key_to(
                builder,
                &junction,
                owner_columns.clone(),
                owner,
                &owner_side.referenced,
                relation.on_delete.unwrap_or(ReferentialAction::Cascade),
                relation.on_update.unwrap_or(ReferentialAction::NoAction),
            );
            let inverse_fk = foreign_key_to(
                builder,
                &junction,
                inverse_columns.clone(),
                target,
                &inverse_side.referenced,
                inverse
                    .as_ref()
                    .and_then(|r| r.on_delete)
                    .unwrap_or(ReferentialAction::Cascade),
                inverse
                    .as_ref()
                    .and_then(|r| r.on_update)
                    .unwrap_or(ReferentialAction::NoAction),
            );
            junction.foreign_keys = vec![owner_fk, inverse_fk];
        }
        junction.indices = vec![
            index_over(builder, &table_name, owner_columns.clone(), owner_names.clone()),
            index_over(builder, &table_name, inverse_columns.clone(), inverse_names.clone()),
        ];

        debug!(
            owner = %owner.target,
            property = %relation.property_path,
            junction = %table_name,
            "built junction entity"
        );

        let owner_refs: Vec<ColumnRef> = owner_columns
            .iter()
            .map(|c| ColumnRef { entity: junction_id, column: *c })
            .collect();
        let inverse_refs: Vec<ColumnRef> = inverse_columns
            .iter()
            .map(|c| ColumnRef { entity: junction_id, column: *c })
            .collect();

        state.by_target.insert(table_name, junction_id);
        state.entities.push(junction);

        let owner_relation = &mut state.entities[index].relations[position];
        owner_relation.junction_entity = Some(junction_id);
        owner_relation.junction_columns = owner_refs.clone();
        owner_relation.inverse_junction_columns = inverse_refs.clone();
        if let Some(inverse) = relation.inverse_relation {
            let inverse_relation = &mut state.entities[inverse.entity.0].relations[inverse.relation];
            inverse_relation.junction_entity = Some(junction_id);
            inverse_relation.junction_columns = inverse_refs;
            inverse_relation.inverse_junction_columns = owner_refs;
        }
    }
    Ok(())
}

fn junction_side(
    builder: &MetadataBuilder<'_>,
    owner: &EntityMetadata,
    side: &EntityMetadata,
    options: &[JoinColumnOptions],
    relation: &RelationMetadata,
) -> Result<JunctionSide, ResolutionError> {
    let resolved = resolve_referenced_columns(&owner.target, relation, side, options)?;
    let mut names = Vec::with_capacity(resolved.len());
    let mut referenced = Vec::with_capacity(resolved.len());
    for (reference, option) in resolved {
        let column = side.columns[reference.column].clone();
        let name = option.and_then(|o| o.name).unwrap_or_else(|| {
            builder.naming.join_table_column_name(
                &side.table_name_without_prefix,
                &column.property_name,
                Some(&column.database_name),
            )
        });
        names.push(name);
        referenced.push((reference, column));
    }
    Ok(JunctionSide { names, referenced })
}

/// Closure-table trees get a companion table holding every
/// (ancestor, descendant) pair.
pub(super) fn build_closure_junctions(
    builder: &MetadataBuilder<'_>,
    state: &mut BuildState,
) -> Result<(), ResolutionError> {
    let closures: Vec<usize> = state
        .entities
        .iter()
        .enumerate()
        .filter(|(_, e)| e.kind == EntityKind::Closure)
        .map(|(i, _)| i)
        .collect();

    for index in closures {
        let owner = &state.entities[index];
        let primaries: Vec<usize> = owner
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary)
            .map(|(i, _)| i)
            .collect();
        if primaries.len() != 1 {
            return Err(ResolutionError::UnsupportedClosurePrimaryKey {
                entity: owner.target.clone(),
                count: primaries.len(),
            });
        }
        let primary = owner.columns[primaries[0]].clone();
        let reference = ColumnRef {
            entity: owner.id,
            column: primaries[0],
        };

        let closure_name = owner
            .inheritance_tree
            .iter()
            .rev()
            .find_map(|class| builder.registry.tree_options(class))
            .and_then(|t| t.closure_table_name.clone());
        let base_name = closure_name.unwrap_or_else(|| {
            builder
                .naming
                .closure_junction_table_name(&owner.table_name_without_prefix)
        });
        let table_name = builder.prefixed(&base_name);

        let junction_id = EntityId(state.entities.len());
        let mut junction =
            EntityMetadata::new(junction_id, table_name.clone(), EntityKind::ClosureJunction);
        junction.table_name = table_name.clone();
        junction.table_name_without_prefix = base_name;
        junction.schema = owner.schema.clone();
        junction.parent_entity = Some(owner.id);
        junction.synchronize = owner.synchronize;

        let ancestor = format!("ancestor_{}", primary.database_name);
        let descendant = format!("descendant_{}", primary.database_name);
        for name in [&ancestor, &descendant] {
            junction.columns.push(junction_column(
                junction_id,
                name,
                Some((reference, &primary)),
                primary.column_type.clone(),
            ));
        }
        if owner.tree_level_column().is_some() {
            let mut level = junction_column(junction_id, "level", None, ColumnType::Int);
            level.primary = false;
            junction.columns.push(level);
        }

        let referenced = [(reference, primary.clone())];
        junction.foreign_keys = vec![
            foreign_key_to(
                builder,
                &junction,
                vec![0],
                owner,
                &referenced,
                ReferentialAction::Cascade,
                ReferentialAction::NoAction,
            ),
            foreign_key_to(
                builder,
                &junction,
                vec![1],
                owner,
                &referenced,
                ReferentialAction::Cascade,
                ReferentialAction::NoAction,
            ),
        ];
        junction.indices = vec![
            index_over(builder, &table_name, vec![0], vec![ancestor]),
            index_over(builder, &table_name, vec![1], vec![descendant]),
        ];

        debug!(owner = %owner.target, closure = %table_name, "built closure junction");
        state.by_target.insert(table_name, junction_id);
        state.entities.push(junction);
        state.entities[index].closure_junction = Some(junction_id);
    }
    Ok(())
}
