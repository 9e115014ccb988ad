//! Projection of the metadata graph into the snapshot shape the introspectors
//! produce, so both sides of a diff speak the same dialect-normalised terms.

use crate::dialect::Dialect;
use crate::metadata::{ColumnMetadata, EntityMetadata, MetadataGraph};
use crate::model::{
    Check, Column, Exclusion, ForeignKey, Index, PrimaryKey, Schema, Table, Unique, View,
};

pub fn desired_schema(graph: &MetadataGraph, dialect: &dyn Dialect) -> Schema {
    let mut schema = Schema::new();
    for entity in graph.synchronized_tables() {
        schema.add_table(entity_table(entity, dialect));
    }
    for entity in graph.views() {
        if let Some(expression) = &entity.expression {
            schema.views.insert(
                entity.table_name.clone(),
                View {
                    name: entity.table_name.clone(),
                    expression: expression.clone(),
                },
            );
        }
    }
    dialect.normalize_schema(schema)
}

pub fn desired_column(column: &ColumnMetadata, dialect: &dyn Dialect) -> Column {
    let (precision, scale) = dialect.normalize_precision(column);
    Column {
        name: column.database_name.clone(),
        data_type: dialect.normalize_type(column),
        length: dialect.normalize_length(column),
        precision,
        scale,
        nullable: column.nullable && !column.primary,
        default: dialect.normalize_default(column),
        generated: dialect.normalize_generation(column),
    }
}

fn entity_table(entity: &EntityMetadata, dialect: &dyn Dialect) -> Table {
    let mut table = Table::new(entity.table_name.clone());
    table.columns = entity
        .columns
        .iter()
        .map(|c| desired_column(c, dialect))
        .collect();

    let primary = entity.primary_column_names();
    if !primary.is_empty() {
        table.primary_key = Some(PrimaryKey {
            name: entity.primary_key_name.clone(),
            columns: primary,
        });
    }

    table.indexes = entity
        .indices
        .iter()
        .filter(|i| i.synchronize)
        .map(|i| Index {
            name: i.name.clone(),
            columns: i.column_names.clone(),
            unique: i.unique,
            where_clause: i.where_clause.clone(),
        })
        .collect();
    table.uniques = entity
        .uniques
        .iter()
        .map(|u| Unique {
            name: u.name.clone(),
            columns: u.column_names.clone(),
        })
        .collect();
    table.checks = entity
        .checks
        .iter()
        .map(|c| Check {
            name: c.name.clone(),
            expression: c.expression.clone(),
        })
        .collect();
    table.exclusions = entity
        .exclusions
        .iter()
        .map(|e| Exclusion {
            name: e.name.clone(),
            expression: e.expression.clone(),
        })
        .collect();
    table.foreign_keys = entity
        .foreign_keys
        .iter()
        .map(|fk| ForeignKey {
            name: fk.name.clone(),
            columns: fk.column_names.clone(),
            referenced_table: fk.referenced_table_name.clone(),
            referenced_columns: fk.referenced_column_names.clone(),
            on_delete: fk.on_delete,
            on_update: fk.on_update,
        })
        .collect();
    table
}
