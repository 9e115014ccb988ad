use super::{ColumnRef, EntityId};
use crate::registry::ReferentialAction;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForeignKeyMetadata {
    pub name: String,
    pub entity: EntityId,
    pub referenced_entity: EntityId,
    pub columns: Vec<usize>,
    pub referenced_columns: Vec<ColumnRef>,
    pub column_names: Vec<String>,
    pub referenced_table_name: String,
    pub referenced_column_names: Vec<String>,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexMetadata {
    pub name: String,
    pub columns: Vec<usize>,
    pub column_names: Vec<String>,
    pub unique: bool,
    pub where_clause: Option<String>,
    pub synchronize: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniqueMetadata {
    pub name: String,
    pub columns: Vec<usize>,
    pub column_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckMetadata {
    pub name: String,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExclusionMetadata {
    pub name: String,
    pub expression: String,
}
