use super::EntityId;
use crate::registry::{ColumnMode, ColumnType, DefaultValue, GenerationStrategy};
use serde::Serialize;

/// Location of a column inside the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ColumnRef {
    pub entity: EntityId,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMetadata {
    pub entity: EntityId,
    /// Index into the owning entity's embeddeds when declared inside one.
    pub embedded: Option<usize>,
    pub property_name: String,
    pub property_path: String,
    pub database_name: String,
    pub column_type: ColumnType,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub nullable: bool,
    pub unique: bool,
    pub primary: bool,
    pub generation: Option<GenerationStrategy>,
    pub default: Option<DefaultValue>,
    pub mode: ColumnMode,
    pub comment: Option<String>,
    /// Index into the owning entity's relations when this is a join column.
    pub relation: Option<usize>,
    pub referenced_column: Option<ColumnRef>,
}

impl ColumnMetadata {
    pub fn is_generated(&self) -> bool {
        self.generation.is_some()
    }

    pub fn is_virtual(&self) -> bool {
        self.mode == ColumnMode::Virtual
    }

    pub fn is_join_column(&self) -> bool {
        self.relation.is_some()
    }
}
