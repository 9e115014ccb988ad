use super::EntityId;
use serde::Serialize;

/// A value-object group of columns flattened into its owning table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddedMetadata {
    pub entity: EntityId,
    pub parent: Option<usize>,
    pub property_name: String,
    pub property_path: String,
    pub target: String,
    /// Prefix segment this embedded contributes to column names (may be empty).
    pub prefix: String,
    pub columns: Vec<usize>,
    pub relations: Vec<usize>,
    pub children: Vec<usize>,
}
