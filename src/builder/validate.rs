use super::BuildState;
use crate::metadata::EntityKind;
use crate::util::ResolutionError;
use std::collections::HashSet;

/// Every entity with its own rows needs a primary column. Views are exempt
/// and junctions are keyed by construction.
pub(super) fn validate_primary_columns(state: &BuildState) -> Result<(), ResolutionError> {
    for entity in &state.entities {
        if matches!(entity.kind, EntityKind::View) || entity.is_junction() {
            continue;
        }
        if entity.primary_columns().next().is_none() {
            return Err(ResolutionError::MissingPrimaryColumn {
                entity: entity.target.clone(),
            });
        }
    }
    Ok(())
}

pub(super) fn validate_columns(state: &BuildState) -> Result<(), ResolutionError> {
    for entity in &state.entities {
        let mut seen = HashSet::new();
        for column in &entity.columns {
            if !seen.insert(column.database_name.as_str()) {
                return Err(ResolutionError::DuplicateColumn {
                    entity: entity.target.clone(),
                    column: column.database_name.clone(),
                });
            }
        }
    }
    Ok(())
}
