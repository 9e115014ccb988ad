use crate::registry::{
    CheckOptions, ColumnOptions, DeclarationKind, EmbeddedOptions, ExclusionOptions, IndexOptions,
    JoinColumnOptions, JoinTableOptions, Registry, RelationOptions, UniqueOptions,
};
use crate::util::ResolutionError;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub(super) struct CollectedColumn {
    pub property_name: String,
    pub property_path: String,
    pub embedded: Option<usize>,
    pub prefixes: Vec<String>,
    pub options: ColumnOptions,
}

#[derive(Debug, Clone)]
pub(super) struct CollectedRelation {
    pub property_name: String,
    pub property_path: String,
    pub embedded: Option<usize>,
    pub options: RelationOptions,
}

#[derive(Debug, Clone)]
pub(super) struct CollectedEmbedded {
    pub parent: Option<usize>,
    pub property_name: String,
    pub property_path: String,
    pub target: String,
    pub prefix: String,
}

/// Every declaration that applies to one entity, with inherited and embedded
/// declarations flattened and property paths made absolute.
#[derive(Debug, Clone, Default)]
pub(super) struct Collected {
    pub columns: Vec<CollectedColumn>,
    pub relations: Vec<CollectedRelation>,
    pub embeddeds: Vec<CollectedEmbedded>,
    pub indices: Vec<IndexOptions>,
    pub uniques: Vec<UniqueOptions>,
    pub checks: Vec<CheckOptions>,
    pub exclusions: Vec<ExclusionOptions>,
    pub join_columns: HashMap<String, Vec<JoinColumnOptions>>,
    pub join_tables: HashMap<String, JoinTableOptions>,
    /// (property path, relation property path)
    pub relation_ids: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub(super) struct Scope {
    path: String,
    embedded: Option<usize>,
    prefixes: Vec<String>,
}

/// Base-first list of `target` and its ancestors.
pub(super) fn inheritance_chain(
    registry: &Registry,
    target: &str,
) -> Result<Vec<String>, ResolutionError> {
    let mut chain = vec![target.to_string()];
    let mut current = target.to_string();
    while let Some(parent) = registry.parent_of(&current) {
        if chain.iter().any(|c| c == parent) {
            return Err(ResolutionError::CyclicInheritance {
                entity: target.to_string(),
                parent: parent.to_string(),
            });
        }
        chain.push(parent.to_string());
        current = parent.to_string();
    }
    chain.reverse();
    Ok(chain)
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn require_property<'r>(
    entity: &str,
    property: Option<&'r str>,
    what: &str,
) -> Result<&'r str, ResolutionError> {
    property.ok_or_else(|| ResolutionError::InvalidDeclaration {
        entity: entity.to_string(),
        property: String::new(),
        message: format!("{what} declaration without a property"),
    })
}

impl Collected {
    /// Merges the declarations made directly on `class`. With `keep_existing`
    /// a property already collected is left alone instead of overridden.
    pub fn collect_class(
        &mut self,
        registry: &Registry,
        entity: &str,
        class: &str,
        scope: &Scope,
        stack: &mut Vec<String>,
        keep_existing: bool,
    ) -> Result<(), ResolutionError> {
        for record in registry.declared_on(class) {
            let property = record.property.as_deref();
            match &record.kind {
                DeclarationKind::Column(options) => {
                    let name = require_property(entity, property, "column")?;
                    self.add_column(
                        CollectedColumn {
                            property_name: name.to_string(),
                            property_path: join_path(&scope.path, name),
                            embedded: scope.embedded,
                            prefixes: scope.prefixes.clone(),
                            options: options.clone(),
                        },
                        keep_existing,
                    );
                }
                DeclarationKind::Relation(options) => {
                    let name = require_property(entity, property, "relation")?;
                    self.add_relation(
                        CollectedRelation {
                            property_name: name.to_string(),
                            property_path: join_path(&scope.path, name),
                            embedded: scope.embedded,
                            options: options.clone(),
                        },
                        keep_existing,
                    );
                }
                DeclarationKind::JoinColumn(options) => {
                    let name = require_property(entity, property, "join column")?;
                    self.join_columns
                        .entry(join_path(&scope.path, name))
                        .or_default()
                        .push(options.clone());
                }
                DeclarationKind::JoinTable(options) => {
                    let name = require_property(entity, property, "join table")?;
                    let path = join_path(&scope.path, name);
                    if !(keep_existing && self.join_tables.contains_key(&path)) {
                        self.join_tables.insert(path, options.clone());
                    }
                }
                DeclarationKind::Index(options) => {
                    let mut options = options.clone();
                    if options.columns.is_empty() {
                        options.columns = property.map(str::to_string).into_iter().collect();
                    }
                    options.columns = options
                        .columns
                        .iter()
                        .map(|c| join_path(&scope.path, c))
                        .collect();
                    self.indices.push(options);
                }
                DeclarationKind::Unique(options) => {
                    let mut options = options.clone();
                    options.columns = options
                        .columns
                        .iter()
                        .map(|c| join_path(&scope.path, c))
                        .collect();
                    self.uniques.push(options);
                }
                DeclarationKind::Check(options) => self.checks.push(options.clone()),
                DeclarationKind::Exclusion(options) => self.exclusions.push(options.clone()),
                DeclarationKind::Embedded(options) => {
                    let name = require_property(entity, property, "embedded")?;
                    self.collect_embedded(
                        registry,
                        entity,
                        name,
                        options,
                        scope,
                        stack,
                        keep_existing,
                    )?;
                }
                DeclarationKind::RelationId(options) => {
                    let name = require_property(entity, property, "relation id")?;
                    self.relation_ids.push((
                        join_path(&scope.path, name),
                        join_path(&scope.path, &options.relation),
                    ));
                }
                DeclarationKind::Table(_)
                | DeclarationKind::Tree(_)
                | DeclarationKind::Inheritance { .. }
                | DeclarationKind::TableInheritance { .. } => {}
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn collect_embedded(
        &mut self,
        registry: &Registry,
        entity: &str,
        name: &str,
        options: &EmbeddedOptions,
        scope: &Scope,
        stack: &mut Vec<String>,
        keep_existing: bool,
    ) -> Result<(), ResolutionError> {
        let path = join_path(&scope.path, name);
        if stack.iter().any(|t| *t == options.target) {
            return Err(ResolutionError::CyclicEmbedded {
                entity: entity.to_string(),
                property: path,
                target: options.target.clone(),
                path: format!("{} -> {}", stack.join(" -> "), options.target),
            });
        }
        if !registry.has_declarations(&options.target) {
            return Err(ResolutionError::MissingEmbeddedTarget {
                entity: entity.to_string(),
                property: path,
                target: options.target.clone(),
            });
        }

        let prefix = if options.no_prefix {
            String::new()
        } else {
            options.prefix.clone().unwrap_or_else(|| name.to_string())
        };
        let index = match self.embeddeds.iter().position(|e| e.property_path == path) {
            Some(existing) => existing,
            None => {
                self.embeddeds.push(CollectedEmbedded {
                    parent: scope.embedded,
                    property_name: name.to_string(),
                    property_path: path.clone(),
                    target: options.target.clone(),
                    prefix: prefix.clone(),
                });
                self.embeddeds.len() - 1
            }
        };

        let mut prefixes = scope.prefixes.clone();
        prefixes.push(prefix);
        let inner = Scope {
            path,
            embedded: Some(index),
            prefixes,
        };

        stack.push(options.target.clone());
        for class in inheritance_chain(registry, &options.target)? {
            self.collect_class(registry, entity, &class, &inner, stack, keep_existing)?;
        }
        stack.pop();
        Ok(())
    }

    fn add_column(&mut self, column: CollectedColumn, keep_existing: bool) {
        match self
            .columns
            .iter()
            .position(|c| c.property_path == column.property_path)
        {
            Some(pos) if !keep_existing => self.columns[pos] = column,
            Some(_) => {}
            None => self.columns.push(column),
        }
    }

    fn add_relation(&mut self, relation: CollectedRelation, keep_existing: bool) {
        match self
            .relations
            .iter()
            .position(|r| r.property_path == relation.property_path)
        {
            Some(pos) if !keep_existing => self.relations[pos] = relation,
            Some(_) => {}
            None => self.relations.push(relation),
        }
    }
}
