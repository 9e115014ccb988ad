//! Conventions that turn entity and property names into database identifiers.
//!
//! Every identifier the metadata builder emits goes through a
//! [`NamingStrategy`], so swapping the strategy renames tables, join columns
//! and constraints consistently. Constraint names are deterministic hashes of
//! the table and column names so that re-running resolution never churns them.

use sha2::{Digest, Sha256};
use std::fmt;

const HASHED_NAME_LENGTH: usize = 27;

pub trait NamingStrategy: Send + Sync + fmt::Debug {
    fn table_name(&self, target_name: &str, user_specified: Option<&str>) -> String;

    fn closure_junction_table_name(&self, closure_table_name: &str) -> String;

    fn column_name(
        &self,
        property_name: &str,
        custom_name: Option<&str>,
        embedded_prefixes: &[String],
    ) -> String;

    fn primary_key_name(&self, table_name: &str, column_names: &[String]) -> String;

    fn unique_constraint_name(&self, table_name: &str, column_names: &[String]) -> String;

    /// Name of the unique constraint guarding a one-to-one join column.
    fn relation_constraint_name(&self, table_name: &str, column_names: &[String]) -> String;

    fn foreign_key_name(
        &self,
        table_name: &str,
        column_names: &[String],
        referenced_table: &str,
        referenced_columns: &[String],
    ) -> String;

    fn index_name(
        &self,
        table_name: &str,
        column_names: &[String],
        where_clause: Option<&str>,
    ) -> String;

    fn check_constraint_name(&self, table_name: &str, expression: &str) -> String;

    fn exclusion_constraint_name(&self, table_name: &str, expression: &str) -> String;

    fn join_column_name(&self, relation_name: &str, referenced_column_name: &str) -> String;

    fn join_table_name(
        &self,
        first_table: &str,
        second_table: &str,
        first_property: &str,
        second_property: &str,
    ) -> String;

    fn join_table_column_duplication_prefix(&self, column_name: &str, index: usize) -> String;

    fn join_table_column_name(
        &self,
        table_name: &str,
        property_name: &str,
        column_name: Option<&str>,
    ) -> String;

    fn join_table_inverse_column_name(
        &self,
        table_name: &str,
        property_name: &str,
        column_name: Option<&str>,
    ) -> String {
        self.join_table_column_name(table_name, property_name, column_name)
    }

    fn prefix_table_name(&self, prefix: &str, table_name: &str) -> String {
        format!("{prefix}{table_name}")
    }

    fn nested_set_column_names(&self) -> (String, String) {
        ("nsleft".to_string(), "nsright".to_string())
    }

    fn materialized_path_column_name(&self) -> String {
        "mpath".to_string()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNamingStrategy;

impl NamingStrategy for DefaultNamingStrategy {
    fn table_name(&self, target_name: &str, user_specified: Option<&str>) -> String {
        match user_specified {
            Some(name) => name.to_string(),
            None => snake_case(target_name),
        }
    }

    fn closure_junction_table_name(&self, closure_table_name: &str) -> String {
        format!("{closure_table_name}_closure")
    }

    fn column_name(
        &self,
        property_name: &str,
        custom_name: Option<&str>,
        embedded_prefixes: &[String],
    ) -> String {
        let name = custom_name.unwrap_or(property_name);
        let prefixes: Vec<&str> = embedded_prefixes
            .iter()
            .map(String::as_str)
            .filter(|p| !p.is_empty())
            .collect();
        if prefixes.is_empty() {
            return name.to_string();
        }
        format!("{}{}", camel_case(&prefixes.join("_")), title_case(name))
    }

    fn primary_key_name(&self, table_name: &str, column_names: &[String]) -> String {
        hashed_name("PK_", &format!("{}_{}", table_name, sorted(column_names).join("_")))
    }

    fn unique_constraint_name(&self, table_name: &str, column_names: &[String]) -> String {
        hashed_name("UQ_", &format!("{}_{}", table_name, sorted(column_names).join("_")))
    }

    fn relation_constraint_name(&self, table_name: &str, column_names: &[String]) -> String {
        hashed_name("REL_", &format!("{}_{}", table_name, sorted(column_names).join("_")))
    }

    fn foreign_key_name(
        &self,
        table_name: &str,
        column_names: &[String],
        referenced_table: &str,
        referenced_columns: &[String],
    ) -> String {
        let key = format!(
            "{}_{}_{}_{}",
            table_name,
            sorted(column_names).join("_"),
            referenced_table,
            sorted(referenced_columns).join("_")
        );
        hashed_name("FK_", &key)
    }

    fn index_name(
        &self,
        table_name: &str,
        column_names: &[String],
        where_clause: Option<&str>,
    ) -> String {
        let mut key = format!("{}_{}", table_name, sorted(column_names).join("_"));
        if let Some(predicate) = where_clause {
            key.push('_');
            key.push_str(predicate);
        }
        hashed_name("IDX_", &key)
    }

    fn check_constraint_name(&self, table_name: &str, expression: &str) -> String {
        hashed_name("CHK_", &format!("{table_name}_{expression}"))
    }

    fn exclusion_constraint_name(&self, table_name: &str, expression: &str) -> String {
        hashed_name("XCL_", &format!("{table_name}_{expression}"))
    }

    fn join_column_name(&self, relation_name: &str, referenced_column_name: &str) -> String {
        camel_case(&format!("{relation_name}_{referenced_column_name}"))
    }

    fn join_table_name(
        &self,
        first_table: &str,
        second_table: &str,
        first_property: &str,
        _second_property: &str,
    ) -> String {
        snake_case(&format!(
            "{}_{}_{}",
            first_table,
            first_property.replace('.', "_"),
            second_table
        ))
    }

    fn join_table_column_duplication_prefix(&self, column_name: &str, index: usize) -> String {
        format!("{column_name}_{index}")
    }

    fn join_table_column_name(
        &self,
        table_name: &str,
        property_name: &str,
        column_name: Option<&str>,
    ) -> String {
        camel_case(&format!("{}_{}", table_name, column_name.unwrap_or(property_name)))
    }
}

fn sorted(names: &[String]) -> Vec<String> {
    let mut names = names.to_vec();
    names.sort();
    names
}

fn hashed_name(prefix: &str, key: &str) -> String {
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    format!("{prefix}{}", &digest[..HASHED_NAME_LENGTH])
}

/// `PostDetails` -> `post_details`, `HTMLPage` -> `html_page`.
pub fn snake_case(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// `post_id` -> `postId`, `Category` -> `category`.
pub fn camel_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut upper_next = false;
    for (i, c) in input.chars().enumerate() {
        if matches!(c, '_' | '-' | ' ') {
            upper_next = true;
            continue;
        }
        if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else if i == 0 {
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

pub fn title_case(input: &str) -> String {
    let mut chars = input.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_are_snake_cased_targets() {
        let naming = DefaultNamingStrategy;
        assert_eq!(naming.table_name("Post", None), "post");
        assert_eq!(naming.table_name("PostDetails", None), "post_details");
        assert_eq!(naming.table_name("HTMLPage", None), "html_page");
        assert_eq!(naming.table_name("Post", Some("articles")), "articles");
    }

    #[test]
    fn join_column_names_are_camel_cased() {
        let naming = DefaultNamingStrategy;
        assert_eq!(naming.join_column_name("category", "id"), "categoryId");
        assert_eq!(naming.join_column_name("author", "user_uuid"), "authorUserUuid");
    }

    #[test]
    fn junction_columns_combine_table_and_column() {
        let naming = DefaultNamingStrategy;
        assert_eq!(naming.join_table_column_name("post", "id", Some("id")), "postId");
        assert_eq!(
            naming.join_table_inverse_column_name("category", "id", None),
            "categoryId"
        );
    }

    #[test]
    fn junction_table_name_joins_owner_property_and_target() {
        let naming = DefaultNamingStrategy;
        assert_eq!(
            naming.join_table_name("post", "category", "categories", "posts"),
            "post_categories_category"
        );
    }

    #[test]
    fn embedded_columns_are_prefixed() {
        let naming = DefaultNamingStrategy;
        assert_eq!(naming.column_name("likes", None, &["counters".into()]), "countersLikes");
        assert_eq!(
            naming.column_name("likes", None, &["info".into(), "counters".into()]),
            "infoCountersLikes"
        );
        assert_eq!(naming.column_name("likes", Some("total"), &[]), "total");
    }

    #[test]
    fn hashed_names_ignore_column_order() {
        let naming = DefaultNamingStrategy;
        let a = naming.primary_key_name("post", &["id".into(), "tenant".into()]);
        let b = naming.primary_key_name("post", &["tenant".into(), "id".into()]);
        assert_eq!(a, b);
        assert!(a.starts_with("PK_"));
        assert_eq!(a.len(), 3 + HASHED_NAME_LENGTH);
    }

    #[test]
    fn hashed_names_differ_per_kind_and_table() {
        let naming = DefaultNamingStrategy;
        let cols = vec!["title".to_string()];
        assert_ne!(
            naming.unique_constraint_name("post", &cols),
            naming.unique_constraint_name("page", &cols)
        );
        assert!(naming.index_name("post", &cols, None).starts_with("IDX_"));
        assert_ne!(
            naming.index_name("post", &cols, None),
            naming.index_name("post", &cols, Some("title IS NOT NULL"))
        );
    }

    #[test]
    fn closure_table_gets_suffix() {
        assert_eq!(
            DefaultNamingStrategy.closure_junction_table_name("category"),
            "category_closure"
        );
    }
}
