//! Dialect-normalized snapshot of a database schema.
//!
//! Both sides of a diff are expressed in these types: the desired state is
//! projected from the metadata graph and the current state is introspected
//! from the live database.

mod apply;

pub use crate::registry::{GenerationStrategy, ReferentialAction};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schema {
    pub tables: BTreeMap<String, Table>,
    pub views: BTreeMap<String, View>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Option<PrimaryKey>,
    pub indexes: Vec<Index>,
    pub uniques: Vec<Unique>,
    pub checks: Vec<Check>,
    pub exclusions: Vec<Exclusion>,
    pub foreign_keys: Vec<ForeignKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub nullable: bool,
    pub default: Option<String>,
    pub generated: Option<GenerationStrategy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrimaryKey {
    pub name: Option<String>,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub where_clause: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Unique {
    pub name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Check {
    pub name: String,
    pub expression: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Exclusion {
    pub name: String,
    pub expression: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct View {
    pub name: String,
    pub expression: String,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: Table) -> &mut Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    /// Copy with every list sorted, so that snapshots differing only in
    /// column or constraint order compare equal.
    pub fn canonical(&self) -> Schema {
        let mut schema = self.clone();
        for table in schema.tables.values_mut() {
            table.columns.sort();
            table.indexes.sort();
            table.uniques.sort();
            table.checks.sort();
            table.exclusions.sort();
            table.foreign_keys.sort();
        }
        schema
    }

    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let json = serde_json::to_string(&self.canonical()).unwrap_or_default();
        hex::encode(Sha256::digest(json.as_bytes()))
    }

    /// Foreign keys anywhere in the schema that point at `table`.
    pub fn foreign_keys_referencing<'a>(
        &'a self,
        table: &'a str,
    ) -> impl Iterator<Item = (&'a Table, &'a ForeignKey)> + 'a {
        self.tables.values().flat_map(move |t| {
            t.foreign_keys
                .iter()
                .filter(move |fk| fk.referenced_table == table)
                .map(move |fk| (t, fk))
        })
    }
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: None,
            indexes: Vec::new(),
            uniques: Vec::new(),
            checks: Vec::new(),
            exclusions: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_columns(&self) -> &[String] {
        self.primary_key
            .as_ref()
            .map(|pk| pk.columns.as_slice())
            .unwrap_or(&[])
    }

    pub fn without_foreign_keys(&self) -> Table {
        Table {
            foreign_keys: Vec::new(),
            ..self.clone()
        }
    }
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            length: None,
            precision: None,
            scale: None,
            nullable: true,
            default: None,
            generated: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn generated(mut self, strategy: GenerationStrategy) -> Self {
        self.generated = Some(strategy);
        self
    }

    /// Differs in a way that changes the stored representation.
    pub fn type_differs(&self, other: &Column) -> bool {
        !self.data_type.eq_ignore_ascii_case(&other.data_type)
            || self.length != other.length
            || self.precision != other.precision
            || self.scale != other.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post() -> Table {
        let mut table = Table::new("post");
        table.columns = vec![
            Column::new("title", "text"),
            Column::new("id", "integer").not_null(),
        ];
        table.primary_key = Some(PrimaryKey {
            name: None,
            columns: vec!["id".into()],
        });
        table
    }

    #[test]
    fn same_schema_produces_same_fingerprint() {
        let mut a = Schema::new();
        a.add_table(post());
        let b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_ignores_column_order() {
        let mut a = Schema::new();
        a.add_table(post());
        let mut b = a.clone();
        b.tables.get_mut("post").unwrap().columns.reverse();
        assert_ne!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn different_schemas_produce_different_fingerprints() {
        let mut a = Schema::new();
        a.add_table(post());
        let b = Schema::new();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn finds_referencing_foreign_keys() {
        let mut comment = Table::new("comment");
        comment.foreign_keys.push(ForeignKey {
            name: "fk_comment_post".into(),
            columns: vec!["postId".into()],
            referenced_table: "post".into(),
            referenced_columns: vec!["id".into()],
            on_delete: ReferentialAction::Cascade,
            on_update: ReferentialAction::NoAction,
        });
        let mut schema = Schema::new();
        schema.add_table(post()).add_table(comment);

        let referencing: Vec<_> = schema
            .foreign_keys_referencing("post")
            .map(|(t, fk)| (t.name.as_str(), fk.name.as_str()))
            .collect();
        assert_eq!(referencing, vec![("comment", "fk_comment_post")]);
    }

    #[test]
    fn type_differs_ignores_case() {
        let a = Column::new("id", "INTEGER");
        let b = Column::new("id", "integer");
        assert!(!a.type_differs(&b));
        assert!(a.type_differs(&b.clone().with_length(4)));
    }
}
