use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    #[default]
    Regular,
    Abstract,
    View,
    EntityChild,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableOptions {
    pub name: Option<String>,
    pub table_type: TableType,
    pub schema: Option<String>,
    /// View definition, required when `table_type` is `View`.
    pub expression: Option<String>,
    pub discriminator_value: Option<String>,
    pub synchronize: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            name: None,
            table_type: TableType::Regular,
            schema: None,
            expression: None,
            discriminator_value: None,
            synchronize: true,
        }
    }
}

impl TableOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn view(expression: impl Into<String>) -> Self {
        Self {
            table_type: TableType::View,
            expression: Some(expression.into()),
            ..Self::default()
        }
    }

    pub fn child(discriminator_value: impl Into<String>) -> Self {
        Self {
            table_type: TableType::EntityChild,
            discriminator_value: Some(discriminator_value.into()),
            ..Self::default()
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn unsynchronized(mut self) -> Self {
        self.synchronize = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Decimal,
    Boolean,
    Char,
    Varchar,
    Text,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
    Jsonb,
    Binary,
    Custom(String),
}

impl ColumnType {
    pub fn is_textual(&self) -> bool {
        matches!(self, ColumnType::Char | ColumnType::Varchar)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Custom(name) => write!(f, "{name}"),
            other => write!(f, "{}", format!("{other:?}").to_lowercase()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStrategy {
    Increment,
    Uuid,
    Rowid,
    Identity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnMode {
    #[default]
    Regular,
    Virtual,
    CreateDate,
    UpdateDate,
    DeleteDate,
    Version,
    Discriminator,
    TreeLevel,
    TreeChildrenCount,
    ObjectId,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    Null,
    Raw(String),
    String(String),
    Number(i64),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnOptions {
    pub name: Option<String>,
    pub column_type: Option<ColumnType>,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub nullable: bool,
    pub unique: bool,
    pub primary: bool,
    pub generated: Option<GenerationStrategy>,
    pub default: Option<DefaultValue>,
    pub mode: ColumnMode,
    pub comment: Option<String>,
}

impl ColumnOptions {
    pub fn of(column_type: ColumnType) -> Self {
        Self {
            column_type: Some(column_type),
            ..Self::default()
        }
    }

    pub fn primary_generated() -> Self {
        Self {
            column_type: Some(ColumnType::Int),
            primary: true,
            generated: Some(GenerationStrategy::Increment),
            ..Self::default()
        }
    }

    pub fn primary(column_type: ColumnType) -> Self {
        Self {
            column_type: Some(column_type),
            primary: true,
            ..Self::default()
        }
    }

    pub fn mode(mode: ColumnMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn precision(mut self, precision: u32, scale: u32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, value: DefaultValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn generated(mut self, strategy: GenerationStrategy) -> Self {
        self.generated = Some(strategy);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelationType::OneToOne => "one-to-one",
            RelationType::OneToMany => "one-to-many",
            RelationType::ManyToOne => "many-to-one",
            RelationType::ManyToMany => "many-to-many",
        };
        f.write_str(name)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }

    pub fn from_sql(rule: &str) -> Self {
        match rule.trim().to_uppercase().as_str() {
            "RESTRICT" => ReferentialAction::Restrict,
            "CASCADE" => ReferentialAction::Cascade,
            "SET NULL" => ReferentialAction::SetNull,
            "SET DEFAULT" => ReferentialAction::SetDefault,
            _ => ReferentialAction::NoAction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeOptions {
    pub insert: bool,
    pub update: bool,
    pub remove: bool,
    pub soft_remove: bool,
    pub recover: bool,
}

impl CascadeOptions {
    pub fn all() -> Self {
        Self {
            insert: true,
            update: true,
            remove: true,
            soft_remove: true,
            recover: true,
        }
    }

    pub fn any(&self) -> bool {
        self.insert || self.update || self.remove || self.soft_remove || self.recover
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeRole {
    Parent,
    Children,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationOptions {
    pub relation_type: RelationType,
    pub target: String,
    pub inverse_side: Option<String>,
    pub lazy: bool,
    pub eager: bool,
    pub cascade: CascadeOptions,
    pub nullable: bool,
    pub primary: bool,
    pub on_delete: Option<ReferentialAction>,
    pub on_update: Option<ReferentialAction>,
    pub create_foreign_key_constraints: bool,
    pub tree_role: Option<TreeRole>,
}

impl Default for RelationOptions {
    fn default() -> Self {
        Self {
            relation_type: RelationType::ManyToOne,
            target: String::new(),
            inverse_side: None,
            lazy: false,
            eager: false,
            cascade: CascadeOptions::default(),
            nullable: true,
            primary: false,
            on_delete: None,
            on_update: None,
            create_foreign_key_constraints: true,
            tree_role: None,
        }
    }
}

impl RelationOptions {
    pub fn new(relation_type: RelationType, target: impl Into<String>) -> Self {
        Self {
            relation_type,
            target: target.into(),
            ..Self::default()
        }
    }

    pub fn one_to_one(target: impl Into<String>) -> Self {
        Self::new(RelationType::OneToOne, target)
    }

    pub fn one_to_many(target: impl Into<String>, inverse_side: impl Into<String>) -> Self {
        Self::new(RelationType::OneToMany, target).inverse(inverse_side)
    }

    pub fn many_to_one(target: impl Into<String>) -> Self {
        Self::new(RelationType::ManyToOne, target)
    }

    pub fn many_to_many(target: impl Into<String>) -> Self {
        Self::new(RelationType::ManyToMany, target)
    }

    pub fn inverse(mut self, inverse_side: impl Into<String>) -> Self {
        self.inverse_side = Some(inverse_side.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// The relation's join columns become (part of) the owner's primary key.
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self.nullable = false;
        self
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = Some(action);
        self
    }

    pub fn cascade(mut self, cascade: CascadeOptions) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn tree(mut self, role: TreeRole) -> Self {
        self.tree_role = Some(role);
        self
    }

    pub fn without_foreign_key(mut self) -> Self {
        self.create_foreign_key_constraints = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexOptions {
    pub name: Option<String>,
    /// Property paths; empty means the property the record is attached to.
    pub columns: Vec<String>,
    pub unique: bool,
    pub where_clause: Option<String>,
    pub synchronize: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            name: None,
            columns: Vec::new(),
            unique: false,
            where_clause: None,
            synchronize: true,
        }
    }
}

impl IndexOptions {
    pub fn on<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn where_clause(mut self, predicate: impl Into<String>) -> Self {
        self.where_clause = Some(predicate.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UniqueOptions {
    pub name: Option<String>,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckOptions {
    pub name: Option<String>,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExclusionOptions {
    pub name: Option<String>,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinColumnOptions {
    pub name: Option<String>,
    pub referenced_column_name: Option<String>,
    pub foreign_key_constraint_name: Option<String>,
}

impl JoinColumnOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn referencing(mut self, column: impl Into<String>) -> Self {
        self.referenced_column_name = Some(column.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinTableOptions {
    pub name: Option<String>,
    pub join_columns: Vec<JoinColumnOptions>,
    pub inverse_join_columns: Vec<JoinColumnOptions>,
}

impl JoinTableOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddedOptions {
    pub target: String,
    /// Custom column prefix. `None` uses the property name unless `no_prefix` is set.
    pub prefix: Option<String>,
    pub no_prefix: bool,
}

impl EmbeddedOptions {
    pub fn of(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn without_prefix(mut self) -> Self {
        self.no_prefix = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeStrategy {
    AdjacencyList,
    Closure,
    NestedSet,
    MaterializedPath,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeOptions {
    pub strategy: TreeStrategy,
    #[serde(default)]
    pub closure_table_name: Option<String>,
}

impl TreeOptions {
    pub fn new(strategy: TreeStrategy) -> Self {
        Self {
            strategy,
            closure_table_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationIdOptions {
    pub relation: String,
}
