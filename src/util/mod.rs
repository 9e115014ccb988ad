use regex::Regex;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::sync::OnceLock;
use thiserror::Error;

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace pattern"))
}

fn literal_cast_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^'((?:[^']|'')*)'::[A-Za-z][A-Za-z0-9_ ]*(\[\])?$").expect("valid cast pattern")
    })
}

fn parenthesized_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\((-?\d+(?:\.\d+)?)\)$").expect("valid number pattern"))
}

fn type_cast_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"::([A-Za-z][A-Za-z0-9_\[\]]*)").expect("valid cast pattern"))
}

pub fn normalize_sql_whitespace(sql: &str) -> String {
    whitespace_re().replace_all(sql.trim(), " ").to_string()
}

/// Strips the type cast PostgreSQL appends to literal defaults
/// (`'draft'::character varying` becomes `'draft'`) and the parentheses it
/// wraps around negative numbers.
pub fn strip_literal_cast(expr: &str) -> String {
    let trimmed = expr.trim();
    if let Some(caps) = literal_cast_re().captures(trimmed) {
        return format!("'{}'", &caps[1]);
    }
    if let Some(caps) = parenthesized_number_re().captures(trimmed) {
        return caps[1].to_string();
    }
    trimmed.to_string()
}

/// Canonicalizes a SQL expression by round-tripping it through sqlparser.
/// Falls back to whitespace/cast normalization when the expression does not parse.
pub fn canonicalize_expression(expr: &str) -> String {
    let cleaned = expr.replace(['`', '"'], "");
    let dialect = GenericDialect {};
    match Parser::new(&dialect).try_with_sql(&cleaned) {
        Ok(mut parser) => match parser.parse_expr() {
            Ok(ast) => ast.to_string().to_lowercase(),
            Err(_) => normalize_expression_fallback(&cleaned),
        },
        Err(_) => normalize_expression_fallback(&cleaned),
    }
}

fn normalize_expression_fallback(expr: &str) -> String {
    let lowered = type_cast_re()
        .replace_all(expr, |caps: &regex::Captures| {
            format!("::{}", caps[1].to_lowercase())
        })
        .to_string();
    normalize_sql_whitespace(&lowered).to_lowercase()
}

/// Strips redundant outer parentheses, `((a > 0))` -> `a > 0`.
pub fn strip_outer_parens(expr: &str) -> &str {
    let mut current = expr.trim();
    while current.starts_with('(') && current.ends_with(')') && parens_wrap_whole(current) {
        current = current[1..current.len() - 1].trim();
    }
    current
}

fn parens_wrap_whole(expr: &str) -> bool {
    let mut depth = 0usize;
    for (i, c) in expr.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 && i != expr.len() - 1 {
                    return false;
                }
            }
            _ => {}
        }
    }
    true
}

pub fn expressions_equal(a: &str, b: &str) -> bool {
    canonicalize_expression(strip_outer_parens(a)) == canonicalize_expression(strip_outer_parens(b))
}

pub fn optional_expressions_equal(a: &Option<String>, b: &Option<String>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => expressions_equal(a, b),
        _ => false,
    }
}

pub fn escape_string(value: &str) -> String {
    value.replace('\'', "''")
}

/// Raised while turning declarations into the metadata graph. Fatal at
/// connection bootstrap; never partially applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("{entity}.{property}: relation target {target} is not a registered entity")]
    MissingRelationTarget {
        entity: String,
        property: String,
        target: String,
    },

    #[error("{entity}.{property}: inverse side {inverse} does not exist on {target}")]
    MissingInverseSide {
        entity: String,
        property: String,
        target: String,
        inverse: String,
    },

    #[error("{entity}.{property}: one-to-many relation has no many-to-one inverse on {target}")]
    MissingManyToOneInverse {
        entity: String,
        property: String,
        target: String,
    },

    #[error("{entity}.{property}: one-to-one relation needs a join column on exactly one side, found none")]
    MissingJoinColumn { entity: String, property: String },

    #[error("{entity}.{property}: one-to-one relation declares a join column on both sides")]
    AmbiguousJoinColumn { entity: String, property: String },

    #[error("{entity}.{property}: join column declared on a {relation_type} relation")]
    UnexpectedJoinColumn {
        entity: String,
        property: String,
        relation_type: String,
    },

    #[error("{entity}.{property}: many-to-many relation needs a join table on exactly one side, found none")]
    MissingJoinTable { entity: String, property: String },

    #[error("{entity}.{property}: many-to-many relation declares a join table on both sides")]
    DuplicateJoinTable { entity: String, property: String },

    #[error("{entity}.{property}: referenced column {column} does not exist on {target}")]
    MissingReferencedColumn {
        entity: String,
        property: String,
        target: String,
        column: String,
    },

    #[error("{entity}: no primary column declared")]
    MissingPrimaryColumn { entity: String },

    #[error("{entity}: closure tables support a single primary column, found {count}")]
    UnsupportedClosurePrimaryKey { entity: String, count: usize },

    #[error("{entity}.{property}: embedded {target} nests itself ({path})")]
    CyclicEmbedded {
        entity: String,
        property: String,
        target: String,
        path: String,
    },

    #[error("{entity}.{property}: embedded type {target} has no declarations")]
    MissingEmbeddedTarget {
        entity: String,
        property: String,
        target: String,
    },

    #[error("{entity}: inheritance chain loops back through {parent}")]
    CyclicInheritance { entity: String, parent: String },

    #[error("{entity}: child entity has no ancestor declaring table inheritance")]
    MissingTableInheritance { entity: String },

    #[error("{entity}.{property}: relation id points at unknown relation {relation}")]
    MissingRelationIdRelation {
        entity: String,
        property: String,
        relation: String,
    },

    #[error("{entity}: index or constraint {name} references unknown property {property}")]
    MissingIndexColumn {
        entity: String,
        name: String,
        property: String,
    },

    #[error("{entity}: column {column} is declared more than once")]
    DuplicateColumn { entity: String, column: String },

    #[error("{entity}.{property}: {message}")]
    InvalidDeclaration {
        entity: String,
        property: String,
        message: String,
    },

    #[error("cyclic dependency between entities: {}", entities.join(" -> "))]
    CyclicDependency { entities: Vec<String> },
}

/// Raised by the planner before any DDL is emitted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("table {table}: {feature} is not supported by the {dialect} dialect")]
    UnsupportedConstraint {
        table: String,
        feature: String,
        dialect: String,
    },

    #[error("table {table}: {message}")]
    InvalidOperation { table: String, message: String },
}

impl PlanError {
    pub fn unsupported(
        table: impl Into<String>,
        feature: impl Into<String>,
        dialect: impl Into<String>,
    ) -> Self {
        Self::UnsupportedConstraint {
            table: table.into(),
            feature: feature.into(),
            dialect: dialect.into(),
        }
    }

    pub fn invalid(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            table: table.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("Schema apply failed at step {step} ({operation} on {table}): {message}")]
    Apply {
        step: usize,
        operation: String,
        table: String,
        message: String,
        rollback_failures: Vec<String>,
    },

    /// An operation rendered to several statements stopped after running
    /// some of them.
    #[error("{executed} of {total} statements ran before the failure: {error}")]
    PartialApply {
        executed: usize,
        total: usize,
        error: Box<Error>,
    },

    #[error("Transaction state error: {0}")]
    TransactionState(String),

    #[error("Connection lifecycle error: {0}")]
    ConnectionLifecycle(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Migration {name} failed: {message}")]
    Migration { name: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Masks the password of a connection URL for log and error output.
pub fn sanitize_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:****@{host}"),
        None => url.to_string(),
    }
}
