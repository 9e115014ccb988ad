use crate::diff::{desired_schema, plan_changes, DiffOptions, MigrationOp};
use crate::dialect::{Dialect, SchemaDriver};
use crate::metadata::MetadataGraph;
use crate::model::Schema;
use crate::sync::load_current_schema;
use crate::util::{PlanError, Result};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub has_drift: bool,
    pub expected_fingerprint: String,
    pub actual_fingerprint: String,
    /// Operations that would bring the database back in line.
    pub differences: Vec<MigrationOp>,
}

impl DriftReport {
    pub fn summary(&self) -> Vec<String> {
        self.differences.iter().map(|op| op.to_string()).collect()
    }
}

/// Compares two snapshots through `dialect`. Drift is whatever a
/// synchronization would change; tables outside `expected` only count when
/// `options.drop_unknown_tables` is set.
pub fn compare(
    actual: &Schema,
    expected: &Schema,
    dialect: &dyn Dialect,
    options: &DiffOptions,
) -> std::result::Result<DriftReport, PlanError> {
    let plan = plan_changes(actual, expected, dialect, options)?;
    let expected = dialect.normalize_schema(expected.clone());
    let mut actual = dialect.normalize_schema(actual.clone());
    if !options.drop_unknown_tables {
        actual.tables.retain(|name, _| expected.tables.contains_key(name));
    }

    Ok(DriftReport {
        has_drift: !plan.is_empty(),
        expected_fingerprint: expected.fingerprint(),
        actual_fingerprint: actual.fingerprint(),
        differences: plan.forward().cloned().collect(),
    })
}

pub async fn detect_drift(
    driver: &mut dyn SchemaDriver,
    graph: &MetadataGraph,
    drop_unknown_tables: bool,
) -> Result<DriftReport> {
    let actual = load_current_schema(driver).await?;
    let dialect = driver.dialect();
    let expected = desired_schema(graph, dialect);
    let options = DiffOptions {
        drop_unknown_tables,
        reserved_tables: crate::bookkeeping::reserved_tables(dialect),
    };
    Ok(compare(&actual, &expected, dialect, &options)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{DialectKind, DialectOptions};
    use crate::model::{Column, PrimaryKey, Table};

    fn post() -> Table {
        let mut table = Table::new("post");
        table.columns = vec![
            Column::new("id", "integer").not_null(),
            Column::new("title", "text"),
        ];
        table.primary_key = Some(PrimaryKey {
            name: None,
            columns: vec!["id".into()],
        });
        table
    }

    fn schema(tables: Vec<Table>) -> Schema {
        let mut schema = Schema::new();
        for table in tables {
            schema.add_table(table);
        }
        schema
    }

    #[test]
    fn identical_schemas_have_no_drift() {
        let dialect = DialectKind::Postgres.dialect(DialectOptions::default());
        let report = compare(
            &schema(vec![post()]),
            &schema(vec![post()]),
            dialect.as_ref(),
            &DiffOptions::default(),
        )
        .unwrap();
        assert!(!report.has_drift);
        assert_eq!(report.expected_fingerprint, report.actual_fingerprint);
        assert!(report.differences.is_empty());
    }

    #[test]
    fn missing_column_is_reported() {
        let dialect = DialectKind::Postgres.dialect(DialectOptions::default());
        let mut actual = post();
        actual.columns.pop();
        let report = compare(
            &schema(vec![actual]),
            &schema(vec![post()]),
            dialect.as_ref(),
            &DiffOptions::default(),
        )
        .unwrap();
        assert!(report.has_drift);
        assert_ne!(report.expected_fingerprint, report.actual_fingerprint);
        assert_eq!(report.summary(), vec!["add column post.title"]);
    }

    #[test]
    fn unknown_tables_only_drift_when_dropping() {
        let dialect = DialectKind::Postgres.dialect(DialectOptions::default());
        let mut legacy = Table::new("legacy");
        legacy.columns = vec![Column::new("id", "integer").not_null()];
        let actual = schema(vec![post(), legacy]);
        let expected = schema(vec![post()]);

        let report = compare(&actual, &expected, dialect.as_ref(), &DiffOptions::default()).unwrap();
        assert!(!report.has_drift);

        let options = DiffOptions {
            drop_unknown_tables: true,
            ..DiffOptions::default()
        };
        let report = compare(&actual, &expected, dialect.as_ref(), &options).unwrap();
        assert!(report.has_drift);
        assert!(matches!(report.differences[0], MigrationOp::DropTable(_)));
    }
}
