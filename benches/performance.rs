use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ormold::builder::resolve;
use ormold::dialect::{DialectKind, DialectOptions};
use ormold::diff::{desired_schema, plan_changes, DiffOptions};
use ormold::model::Schema;
use ormold::registry::{ColumnOptions, ColumnType, JoinTableOptions, Registry, RelationOptions, TableOptions};

/// A chain of entities where each one belongs to the previous entity and
/// every tenth one has a many-to-many with the first.
fn registry(entities: usize) -> Registry {
    let mut registry = Registry::new();
    for i in 0..entities {
        let name = format!("Entity{i}");
        registry
            .table(&name, TableOptions::default())
            .column(&name, "id", ColumnOptions::primary_generated())
            .column(&name, "title", ColumnOptions::of(ColumnType::Varchar))
            .column(&name, "body", ColumnOptions::of(ColumnType::Text).nullable());
        if i > 0 {
            registry.relation(&name, "parent", RelationOptions::many_to_one(format!("Entity{}", i - 1)));
        }
        if i > 0 && i % 10 == 0 {
            registry
                .relation(&name, "peers", RelationOptions::many_to_many("Entity0"))
                .join_table(&name, "peers", JoinTableOptions::default());
        }
    }
    registry
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    for size in [10, 100] {
        let registry = registry(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &registry, |b, registry| {
            b.iter(|| resolve(black_box(registry)))
        });
    }
    group.finish();
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_changes");
    for kind in [DialectKind::Postgres, DialectKind::Mysql] {
        let dialect = kind.dialect(DialectOptions::default());
        let graph = match resolve(&registry(100)) {
            Ok(graph) => graph,
            Err(err) => panic!("resolve: {err}"),
        };
        let desired = desired_schema(&graph, dialect.as_ref());
        let empty = Schema::new();
        let options = DiffOptions::default();
        group.bench_function(BenchmarkId::new("from_empty", kind), |b| {
            b.iter(|| plan_changes(black_box(&empty), black_box(&desired), dialect.as_ref(), &options))
        });
        group.bench_function(BenchmarkId::new("up_to_date", kind), |b| {
            b.iter(|| plan_changes(black_box(&desired), black_box(&desired), dialect.as_ref(), &options))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_resolve, bench_plan);
criterion_main!(benches);
