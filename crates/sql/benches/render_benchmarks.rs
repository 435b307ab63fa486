use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use sagastore_core::{CorrelationType, SagaDefinition};
use sagastore_sql::{Dialect, ScriptBundle, ScriptGenerator};

fn order_saga() -> SagaDefinition {
    SagaDefinition::builder("OrderSaga")
        .correlation("OrderId", CorrelationType::Guid)
        .started_by("StartOrder", Some("OrderId"))
        .handles("ShipOrder", Some("OrderId"))
        .build()
        .unwrap()
}

fn bench_statements(c: &mut Criterion) {
    let definition = order_saga();
    let mut group = c.benchmark_group("saga_statements");
    for dialect in Dialect::ALL {
        let generator = ScriptGenerator::new(dialect, "Sales_");
        group.bench_with_input(BenchmarkId::from_parameter(dialect), &generator, |b, generator| {
            b.iter(|| generator.statements(black_box(&definition)).unwrap());
        });
    }
    group.finish();
}

fn bench_finder_lookup(c: &mut Criterion) {
    let statements = ScriptGenerator::new(Dialect::PostgreSql, "")
        .statements(&order_saga())
        .unwrap();
    c.bench_function("select_by_data_postgres", |b| {
        b.iter(|| statements.select_by_data(black_box("Customer.Email")).unwrap());
    });
}

fn bench_bundle(c: &mut Criterion) {
    let definitions: Vec<_> = (0..20)
        .map(|i| {
            SagaDefinition::builder(format!("Saga{i}"))
                .correlation("Key", CorrelationType::String)
                .started_by("Start", Some("Key"))
                .build()
                .unwrap()
        })
        .collect();
    c.bench_function("bundle_20_sagas_all_dialects", |b| {
        b.iter(|| ScriptBundle::generate(black_box(&definitions), &Dialect::ALL, "").unwrap());
    });
}

criterion_group!(benches, bench_statements, bench_finder_lookup, bench_bundle);
criterion_main!(benches);
