use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use sagastore_core::{CorrelationType, SagaDefinition};
use sagastore_infra::{Cancellation, CorrelationResolver, InMemorySagaStore, PersistenceConfig, SagaPersister};
use sagastore_messages::MessageEnvelope;
use sagastore_sql::Dialect;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CounterData {
    counter_id: Option<String>,
    hits: i64,
}

fn definition() -> SagaDefinition {
    SagaDefinition::builder("CounterSaga")
        .correlation("CounterId", CorrelationType::String)
        .started_by("Hit", Some("CounterId"))
        .build()
        .expect("valid definition")
}

fn persister() -> SagaPersister {
    SagaPersister::builder(PersistenceConfig::new(Dialect::PostgreSql))
        .saga(definition())
        .build()
        .expect("valid persister")
}

async fn hit(persister: &SagaPersister, store: &Arc<InMemorySagaStore>, counter: &str) {
    let message = MessageEnvelope::new("Hit", json!({ "CounterId": counter }));
    let mut tx = store.begin();
    let mut session = persister
        .session::<CounterData>("CounterSaga", &mut tx, Cancellation::none())
        .expect("session");
    session.load(&message).await.expect("load");
    if let Some(data) = session.data_mut() {
        data.hits += 1;
    }
    session.complete().await.expect("complete");
    tx.commit();
}

/// Load-modify-commit of one saga while the table holds `n` other instances.
fn bench_round_trip(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    let persister = persister();
    let mut group = c.benchmark_group("session_round_trip");

    for n in [10usize, 100, 1_000] {
        let store = InMemorySagaStore::new();
        rt.block_on(async {
            for i in 0..n {
                hit(&persister, &store, &format!("counter-{i}")).await;
            }
        });
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| rt.block_on(hit(&persister, &store, black_box("counter-0"))));
        });
    }
    group.finish();
}

fn bench_resolve(c: &mut Criterion) {
    let resolver = CorrelationResolver::new(&definition());
    let message = MessageEnvelope::new("Hit", json!({ "CounterId": "counter-0", "Noise": [1, 2, 3] }));
    c.bench_function("resolve_correlation", |b| {
        b.iter(|| resolver.resolve(black_box(&message)).expect("resolve"))
    });
}

criterion_group!(benches, bench_round_trip, bench_resolve);
criterion_main!(benches);
