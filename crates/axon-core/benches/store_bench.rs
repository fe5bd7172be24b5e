//! Benchmarks for store mutation and batch delivery.
//!
//! Run with: cargo bench -p axon-core --bench store_bench

use axon_core::{ChangeRecord, ChangeSet, ObservableStore, Observer};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;

fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("store/set");
    group.bench_function("flat_key", |b| {
        let store = ObservableStore::new();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            store.set("counter", json!(i));
            black_box(store.get("counter"))
        });
    });
    group.bench_function("nested_key", |b| {
        let store = ObservableStore::new();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            store.set("user.session.count", json!(i));
            black_box(store.get("user.session.count"))
        });
    });
    group.finish();
}

fn bench_batch_delivery(c: &mut Criterion) {
    let mut group = c.benchmark_group("store/deliver");
    for observers in [1usize, 8, 64] {
        group.throughput(Throughput::Elements(observers as u64));
        group.bench_with_input(
            BenchmarkId::new("wildcard_observers", observers),
            &observers,
            |b, &observers| {
                let store = ObservableStore::new();
                for _ in 0..observers {
                    let observer = Observer::new(|record: &ChangeRecord, _: &ChangeSet| {
                        black_box(&record.name);
                    });
                    store.observe(&observer, &[]);
                }
                let mut i = 0u64;
                b.iter(|| {
                    i += 1;
                    store.set_many([("a", json!(i)), ("b", json!(i)), ("c", json!(i))]);
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_set, bench_batch_delivery);
criterion_main!(benches);
