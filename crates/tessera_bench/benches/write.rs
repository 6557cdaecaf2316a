//! Write path benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use tessera_bench::{dog, dogs, seeded_bridge};
use tessera_core::{Config, DeleteObject, InsertObject, StorageBridge};
use tessera_testkit::{prepare_table, records};

/// Benchmark single-record inserts.
fn bench_single_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_insert");

    for payload in [16, 256, 4096].iter() {
        group.throughput(Throughput::Bytes(*payload as u64));
        group.bench_with_input(BenchmarkId::from_parameter(payload), payload, |b, &payload| {
            let bridge = StorageBridge::init(Config::in_memory()).unwrap();
            prepare_table(&bridge, "dev", "dog", "id");
            let next = AtomicUsize::new(0);

            b.iter(|| {
                let id = next.fetch_add(1, Ordering::Relaxed);
                let request = InsertObject::new("dev", "dog", vec![dog(id, payload)]);
                black_box(bridge.insert(&request).unwrap());
            });
        });
    }
    group.finish();
}

/// Benchmark batch inserts, one audit entry per batch.
fn bench_batch_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_insert");

    for batch_size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                let bridge = StorageBridge::init(Config::in_memory()).unwrap();
                prepare_table(&bridge, "dev", "dog", "id");
                let mut first = 0;

                b.iter(|| {
                    let request = InsertObject::new("dev", "dog", dogs(first, batch_size, 64));
                    first += batch_size;
                    black_box(bridge.insert(&request).unwrap());
                });
            },
        );
    }
    group.finish();
}

/// Benchmark updates that move one indexed value.
fn bench_update(c: &mut Criterion) {
    c.bench_function("update_indexed", |b| {
        let bridge = seeded_bridge(1000);
        let mut age = 0;

        b.iter(|| {
            age = (age + 1) % 50;
            let request = InsertObject::new("dev", "dog", records(json!([{"id": 500, "age": age}])));
            black_box(bridge.update(&request).unwrap());
        });
    });
}

/// Benchmark deletes of freshly inserted rows.
fn bench_delete(c: &mut Criterion) {
    c.bench_function("delete", |b| {
        let bridge = seeded_bridge(0);
        let next = AtomicUsize::new(0);

        b.iter_batched(
            || {
                let id = next.fetch_add(1, Ordering::Relaxed);
                bridge
                    .insert(&InsertObject::new("dev", "dog", vec![dog(id, 32)]))
                    .unwrap();
                id
            },
            |id| {
                let request = DeleteObject::new("dev", "dog", vec![json!(id)]);
                black_box(bridge.delete(&request).unwrap());
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

/// Benchmark a file-backed insert with a flush.
fn bench_file_insert(c: &mut Criterion) {
    c.bench_function("file_insert_flush", |b| {
        let dir = tempfile::tempdir().unwrap();
        let bridge = StorageBridge::init(Config::at(dir.path())).unwrap();
        prepare_table(&bridge, "dev", "dog", "id");
        let mut first = 0;

        b.iter(|| {
            let request = InsertObject::new("dev", "dog", dogs(first, 10, 64));
            first += 10;
            bridge.insert(&request).unwrap();
            bridge.flush().unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_single_insert,
    bench_batch_insert,
    bench_update,
    bench_delete,
    bench_file_insert,
);
criterion_main!(benches);
