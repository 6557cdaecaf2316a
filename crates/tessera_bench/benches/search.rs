//! Search benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use tessera_bench::seeded_bridge;
use tessera_core::{
    Comparator, LogicalOperator, SearchByConditionsObject, SearchByHashObject, SearchCondition,
    SearchObject,
};

/// Benchmark primary-key lookups.
fn bench_search_by_hash(c: &mut Criterion) {
    let bridge = seeded_bridge(10_000);
    let mut group = c.benchmark_group("search_by_hash");

    for count in [1, 10, 100].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        let hashes = (0..*count).map(|i| json!(i * 97)).collect();
        let request = SearchByHashObject::new("dev", "dog", hashes);
        group.bench_with_input(BenchmarkId::from_parameter(count), &request, |b, request| {
            b.iter(|| black_box(bridge.search_by_hash(request).unwrap()));
        });
    }
    group.finish();
}

/// Benchmark one-attribute searches by search type.
fn bench_search_by_value(c: &mut Criterion) {
    let bridge = seeded_bridge(10_000);
    let mut group = c.benchmark_group("search_by_value");

    let cases = [
        ("equals", SearchObject::new("dev", "dog", "age", json!(7))),
        ("starts_with", SearchObject::new("dev", "dog", "name", json!("dog-12*"))),
        ("contains", SearchObject::new("dev", "dog", "name", json!("*99*"))),
        (
            "greater",
            SearchObject::new("dev", "dog", "id", json!(9_900)).comparator(Comparator::Greater),
        ),
        (
            "between",
            SearchObject::new("dev", "dog", "age", json!(3))
                .comparator(Comparator::Between)
                .end_value(json!(5)),
        ),
        (
            "covered_projection",
            SearchObject::new("dev", "dog", "age", json!(7)).get_attributes(&["id", "age"]),
        ),
    ];
    for (name, request) in &cases {
        group.bench_function(*name, |b| {
            b.iter(|| black_box(bridge.search_by_value(request).unwrap()));
        });
    }
    group.finish();
}

/// Benchmark multi-condition searches.
fn bench_search_by_conditions(c: &mut Criterion) {
    let bridge = seeded_bridge(10_000);
    let mut group = c.benchmark_group("search_by_conditions");

    for operator in [LogicalOperator::And, LogicalOperator::Or] {
        let request = SearchByConditionsObject::new(
            "dev",
            "dog",
            operator,
            vec![
                SearchCondition::new("age", json!(4)),
                SearchCondition::new("name", json!("dog-1*")),
            ],
        );
        group.bench_function(format!("{operator:?}"), |b| {
            b.iter(|| black_box(bridge.search_by_conditions(&request).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_search_by_hash,
    bench_search_by_value,
    bench_search_by_conditions,
);
criterion_main!(benches);
