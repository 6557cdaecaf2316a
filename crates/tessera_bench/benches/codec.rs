//! Key and row codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use tessera_bench::dog;
use tessera_codec::{auto_cast, decode_row, encode_row, IndexKey};

/// Benchmark index key encoding per bracket.
fn bench_key_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_encode");

    let keys = [
        ("null", IndexKey::Null),
        ("bool", IndexKey::Bool(true)),
        ("number", IndexKey::Number(-1234.5)),
        ("text", IndexKey::Text("the quick brown fox".into())),
    ];
    for (name, key) in &keys {
        group.bench_function(*name, |b| {
            b.iter(|| black_box(key.encode().unwrap()));
        });
    }
    group.finish();
}

/// Benchmark key decoding.
fn bench_key_decode(c: &mut Criterion) {
    let encoded = IndexKey::Number(1_700_000_000_000.25).encode().unwrap();
    c.bench_function("key_decode", |b| {
        b.iter(|| black_box(IndexKey::decode(black_box(&encoded)).unwrap()));
    });
}

/// Benchmark row encoding and decoding.
fn bench_rows(c: &mut Criterion) {
    let mut group = c.benchmark_group("row");
    let row = dog(42, 256);
    let bytes = encode_row(&row).unwrap();

    group.bench_function("encode", |b| {
        b.iter(|| black_box(encode_row(black_box(&row)).unwrap()));
    });
    group.bench_function("decode", |b| {
        b.iter(|| black_box(decode_row(black_box(&bytes)).unwrap()));
    });
    group.finish();
}

/// Benchmark search value casting.
fn bench_auto_cast(c: &mut Criterion) {
    let values = [json!("12345"), json!("true"), json!("dog-1"), json!(7)];
    c.bench_function("auto_cast", |b| {
        b.iter(|| {
            for value in &values {
                black_box(auto_cast(black_box(value)));
            }
        });
    });
}

criterion_group!(
    benches,
    bench_key_encode,
    bench_key_decode,
    bench_rows,
    bench_auto_cast,
);
criterion_main!(benches);
