//! Field codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kvdex_bench::random_text;
use kvdex_codec::{index_token, Compression, Field, FieldType, Value};
use serde_json::json;

fn fields() -> Vec<(&'static str, Field, Value)> {
    vec![
        ("integer", Field::integer("n"), Value::Integer(1_234_567)),
        ("text", Field::text("t"), Value::Text(random_text(32))),
        ("bool", Field::new("b", FieldType::Bool), Value::Bool(true)),
        (
            "json",
            Field::new("j", FieldType::Json),
            Value::Json(json!({"tags": ["a", "b"], "weight": 3, "nested": {"ok": true}})),
        ),
        (
            "zstd",
            Field::new(
                "z",
                FieldType::Compressed {
                    mode: Compression::Zstd,
                },
            ),
            Value::Bytes(random_text(16).repeat(64).into_bytes()),
        ),
        (
            "zlib",
            Field::new(
                "g",
                FieldType::Compressed {
                    mode: Compression::Zlib,
                },
            ),
            Value::Bytes(random_text(16).repeat(64).into_bytes()),
        ),
        (
            "lz4",
            Field::new(
                "l",
                FieldType::Compressed {
                    mode: Compression::Lz4,
                },
            ),
            Value::Bytes(random_text(16).repeat(64).into_bytes()),
        ),
    ]
}

/// Benchmark encoding per field type.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for (name, field, raw) in fields() {
        let value = field.input(raw).unwrap();
        group.bench_function(name, |b| {
            b.iter(|| black_box(field.encode(black_box(&value)).unwrap()));
        });
    }
    group.finish();
}

/// Benchmark decoding per field type.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for (name, field, raw) in fields() {
        let value = field.input(raw).unwrap();
        let stored = field.encode(&value).unwrap();
        group.bench_function(name, |b| {
            b.iter(|| black_box(field.decode(black_box(stored.as_deref())).unwrap()));
        });
    }
    group.finish();
}

/// Benchmark plain and hashed index tokens.
fn bench_index_token(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_token");
    for size in [16, 256, 4096].iter() {
        let stored = random_text(*size).into_bytes();
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("plain", size), &stored, |b, stored| {
            b.iter(|| black_box(index_token(black_box(stored), false)));
        });
        group.bench_with_input(BenchmarkId::new("hashed", size), &stored, |b, stored| {
            b.iter(|| black_box(index_token(black_box(stored), true)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_index_token);
criterion_main!(benches);
