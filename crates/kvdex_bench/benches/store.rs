//! Store-level benchmarks: atomic units, scans and the RESP codec.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kvdex_bench::random_text;
use kvdex_store::resp::{encode_command, FrameReader};
use kvdex_store::{glob_match, Batch, InMemoryStore, KeyValueStore, StoreRead};

fn hash_batch(start: usize, count: usize) -> Batch {
    let mut batch = Batch::new();
    for i in start..start + count {
        batch.hset(
            format!("bench:data:{i}"),
            vec![("name".to_string(), random_text(16).into_bytes())],
        );
        batch.sadd("bench:keys", vec![i.to_string()]);
    }
    batch
}

/// Benchmark committing batches to the in-memory store.
fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");

    for count in [1, 10, 100].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let store = InMemoryStore::new();
            let mut next = 0;
            b.iter_batched(
                || {
                    next += count;
                    hash_batch(next, count)
                },
                |batch| store.commit(batch).unwrap(),
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

/// Benchmark a watched unit that reads before writing.
fn bench_watched_unit(c: &mut Criterion) {
    let store = InMemoryStore::new();
    store.commit(hash_batch(0, 100)).unwrap();
    let watch = vec!["bench:data:7".to_string()];

    c.bench_function("watched_unit", |b| {
        b.iter(|| {
            store
                .atomic(&watch, &mut |reader| {
                    let mut batch = Batch::new();
                    if let Some(fields) = reader.hgetall("bench:data:7")? {
                        batch.hset("bench:data:7", fields.into_iter().collect());
                    }
                    Ok(batch)
                })
                .unwrap();
        });
    });
}

/// Benchmark pattern scans over a populated store.
fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan_keys");

    for size in [100, 1000, 10_000].iter() {
        let store = InMemoryStore::new();
        store.commit(hash_batch(0, *size)).unwrap();

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(store.scan_keys("bench:data:*").unwrap()));
        });
    }
    group.finish();
}

/// Benchmark glob matching alone.
fn bench_glob(c: &mut Criterion) {
    let mut group = c.benchmark_group("glob_match");
    let key = "bench:idx:score:1234";
    for pattern in ["bench:*", "bench:idx:score:12?4", "bench:idx:[a-z]*:*"].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(pattern), pattern, |b, pattern| {
            b.iter(|| black_box(glob_match(black_box(pattern), black_box(key))));
        });
    }
    group.finish();
}

/// Benchmark RESP encoding and decoding.
fn bench_resp(c: &mut Criterion) {
    let mut group = c.benchmark_group("resp");

    let value = random_text(256);
    group.bench_function("encode_hset", |b| {
        let mut out = Vec::with_capacity(512);
        b.iter(|| {
            out.clear();
            encode_command(&["HSET", "bench:data:1", "name", value.as_str()], &mut out);
            black_box(&out);
        });
    });

    let mut reply = Vec::new();
    encode_command(&vec![value.as_str(); 100], &mut reply);
    group.throughput(Throughput::Bytes(reply.len() as u64));
    group.bench_function("decode_array", |b| {
        b.iter(|| {
            let mut reader = FrameReader::new(reply.as_slice());
            black_box(reader.read_frame().unwrap());
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_commit,
    bench_watched_unit,
    bench_scan,
    bench_glob,
    bench_resp,
);
criterion_main!(benches);
