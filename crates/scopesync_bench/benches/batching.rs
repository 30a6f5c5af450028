//! Batch accumulation benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use scopesync_bench::generate_rows;
use scopesync_codec::CodecKind;
use scopesync_engine::BatchAccumulator;
use tempfile::TempDir;
use uuid::Uuid;

/// Benchmark resident accumulation.
fn bench_unbounded(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_unbounded");

    for count in [100, 1_000, 10_000] {
        let rows = generate_rows(count, 64);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &rows, |b, rows| {
            b.iter(|| {
                let mut acc = BatchAccumulator::unbounded(Uuid::new_v4(), CodecKind::Cbor);
                acc.add_rows("item", rows.iter().cloned()).unwrap();
                black_box(acc.finalize().unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark spooling to disk with both codecs.
fn bench_spooled(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_spooled");
    group.sample_size(20);
    let rows = generate_rows(2_000, 256);
    let root = TempDir::new().unwrap();

    for codec in [CodecKind::Cbor, CodecKind::Json] {
        for budget in [16 * 1024, 128 * 1024] {
            let id = format!("{}_{}k", codec.name(), budget / 1024);
            group.throughput(Throughput::Elements(rows.len() as u64));
            group.bench_function(BenchmarkId::from_parameter(id), |b| {
                b.iter(|| {
                    let mut acc =
                        BatchAccumulator::spooled(Uuid::new_v4(), codec, budget, root.path());
                    acc.add_rows("item", rows.iter().cloned()).unwrap();
                    let batch = acc.finalize().unwrap();
                    black_box(batch.row_count());
                    batch.cleanup().unwrap();
                });
            });
        }
    }

    group.finish();
}

/// Benchmark reading spooled parts back.
fn bench_read_parts(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_read");
    let rows = generate_rows(2_000, 256);
    let root = TempDir::new().unwrap();

    for codec in [CodecKind::Cbor, CodecKind::Json] {
        let mut acc = BatchAccumulator::spooled(Uuid::new_v4(), codec, 64 * 1024, root.path());
        acc.add_rows("item", rows.iter().cloned()).unwrap();
        let batch = acc.finalize().unwrap();

        group.throughput(Throughput::Elements(rows.len() as u64));
        group.bench_function(codec.name(), |b| {
            b.iter(|| {
                for part in batch.parts() {
                    black_box(part.unwrap());
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_unbounded, bench_spooled, bench_read_parts);
criterion_main!(benches);
