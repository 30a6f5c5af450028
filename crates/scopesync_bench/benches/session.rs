//! Full session benchmarks between in-memory stores.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use scopesync_bench::{bench_row, bench_setup};
use scopesync_engine::{CancellationToken, LocalOrchestrator, RemoteOrchestrator, SyncOptions};
use scopesync_protocol::SyncParameters;
use scopesync_store::MemoryStore;
use std::sync::Arc;

/// A server and a client holding `count` unsynced rows.
fn prepare(count: i64, options: &SyncOptions) -> (RemoteOrchestrator, LocalOrchestrator) {
    let setup = bench_setup().unwrap();
    let server = Arc::new(MemoryStore::with_setup(&setup));
    let client = Arc::new(MemoryStore::with_setup(&setup));
    for id in 0..count {
        client.insert_local("item", bench_row(id, 64)).unwrap();
    }
    (
        RemoteOrchestrator::new(server, setup.clone(), options.clone()),
        LocalOrchestrator::new(client, setup, options.clone()),
    )
}

fn bench_first_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("first_sync");
    group.sample_size(20);
    let options = SyncOptions::default();

    for count in [100, 1_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(BenchmarkId::from_parameter(count), |b| {
            b.iter_batched(
                || prepare(count, &options),
                |(server, client)| {
                    let cancel = CancellationToken::new();
                    client
                        .synchronize("default", &SyncParameters::new(), &server, &cancel, &|_| {})
                        .unwrap()
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn bench_idle_sync(c: &mut Criterion) {
    let options = SyncOptions::default();
    let (server, client) = prepare(1_000, &options);
    let cancel = CancellationToken::new();
    client
        .synchronize("default", &SyncParameters::new(), &server, &cancel, &|_| {})
        .unwrap();

    c.bench_function("idle_sync_1000", |b| {
        b.iter(|| {
            client
                .synchronize("default", &SyncParameters::new(), &server, &cancel, &|_| {})
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_first_sync, bench_idle_sync);
criterion_main!(benches);
