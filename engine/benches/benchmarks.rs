//! Performance benchmarks for attrsync-engine

use attrsync_engine::{
    ExpectationCache, MemoryDirectory, MemoryGroups, MemoryRemote, PairConfig, Someone,
    SyncConfig, SyncEngine,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn bench_expectations(c: &mut Criterion) {
    let mut group = c.benchmark_group("expectations");

    group.bench_function("record_consume", |b| {
        let cache = ExpectationCache::new(Duration::from_secs(30));
        let mut who = 0u64;
        b.iter(|| {
            who += 1;
            cache.record(who, 1234u64, true);
            cache.check_and_consume(black_box(&who), black_box(&1234), true)
        })
    });

    group.bench_function("miss", |b| {
        let cache: ExpectationCache<u64, u64> = ExpectationCache::new(Duration::from_secs(30));
        cache.record(1, 1234, true);
        b.iter(|| cache.check_and_consume(black_box(&2), black_box(&1234), true))
    });

    group.finish();
}

fn engine_with_pairs(size: u64) -> (SyncEngine, Uuid) {
    let attributes: Vec<u64> = (1..=size).collect();
    let names: Vec<String> = (1..=size).map(|i| format!("group_{}", i)).collect();
    let pairs = attributes
        .iter()
        .zip(&names)
        .map(|(attribute, name)| PairConfig::new(*attribute, name.clone()))
        .collect();

    let remote = Arc::new(MemoryRemote::new(attributes));
    let groups = Arc::new(MemoryGroups::new(names));
    let directory = Arc::new(MemoryDirectory::new());
    let local = Uuid::new_v4();
    directory.link(1, local);

    let engine = SyncEngine::new(
        SyncConfig::new(pairs),
        remote,
        Some(groups.into_local_side()),
        directory,
    )
    .unwrap();
    (engine, local)
}

fn bench_resync(c: &mut Criterion) {
    let mut group = c.benchmark_group("resync");
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for size in [1u64, 10, 50].iter() {
        group.bench_with_input(BenchmarkId::new("matched_pairs", size), size, |b, &size| {
            let (engine, local) = engine_with_pairs(size);
            b.to_async(&runtime)
                .iter(|| engine.resync(black_box(Someone::local(local))))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_expectations, bench_resync);
criterion_main!(benches);
