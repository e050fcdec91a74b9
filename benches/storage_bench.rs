//! Benchmarks for SpruceDB storage operations

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sprucedb::config::{Config, WalSyncStrategy};
use sprucedb::Engine;
use tempfile::TempDir;

fn bench_engine(sync: WalSyncStrategy) -> (TempDir, Engine) {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp.path())
        .wal_sync_strategy(sync)
        .build();
    let engine = Engine::open(config).unwrap();
    (temp, engine)
}

fn storage_benchmarks(c: &mut Criterion) {
    // Sequential write throughput (batched WAL syncs)
    let (_temp, engine) = bench_engine(WalSyncStrategy::EveryNEntries { count: 1000 });
    let mut i = 0u64;
    c.bench_function("put_sequential", |b| {
        b.iter(|| {
            let key = format!("key{:012}", i);
            i += 1;
            engine.put(key.as_bytes(), b"benchmark-value-payload").unwrap();
        })
    });

    // Point reads from the memtable
    let (_temp, engine) = bench_engine(WalSyncStrategy::EveryNEntries { count: 1000 });
    for j in 0..10_000u64 {
        engine.put(format!("key{:06}", j).as_bytes(), b"benchmark-value-payload").unwrap();
    }
    let mut j = 0u64;
    c.bench_function("get_memtable_hit", |b| {
        b.iter(|| {
            let key = format!("key{:06}", j % 10_000);
            j += 1;
            black_box(engine.get(key.as_bytes()).unwrap());
        })
    });

    // Point reads from segments (memtable flushed)
    let (_temp, engine) = bench_engine(WalSyncStrategy::EveryNEntries { count: 1000 });
    for j in 0..10_000u64 {
        engine.put(format!("key{:06}", j).as_bytes(), b"benchmark-value-payload").unwrap();
    }
    engine.flush().unwrap();
    let mut j = 0u64;
    c.bench_function("get_segment_hit", |b| {
        b.iter(|| {
            let key = format!("key{:06}", j % 10_000);
            j += 1;
            black_box(engine.get(key.as_bytes()).unwrap());
        })
    });

    // Misses short-circuited by the bloom filter
    let mut j = 0u64;
    c.bench_function("get_segment_miss", |b| {
        b.iter(|| {
            let key = format!("absent{:06}", j);
            j += 1;
            black_box(engine.get(key.as_bytes()).unwrap());
        })
    });

    // Full-range scan over a flushed dataset
    c.bench_function("scan_full_range_10k", |b| {
        b.iter(|| {
            let count = engine.scan(None, None).unwrap().count();
            black_box(count);
        })
    });
}

criterion_group!(benches, storage_benchmarks);
criterion_main!(benches);
