// Benchmarks for the in-process locker
// Measures uncontended lock/release, try_lock on a held key and contended handoff

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use globallock_core::{LeasedLocker, LockContext, Locker, MemoryLeaseStore, MemoryLocker};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn bench_lock_release_uncontended(c: &mut Criterion) {
    let rt = runtime();
    let locker = MemoryLocker::new();
    let ctx = LockContext::background();

    c.bench_function("memory_lock_release", |b| {
        b.to_async(&rt).iter(|| async {
            let handle = locker.lock(&ctx, "bench").await.unwrap();
            black_box(handle.release().await);
        })
    });
}

fn bench_try_lock_busy(c: &mut Criterion) {
    let rt = runtime();
    let locker = MemoryLocker::new();
    let ctx = LockContext::background();
    let _held = rt.block_on(locker.lock(&ctx, "bench")).unwrap();

    c.bench_function("memory_try_lock_busy", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(locker.try_lock(&ctx, "bench").await.unwrap()) })
    });
}

fn bench_distinct_keys(c: &mut Criterion) {
    let rt = runtime();
    let locker = MemoryLocker::new();
    let ctx = LockContext::background();
    let keys: Vec<String> = (0..1024).map(|i| format!("key-{i}")).collect();
    let mut next = 0usize;

    c.bench_function("memory_lock_release_distinct_keys", |b| {
        b.to_async(&rt).iter(|| {
            next = (next + 1) % keys.len();
            let key = &keys[next];
            let locker = &locker;
            let ctx = &ctx;
            async move {
                let handle = locker.lock(ctx, key).await.unwrap();
                handle.release().await;
            }
        })
    });
}

fn bench_contended(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("memory_lock_contended");

    for tasks in [2usize, 8, 32] {
        let locker = Arc::new(MemoryLocker::new());
        group.bench_with_input(BenchmarkId::from_parameter(tasks), &tasks, |b, &tasks| {
            b.to_async(&rt).iter(|| {
                let locker = locker.clone();
                async move {
                    let mut joins = Vec::with_capacity(tasks);
                    for _ in 0..tasks {
                        let locker = locker.clone();
                        joins.push(tokio::spawn(async move {
                            let handle = locker
                                .lock(&LockContext::background(), "shared")
                                .await
                                .unwrap();
                            handle.release().await;
                        }));
                    }
                    for join in joins {
                        join.await.unwrap();
                    }
                }
            })
        });
    }

    group.finish();
}

fn bench_leased_on_memory_store(c: &mut Criterion) {
    let rt = runtime();
    let locker = LeasedLocker::new(Arc::new(MemoryLeaseStore::new()));
    let ctx = LockContext::background();

    c.bench_function("leased_memory_store_lock_release", |b| {
        b.to_async(&rt).iter(|| async {
            let handle = locker.lock(&ctx, "bench").await.unwrap();
            black_box(handle.release().await);
        })
    });
}

criterion_group!(
    benches,
    bench_lock_release_uncontended,
    bench_try_lock_busy,
    bench_distinct_keys,
    bench_contended,
    bench_leased_on_memory_store,
);
criterion_main!(benches);
