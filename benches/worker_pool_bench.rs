//! Criterion benchmarks for the worker pool
//!
//! Run with: cargo bench --bench worker_pool_bench

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use avpipe::{ShutdownMode, WorkerPool};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const TASKS: u64 = 10_000;

fn submit_all(pool: &WorkerPool, counter: &Arc<AtomicU64>) {
    for i in 0..TASKS {
        loop {
            let counter = Arc::clone(counter);
            match pool.execute(move || {
                counter.fetch_add(black_box(i) & 1, Ordering::Relaxed);
            }) {
                Ok(()) => break,
                Err(e) if e.is_transient() => std::thread::yield_now(),
                Err(e) => panic!("submit failed: {}", e),
            }
        }
    }
}

fn bench_submit_execute(c: &mut Criterion) {
    let mut group = c.benchmark_group("worker_pool");
    group.throughput(Throughput::Elements(TASKS));
    group.sample_size(20);

    for threads in [1usize, 4, 8].iter() {
        group.bench_with_input(
            BenchmarkId::new("submit_drain", threads),
            threads,
            |b, &threads| {
                b.iter(|| {
                    let pool = WorkerPool::new(threads, 64).unwrap();
                    let counter = Arc::new(AtomicU64::new(0));
                    submit_all(&pool, &counter);
                    pool.shutdown(ShutdownMode::Leisurely).unwrap();
                    black_box(counter.load(Ordering::Relaxed))
                });
            },
        );
    }

    group.finish();
}

fn bench_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("lifecycle");

    group.bench_function("create_shutdown_4", |b| {
        b.iter(|| {
            let pool = WorkerPool::new(4, 16).unwrap();
            pool.shutdown(ShutdownMode::Immediate).unwrap();
            pool.destroy().unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_submit_execute, bench_lifecycle);
criterion_main!(benches);
