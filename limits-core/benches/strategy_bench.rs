use std::hint::black_box;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use limits_core::limit::{Granularity, RateLimitItem};
use limits_core::storage::memory::MemoryStorage;
use limits_core::strategies::{FixedWindow, MovingWindow, RateLimitingStrategy, SlidingWindowCounter};

fn bench_single_threaded<S: RateLimitingStrategy>(
    group_name: &str,
    c: &mut Criterion,
    strategy: &S,
    limit: &RateLimitItem,
) {
    let mut group = c.benchmark_group(group_name);
    group.bench_function("single-threaded", |b| {
        b.iter(|| {
            let _ = black_box(strategy.hit(limit, &["bench"], 1));
        })
    });
    group.finish();
}

fn bench_parallel<S: RateLimitingStrategy + 'static>(
    group_name: &str,
    c: &mut Criterion,
    strategy: Arc<S>,
    limit: Arc<RateLimitItem>,
) {
    let mut group = c.benchmark_group(group_name);

    for threads in [2, 4, 8] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{threads}-threads")),
            &threads,
            |b, &n| {
                b.iter_custom(|iters| {
                    let barrier = Arc::new(Barrier::new(n + 1));
                    let mut handles = Vec::with_capacity(n);

                    for t in 0..n {
                        let s = Arc::clone(&strategy);
                        let l = Arc::clone(&limit);
                        let bar = Arc::clone(&barrier);
                        let iters_per_thread = iters / n as u64;

                        handles.push(thread::spawn(move || {
                            let id = format!("thread-{t}");
                            bar.wait();
                            for _ in 0..iters_per_thread {
                                let _ = black_box(s.hit(&l, &[id.as_str()], 1));
                            }
                        }));
                    }

                    barrier.wait();
                    let start = Instant::now();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    start.elapsed()
                });
            },
        );
    }
    group.finish();
}

fn run_all_benches(c: &mut Criterion) {
    let limit = RateLimitItem::new(1_000_000, 1, Granularity::Minute);

    let fixed = FixedWindow::new(Arc::new(MemoryStorage::new()));
    bench_single_threaded("FixedWindow", c, &fixed, &limit);

    let moving = MovingWindow::new(Arc::new(MemoryStorage::new())).unwrap();
    bench_single_threaded("MovingWindow", c, &moving, &limit);

    let sliding = SlidingWindowCounter::new(Arc::new(MemoryStorage::new())).unwrap();
    bench_single_threaded("SlidingWindowCounter", c, &sliding, &limit);

    bench_parallel(
        "FixedWindow-parallel",
        c,
        Arc::new(FixedWindow::new(Arc::new(MemoryStorage::new()))),
        Arc::new(RateLimitItem::new(1_000_000, 1, Granularity::Minute)),
    );
}

criterion_group!(benches, run_all_benches);
criterion_main!(benches);
