use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::black_box;
use criterion::criterion_group;
use criterion::criterion_main;

use frontline_limit::ConcurrencyGate;
use frontline_limit::Strategy;
use frontline_limit::TokenBucket;

fn bench_single_strategy<S: Strategy>(group_name: &str, c: &mut Criterion, strategy: Arc<S>) {
    let mut group = c.benchmark_group(group_name);

    group.bench_function("single-threaded", |b| {
        b.iter(|| {
            let _ = black_box(strategy.as_ref()).admit(Instant::now());
        })
    });

    group.finish();
}

fn bench_parallel_strategy<S: Strategy + Send + Sync + 'static>(
    group_name: &str,
    c: &mut Criterion,
    strategy: Arc<S>,
) {
    let mut group = c.benchmark_group(group_name);

    for threads in [2, 4, 8].iter() {
        let num_threads = *threads;
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}-threads", num_threads)),
            &num_threads,
            |b, &n| {
                b.iter_custom(|iters| {
                    let barrier = Arc::new(Barrier::new(n + 1));
                    let mut handles = Vec::with_capacity(n);

                    for _ in 0..n {
                        let s = Arc::clone(&strategy);
                        let bar = Arc::clone(&barrier);
                        let iters_per_thread = iters / n as u64;

                        handles.push(thread::spawn(move || {
                            bar.wait();
                            for _ in 0..iters_per_thread {
                                let _ = black_box(s.admit(Instant::now()));
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

fn bench_dynamic_strategy(
    group_name: &str,
    c: &mut Criterion,
    strategy: Arc<dyn Strategy + Send + Sync>,
) {
    let mut group = c.benchmark_group(format!("Dynamic-{}", group_name));

    group.bench_function("single-threaded", |b| {
        b.iter(|| {
            let _ = black_box(strategy.as_ref()).admit(Instant::now());
        })
    });

    group.finish();
}

fn bench_gate(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let gate = ConcurrencyGate::new(NonZeroUsize::new(5).unwrap());

    let mut group = c.benchmark_group("ConcurrencyGate");
    group.bench_function("acquire-release", |b| {
        b.to_async(&rt).iter(|| {
            let gate = gate.clone();
            async move {
                let permit = gate.acquire().await;
                black_box(permit)
            }
        })
    });
    group.finish();
}

fn run_all_benches(c: &mut Criterion) {
    // Large enough that the bucket never runs dry during a run, so the
    // numbers measure the critical section rather than reservations.
    let limit = NonZeroUsize::new(usize::MAX >> 12).unwrap();
    let window = Duration::from_secs(60);

    let tb = Arc::new(TokenBucket::new(limit, window));
    bench_single_strategy("TokenBucket-Static", c, Arc::clone(&tb));
    bench_parallel_strategy("TokenBucket-Static", c, tb.clone());
    bench_dynamic_strategy("TokenBucket", c, tb);

    // The production default, driven into reservations.
    let dry = Arc::new(TokenBucket::new(NonZeroUsize::new(300).unwrap(), window));
    bench_single_strategy("TokenBucket-Reserving", c, dry);

    bench_gate(c);
}

criterion_group!(benches, run_all_benches);
criterion_main!(benches);
