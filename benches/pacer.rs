//! # Pacer Benchmarks
//!
//! Performance benchmarks for the admission path.
//!
//! Run with: `cargo bench`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pacer::{ChannelPacerManager, Pacer, PacerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

/// Benchmark the uncontended non-blocking admission path.
///
/// The rate is set high enough that refill keeps pace with the bench
/// loop, so this measures the lock-plus-arithmetic cost of a check.
fn bench_check_nonblocking(c: &mut Criterion) {
    let mut group = c.benchmark_group("check_nonblocking");

    for payload in [64u32, 512, 1400] {
        group.throughput(Throughput::Bytes(payload as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(payload),
            &payload,
            |b, &payload| {
                let pacer = Pacer::new(u32::MAX, 28, 1500);
                b.iter(|| std::hint::black_box(pacer.check(payload, true)));
            },
        );
    }

    group.finish();
}

/// Benchmark the disabled fast path, which takes no lock at all.
fn bench_check_disabled(c: &mut Criterion) {
    let pacer = Pacer::new(0, 0, 0);

    c.bench_function("check_disabled", |b| {
        b.iter(|| std::hint::black_box(pacer.check(1400, true)));
    });
}

/// Benchmark the read-only scheduling probe.
fn bench_remaining(c: &mut Criterion) {
    let pacer = Pacer::new(100_000, 28, 1500);

    c.bench_function("remaining", |b| {
        b.iter(|| std::hint::black_box(pacer.remaining(1400)));
    });
}

/// Benchmark checks under cross-thread contention on one bucket.
fn bench_check_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("check_contended");
    group.sample_size(10);

    for threads in [2usize, 4] {
        group.bench_with_input(
            BenchmarkId::from_parameter(threads),
            &threads,
            |b, &threads| {
                b.iter(|| {
                    let pacer = Arc::new(Pacer::new(u32::MAX, 28, 1500));
                    let handles: Vec<_> = (0..threads)
                        .map(|_| {
                            let pacer = pacer.clone();
                            thread::spawn(move || {
                                for _ in 0..1_000 {
                                    std::hint::black_box(pacer.check(512, true));
                                }
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

/// Benchmark the manager's get-or-check path against a warm channel.
fn bench_manager_check(c: &mut Criterion) {
    let manager = ChannelPacerManager::new(PacerConfig::new(u32::MAX, 28, 1500));
    let addr: SocketAddr = "239.192.0.1:7500".parse().unwrap();
    manager.check(addr, 512, true);

    c.bench_function("manager_check_warm", |b| {
        b.iter(|| std::hint::black_box(manager.check(addr, 512, true)));
    });
}

criterion_group!(
    benches,
    bench_check_nonblocking,
    bench_check_disabled,
    bench_remaining,
    bench_check_contended,
    bench_manager_check
);
criterion_main!(benches);
