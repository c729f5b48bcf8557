//! Benchmarks for the reconciler and the scheduler queue.

use std::hint::black_box;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use trellis_core::reactive::{observe, Effect};
use trellis_core::reconcile::reconcile;
use trellis_core::scheduler::{self, Job};

fn keys(count: usize) -> Vec<String> {
    (0..count).map(|index| format!("row-{index}")).collect()
}

/// Deterministic Fisher-Yates driven by an xorshift generator.
fn shuffled(count: usize, mut seed: u64) -> Vec<String> {
    let mut items = keys(count);
    for index in (1..items.len()).rev() {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        items.swap(index, (seed as usize) % (index + 1));
    }
    items
}

/// Benchmark edit-script construction across reorder shapes.
fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile");

    for n in [10, 100, 1000] {
        let prev = keys(n);

        let next = shuffled(n, 0x5eed + n as u64);
        group.bench_with_input(BenchmarkId::new("shuffled", n), &n, |b, _| {
            b.iter(|| black_box(reconcile(&prev, &next)));
        });

        let grown = keys(n + n / 10 + 1);
        group.bench_with_input(BenchmarkId::new("append", n), &n, |b, _| {
            b.iter(|| black_box(reconcile(&prev, &grown)));
        });

        let mut reversed = keys(n);
        reversed.reverse();
        group.bench_with_input(BenchmarkId::new("reversal", n), &n, |b, _| {
            b.iter(|| black_box(reconcile(&prev, &reversed)));
        });
    }

    group.finish();
}

/// Benchmark queue throughput and the write-to-effect round trip.
fn bench_scheduler(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler");

    group.bench_function("queue_and_flush_1000", |b| {
        let counter = Arc::new(AtomicUsize::new(0));
        b.iter(|| {
            for _ in 0..1000 {
                let counter_clone = counter.clone();
                scheduler::queue_job(Job::new(move || {
                    counter_clone.fetch_add(1, Ordering::Relaxed);
                }));
            }
            scheduler::flush();
        });
        black_box(counter.load(Ordering::Relaxed));
    });

    group.bench_function("set_and_flush", |b| {
        let value = observe(0i64);
        let sink = Arc::new(AtomicUsize::new(0));

        let value_clone = value.clone();
        let sink_clone = sink.clone();
        let effect = Effect::new(move || {
            sink_clone.store(value_clone.get() as usize, Ordering::Relaxed);
        });

        let mut tick = 0i64;
        b.iter(|| {
            tick += 1;
            value.set(tick);
            scheduler::flush();
        });

        effect.kill();
        black_box(sink.load(Ordering::Relaxed));
    });

    group.finish();
}

criterion_group!(benches, bench_reconcile, bench_scheduler);
criterion_main!(benches);
