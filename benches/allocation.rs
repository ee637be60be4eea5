//! Allocation benchmarks
//!
//! Toyota Way: Genchi Genbutsu (measure, don't guess)
//!
//! Measures the pure hash-and-bucket path, bulk assignment, and the full
//! engine path including the insert-if-absent participant write.
//!
//! Run with: cargo bench --bench allocation

use abtest_engine::allocator::{stable_hash64, TrafficAllocator};
use abtest_engine::experiment::{ExperimentRecord, VariantRecord};
use abtest_engine::Engine;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const BATCH_SIZES: [usize; 3] = [1_000, 10_000, 100_000];

fn variants(count: usize) -> Vec<VariantRecord> {
    (0..count)
        .map(|i| {
            let weight = u32::try_from(100 / count).unwrap_or(1).max(1);
            if i == 0 {
                VariantRecord::control(format!("v{i}"), "bench", format!("arm-{i}"), weight)
            } else {
                VariantRecord::new(format!("v{i}"), "bench", format!("arm-{i}"), weight)
            }
        })
        .collect()
}

/// Benchmark the stable hash alone
fn bench_stable_hash(c: &mut Criterion) {
    c.bench_function("stable_hash64", |b| {
        b.iter(|| stable_hash64(black_box(0), black_box("checkout-redesign:user-1234567")));
    });
}

/// Benchmark single assignment against growing variant counts
fn bench_assign(c: &mut Criterion) {
    let mut group = c.benchmark_group("assign");
    let allocator = TrafficAllocator::new();

    for count in [2, 4, 10] {
        let arms = variants(count);
        group.bench_with_input(BenchmarkId::new("variants", count), &arms, |b, arms| {
            b.iter(|| allocator.assign("bench", black_box("user-42"), arms, None));
        });
    }
    group.finish();
}

/// Benchmark bulk assignment (rayon when the feature is on)
fn bench_assign_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("assign_batch");
    let allocator = TrafficAllocator::new();
    let arms = variants(3);

    for size in BATCH_SIZES {
        let units: Vec<String> = (0..size).map(|i| format!("user-{i}")).collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &units, |b, units| {
            b.iter(|| allocator.assign_batch("bench", black_box(units), &arms));
        });
    }
    group.finish();
}

/// Benchmark the engine path: first allocation vs repeat lookup
fn bench_engine_allocate(c: &mut Criterion) {
    let engine = Engine::in_memory();
    engine
        .create_experiment(ExperimentRecord::new("bench", "Bench"), variants(2), vec![])
        .unwrap();
    engine.start("bench").unwrap();

    let mut group = c.benchmark_group("engine_allocate");
    let mut next = 0u64;
    group.bench_function("first_assignment", |b| {
        b.iter(|| {
            next += 1;
            engine.allocate("bench", &format!("new-user-{next}"), None)
        });
    });

    engine.allocate("bench", "returning-user", None).unwrap();
    group.bench_function("repeat_lookup", |b| {
        b.iter(|| engine.allocate("bench", black_box("returning-user"), None));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_stable_hash,
    bench_assign,
    bench_assign_batch,
    bench_engine_allocate
);
criterion_main!(benches);
