//! Handle lifecycle and ledger benchmarks using criterion.
//!
//! Run with: cargo bench --bench handle_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use strand::{ledger, make_strong, Strong};

fn bench_handle_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("handle_lifecycle");

    group.bench_function("make_drop", |b| {
        b.iter(|| {
            black_box(make_strong(42u64))
        });
    });

    group.bench_function("clone_drop", |b| {
        let root = make_strong(42u64);
        b.iter(|| {
            black_box(root.clone())
        });
    });

    group.bench_function("downgrade_drop", |b| {
        let root = make_strong(42u64);
        b.iter(|| {
            black_box(root.downgrade())
        });
    });

    group.bench_function("deref_read", |b| {
        let root = make_strong(42u64);
        b.iter(|| {
            black_box(*root)
        });
    });

    // Batch cloning
    for count in [10, 100] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(
            BenchmarkId::new("clone_batch", count),
            &count,
            |b, &count| {
                let root = make_strong(0u64);
                b.iter(|| {
                    let family: Vec<Strong<u64>> = (0..count).map(|_| root.clone()).collect();
                    black_box(family)
                });
            },
        );
    }

    group.finish();
}

fn bench_weak_lock(c: &mut Criterion) {
    let mut group = c.benchmark_group("weak_lock");

    group.bench_function("lock_live", |b| {
        let root = make_strong(7u32);
        let weak = root.downgrade();
        b.iter(|| {
            black_box(weak.lock())
        });
    });

    group.bench_function("lock_dead", |b| {
        let weak = {
            let root = make_strong(7u32);
            root.downgrade()
        };
        b.iter(|| {
            black_box(weak.lock())
        });
    });

    group.bench_function("expired_check", |b| {
        let root = make_strong(7u32);
        let weak = root.downgrade();
        b.iter(|| {
            black_box(weak.expired())
        });
    });

    group.finish();
}

fn bench_cast(c: &mut Criterion) {
    let mut group = c.benchmark_group("cast");

    group.bench_function("cast_hit", |b| {
        let root = make_strong(7u32);
        b.iter(|| {
            black_box(root.cast::<u32>())
        });
    });

    group.bench_function("cast_miss", |b| {
        let root = make_strong(7u32);
        b.iter(|| {
            black_box(root.cast::<u64>())
        });
    });

    group.finish();
}

fn bench_ledger_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_overhead");

    // Allocation cost with the ledger off (the default) and on.
    group.bench_function("make_drop_untracked", |b| {
        ledger::set_tracking(false);
        b.iter(|| {
            black_box(make_strong([0u8; 64]))
        });
    });

    group.bench_function("make_drop_tracked", |b| {
        ledger::set_tracking(true);
        b.iter(|| {
            black_box(make_strong([0u8; 64]))
        });
        ledger::set_tracking(false);
        ledger::clear();
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_handle_lifecycle,
    bench_weak_lock,
    bench_cast,
    bench_ledger_overhead,
);
criterion_main!(benches);
