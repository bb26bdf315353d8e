//! Performance benchmarks for attend-engine

use attend_engine::{DeviceMeta, Ledger, LedgerSnapshot, RecordFilter, StateFilter};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn device() -> DeviceMeta {
    DeviceMeta::new("gate-01", "North Gate", "Building A")
}

fn filled_ledger(size: u64) -> Ledger {
    let mut ledger = Ledger::new(size as usize).unwrap();
    for i in 0..size {
        ledger
            .append(&format!("card-{:08}", i), 1706745600000 + i * 1000, device())
            .unwrap();
    }
    // Every other record delivered
    let synced: Vec<u64> = (1..=size).step_by(2).collect();
    ledger.mark_synced(&synced, 1706745600000);
    ledger
}

fn bench_ledger_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_operations");

    group.bench_function("append_under_capacity", |b| {
        let mut ledger = Ledger::new(usize::MAX).unwrap();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            ledger.append(black_box("04A1B2C3"), black_box(i), device())
        })
    });

    group.bench_function("append_with_eviction", |b| {
        let mut ledger = filled_ledger(10_000);
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            ledger.append(black_box("04A1B2C3"), black_box(i), device())
        })
    });

    for size in [100u64, 1_000, 10_000] {
        let ledger = filled_ledger(size);
        group.bench_with_input(BenchmarkId::new("list_unsynced_50", size), &ledger, |b, l| {
            b.iter(|| l.list_unsynced(black_box(50)))
        });
        group.bench_with_input(BenchmarkId::new("stats", size), &ledger, |b, l| {
            b.iter(|| l.stats())
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for size in [100u64, 1_000, 10_000] {
        let ledger = filled_ledger(size);
        let json = ledger.export_state().to_json().unwrap();

        group.bench_with_input(BenchmarkId::new("export_to_json", size), &ledger, |b, l| {
            b.iter(|| l.export_state().to_json().unwrap())
        });
        group.bench_with_input(BenchmarkId::new("restore_from_json", size), &json, |b, j| {
            b.iter(|| {
                let snapshot = LedgerSnapshot::from_json(black_box(j)).unwrap();
                Ledger::from_snapshot(snapshot, size as usize).unwrap()
            })
        });
    }

    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let ledger = filled_ledger(10_000);
    let filter = RecordFilter::default()
        .with_state(StateFilter::Unsynced)
        .with_search("card-0000");

    c.bench_function("query_filtered_page", |b| {
        b.iter(|| ledger.query(black_box(&filter)))
    });
}

criterion_group!(benches, bench_ledger_operations, bench_snapshot, bench_query);
criterion_main!(benches);
