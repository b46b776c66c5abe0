//! Conflict resolution benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dashpulse_core::{ConflictResolver, DataUpdate, FilterSet, ReconciledState};
use dashpulse_protocol::{DashboardType, DataMap};
use serde_json::json;

fn update(points: usize, timestamp: u64) -> DataUpdate {
    let mut data = DataMap::new();
    data.insert(
        "series".to_string(),
        json!((0..points).map(|i| json!({"t": i, "v": i})).collect::<Vec<_>>()),
    );
    data.insert("kpis".to_string(), json!({"revenue": 10.0, "orders": points}));
    DataUpdate::new(DashboardType::Executive, FilterSet::empty(), data, timestamp)
}

fn held(points: usize) -> ReconciledState {
    ConflictResolver::default().resolve(&update(points, 100), None).state
}

/// Steady-state replacement, no conflicts.
fn bench_apply(c: &mut Criterion) {
    let resolver = ConflictResolver::default();
    let mut group = c.benchmark_group("resolve_apply");
    for points in [10, 100, 1000] {
        let state = held(points);
        let incoming = update(points, 200);
        group.bench_with_input(BenchmarkId::from_parameter(points), &points, |b, _| {
            b.iter(|| resolver.resolve(black_box(&incoming), Some(black_box(&state))))
        });
    }
    group.finish();
}

/// Truncated payload, forcing the union merge.
fn bench_merge(c: &mut Criterion) {
    let resolver = ConflictResolver::default();
    let mut group = c.benchmark_group("resolve_merge");
    for points in [10, 100, 1000] {
        let state = held(points);
        let incoming = update(points / 10, 200);
        group.bench_with_input(BenchmarkId::from_parameter(points), &points, |b, _| {
            b.iter(|| resolver.resolve(black_box(&incoming), Some(black_box(&state))))
        });
    }
    group.finish();
}

/// Stale update, discarded before any value work.
fn bench_stale(c: &mut Criterion) {
    let resolver = ConflictResolver::default();
    let state = held(100);
    let incoming = update(100, 50);
    c.bench_function("resolve_stale", |b| {
        b.iter(|| resolver.resolve(black_box(&incoming), Some(black_box(&state))))
    });
}

criterion_group!(benches, bench_apply, bench_merge, bench_stale);
criterion_main!(benches);
