//! Performance benchmarks for the Chronos engine

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

use chronos_engine::{
    analyzer::evaluate,
    engine::Engine,
    registry::{Threshold, ThresholdFlags},
    ring::CAPACITY,
};

/// A full ring of slowly rising samples
fn create_benchmark_buffer() -> Vec<f64> {
    (0..CAPACITY).map(|i| 100.0 + (i as f64 * 0.37).sin() * 10.0 + i as f64).collect()
}

/// A stats record with `count` stats
fn create_benchmark_record(count: usize) -> BTreeMap<String, f64> {
    (0..count).map(|i| (format!("stat_{i:03}"), i as f64)).collect()
}

/// Benchmark threshold evaluation of a full ring
fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate");
    let values = create_benchmark_buffer();

    let cases = [
        ("bounds", Threshold::new(50.0, 350.0, f64::NAN, 1)),
        ("sudden_change", Threshold::new(f64::NAN, f64::NAN, 0.01, 10)),
        ("all", Threshold::new(50.0, 350.0, 0.01, 10)),
    ];
    for (name, threshold) in cases {
        group.bench_with_input(BenchmarkId::new("predicates", name), &threshold, |b, threshold| {
            b.iter(|| evaluate(black_box(&values), black_box(threshold)))
        });
    }

    group.finish();
}

/// Benchmark appending records to a node's rings
fn bench_append_record(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("append_record");

    for stats in &[10, 100, 500] {
        group.throughput(Throughput::Elements(*stats as u64));

        group.bench_with_input(BenchmarkId::new("stats", stats), stats, |b, &stats| {
            let record = create_benchmark_record(stats);
            let engine = rt.block_on(async {
                let engine = Engine::new(ThresholdFlags::default());
                engine.add_node("http://bench:8094").await;
                engine.promote_once("http://bench:8094", &record).await.unwrap();
                engine
            });
            let start = Utc::now();
            let engine = &engine;
            let record = &record;
            let mut tick = 0i64;

            b.to_async(&rt).iter(move || {
                tick += 1;
                let now = start + Duration::seconds(tick);
                async move {
                    let mut carry = 0.0;
                    black_box(engine.append_record("http://bench:8094", now, record, &mut carry).await.unwrap())
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_evaluate, bench_append_record);
criterion_main!(benches);
