//! Segment regression detection benchmark
//!
//! One decision cycle scans every candidate segment column, runs a Welch
//! test per segment value and applies one Benjamini–Hochberg correction
//! across the whole table.
//!
//! # Run Instructions
//!
//! ```bash
//! cargo bench --bench segment_detection
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rollout_guard::config::GuardConfig;
use rollout_guard::effect::estimate;
use rollout_guard::pipeline::evaluate;
use rollout_guard::regression::{benjamini_hochberg, candidate_columns, detect, SegmentConfig};
use rollout_guard::simulate::{simulate_ledger, Scenario};

fn bench_detect(c: &mut Criterion) {
    let config = SegmentConfig::default();
    let mut group = c.benchmark_group("segment_detect");

    for size in [2_000usize, 20_000, 100_000] {
        let records = simulate_ledger(Scenario::SegmentRegression, size, 7, "fraud-exp-v1", 0.10);
        let columns = candidate_columns(&records, &config);
        group.bench_with_input(BenchmarkId::from_parameter(size), &records, |b, records| {
            b.iter(|| detect(black_box(records), &columns, &config))
        });
    }

    group.finish();
}

fn bench_effect_estimate(c: &mut Criterion) {
    let records = simulate_ledger(Scenario::Go, 100_000, 7, "fraud-exp-v1", 0.10);

    c.bench_function("effect_estimate_100k", |b| {
        b.iter(|| estimate(black_box(&records)))
    });
}

fn bench_benjamini_hochberg(c: &mut Criterion) {
    let p_values: Vec<f64> = (1..=240).map(|i| (i as f64 / 241.0).powi(2)).collect();

    c.bench_function("benjamini_hochberg_240", |b| {
        b.iter(|| benjamini_hochberg(black_box(&p_values), 0.10))
    });
}

fn bench_full_evaluation(c: &mut Criterion) {
    let config = GuardConfig::default();
    let records = simulate_ledger(Scenario::Go, 20_000, 7, &config.experiment_salt, 0.10);

    c.bench_function("cycle_evaluate_20k", |b| {
        b.iter(|| evaluate(black_box(&records), &config).decision)
    });
}

criterion_group!(
    benches,
    bench_detect,
    bench_effect_estimate,
    bench_benjamini_hochberg,
    bench_full_evaluation
);
criterion_main!(benches);
