//! Benchmarks for group aggregation, retry decisions and lease staleness.

use chrono::{Duration as ChronoDuration, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::time::Duration;
use tickerflow::core::{GroupResult, GroupStatus, StageResult};
use tickerflow::pipeline::RetryPolicy;
use tickerflow::queue::is_stale;

fn group_aggregation(c: &mut Criterion) {
    let now = Utc::now();
    let stages: Vec<StageResult> = (0..5)
        .map(|i| {
            if i % 2 == 0 {
                StageResult::ok(format!("part_{i:02}"), json!({"text": "ok"}), 1, now)
            } else {
                StageResult::failed(format!("part_{i:02}"), "timeout", 2, now)
            }
        })
        .collect();

    c.bench_function("group_status_from_counts", |b| {
        b.iter(|| GroupStatus::from_counts(black_box(3), black_box(2)));
    });

    c.bench_function("group_result_from_stage_results", |b| {
        b.iter(|| GroupResult::from_stage_results("fundamental", black_box(stages.clone()), 1));
    });
}

fn retry_decision(c: &mut Criterion) {
    let policy = RetryPolicy::group();
    c.bench_function("retry_decide_total_failure", |b| {
        b.iter(|| policy.decide(black_box(GroupStatus::TotalFailure), black_box(1)));
    });
}

fn lease_staleness(c: &mut Criterion) {
    let now = Utc::now();
    let acquired = now - ChronoDuration::seconds(30);
    let ttl = Duration::from_secs(60);
    c.bench_function("lease_is_stale", |b| {
        b.iter(|| is_stale(black_box(now), black_box(acquired), black_box(ttl)));
    });
}

criterion_group!(benches, group_aggregation, retry_decision, lease_staleness);
criterion_main!(benches);
