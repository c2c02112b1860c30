// Benchmark to measure metrics overhead per round
// Compare aggregation cost with metrics enabled vs disabled

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use healthcheck::{CheckResult, HealthTracker, Protocol, ThresholdPolicy};
use healthwatch::metrics::MetricsRegistry;
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

fn round(ids: &[String]) -> Vec<CheckResult> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| {
            if i % 4 == 0 {
                CheckResult::timeout(id, Duration::from_secs(5))
            } else {
                CheckResult::success(id, Duration::from_millis(8)).with_status_code(200)
            }
        })
        .collect()
}

/// Same recording pattern as the scheduler's aggregation step
fn record(metrics: &Option<Arc<MetricsRegistry>>, tracker: &HealthTracker, results: &[CheckResult]) {
    if let Some(m) = metrics {
        for result in results {
            m.record_check(Protocol::Http, result);
            if let Some(state) = tracker.state(&result.endpoint) {
                m.update_endpoint(Protocol::Http, state);
            }
        }
        m.update_counts(tracker.counts());
        m.record_round(Duration::from_millis(12));
    }
}

fn bench_metrics_recording(c: &mut Criterion) {
    let mut group = c.benchmark_group("metrics_recording");
    let ids: Vec<String> = (0..100).map(|i| format!("10.0.0.{i}:8080")).collect();
    let results = round(&ids);
    let mut tracker = HealthTracker::new(ids.iter().cloned(), ThresholdPolicy::default());
    tracker.update(&results);

    group.bench_function("disabled", |b| {
        let metrics: Option<Arc<MetricsRegistry>> = None;
        b.iter(|| record(black_box(&metrics), &tracker, black_box(&results)));
    });

    group.bench_function("enabled", |b| {
        let metrics = Some(Arc::new(MetricsRegistry::new()));
        b.iter(|| record(black_box(&metrics), &tracker, black_box(&results)));
    });

    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for count in [10usize, 100, 1000] {
        let ids: Vec<String> = (0..count).map(|i| format!("10.0.{}.{}:80", i / 256, i % 256)).collect();
        let results = round(&ids);
        let mut tracker = HealthTracker::new(ids.iter().cloned(), ThresholdPolicy::default());
        tracker.update(&results);

        let registry = Arc::new(MetricsRegistry::new());
        record(&Some(registry.clone()), &tracker, &results);

        group.bench_with_input(BenchmarkId::from_parameter(count), &registry, |b, registry| {
            b.iter(|| black_box(registry.encode()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_metrics_recording, bench_encode);
criterion_main!(benches);
