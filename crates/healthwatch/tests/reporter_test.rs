//! Integration tests for the round log and status snapshot

use healthcheck::{CheckResult, Classification, Endpoint, HealthTracker, Outcome, ThresholdPolicy};
use healthwatch::reporter::{Reporter, ReportingError, RoundLogEntry};
use std::time::Duration;

fn endpoints() -> Vec<Endpoint> {
    ["localhost:3000", "tcp://db:5432"]
        .iter()
        .map(|raw| Endpoint::parse(raw, Duration::from_secs(5)).unwrap())
        .collect()
}

fn tracker(endpoints: &[Endpoint]) -> HealthTracker {
    HealthTracker::new(endpoints.iter().map(|e| e.id.clone()), ThresholdPolicy::default())
}

fn mixed_round() -> Vec<CheckResult> {
    vec![
        CheckResult::failure("localhost:3000", Duration::from_millis(30), "HTTP 500").with_status_code(500),
        CheckResult::skipped("tcp://db:5432", "previous probe still in flight"),
    ]
}

#[test]
fn test_lines_are_appended_per_round() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("health-check.log");
    let endpoints = endpoints();
    let mut tracker = tracker(&endpoints);
    let mut reporter = Reporter::new(&path, &endpoints);

    for round in 1..=3 {
        let results = mixed_round();
        tracker.update(&results);
        reporter.record(round, &results, &endpoints, &tracker).unwrap();
    }

    let entries: Vec<RoundLogEntry> = std::fs::read_to_string(&path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(entries.len(), 6);
    assert_eq!(entries.iter().map(|e| e.round).collect::<Vec<_>>(), vec![1, 1, 2, 2, 3, 3]);

    let web = &entries[4];
    assert_eq!(web.endpoint, "localhost:3000");
    assert_eq!(web.outcome, Outcome::Failure);
    assert_eq!(web.status_code, Some(500));
    assert_eq!(web.error.as_deref(), Some("HTTP 500"));
    assert_eq!(web.classification, Classification::Unhealthy);

    let db = &entries[5];
    assert_eq!(db.outcome, Outcome::Skipped);
    assert_eq!(db.latency_ms, 0);
    assert_eq!(db.classification, Classification::Unknown);
}

#[test]
fn test_existing_log_is_appended_not_truncated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("health-check.log");
    std::fs::write(&path, "previous run\n").unwrap();

    let endpoints = endpoints();
    let tracker = tracker(&endpoints);
    let mut reporter = Reporter::new(&path, &endpoints);
    reporter.record(1, &mixed_round(), &endpoints, &tracker).unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.starts_with("previous run\n"));
    assert_eq!(contents.lines().count(), 3);
}

#[test]
fn test_write_failure_still_publishes_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    // A directory where the log file should be makes the open fail
    let path = dir.path().join("health-check.log");
    std::fs::create_dir(&path).unwrap();

    let endpoints = endpoints();
    let mut tracker = tracker(&endpoints);
    let mut reporter = Reporter::new(&path, &endpoints);
    let status = reporter.handle();

    let results = mixed_round();
    tracker.update(&results);
    let err = reporter.record(1, &results, &endpoints, &tracker).unwrap_err();
    assert!(matches!(err, ReportingError::Open { .. }));

    let snapshot = status.snapshot();
    assert_eq!(snapshot.round, 1);
    assert_eq!(
        snapshot.endpoint("localhost:3000").unwrap().consecutive_failures,
        1
    );

    // Reopened on the next round once the path is usable
    std::fs::remove_dir(&path).unwrap();
    tracker.update(&results);
    reporter.record(2, &results, &endpoints, &tracker).unwrap();

    assert_eq!(status.snapshot().round, 2);
    assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
}

#[test]
fn test_snapshot_reader_keeps_previous_round() {
    let dir = tempfile::tempdir().unwrap();
    let endpoints = endpoints();
    let mut tracker = tracker(&endpoints);
    let mut reporter = Reporter::new(dir.path().join("hc.log"), &endpoints);

    let results = mixed_round();
    tracker.update(&results);
    reporter.record(1, &results, &endpoints, &tracker).unwrap();
    let held = reporter.snapshot();

    tracker.update(&results);
    reporter.record(2, &results, &endpoints, &tracker).unwrap();

    assert_eq!(held.round, 1);
    assert_eq!(reporter.snapshot().round, 2);
}
