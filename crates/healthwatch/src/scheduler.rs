//! Interval scheduler driving probe rounds.

use crate::metrics::MetricsRegistry;
use crate::notifier::FailoverEmitter;
use crate::reporter::Reporter;
use crate::types::ServerConfig;
use healthcheck::{CheckResult, Endpoint, HealthTracker, Prober};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, sleep_until, timeout_at};
use tracing::{debug, error, info, warn};

const SKIP_IN_FLIGHT: &str = "previous probe still in flight";
const PROBE_OVERRAN: &str = "probe exceeded its timeout";
const PROBE_PANICKED: &str = "probe panicked";

/// Slack past an endpoint's own timeout before its probe is counted as failed
pub const SETTLE_GRACE: Duration = Duration::from_secs(1);

/// Runs one probe per endpoint per interval and aggregates each round
pub struct Scheduler {
    endpoints: Vec<Endpoint>,
    prober: Arc<dyn Prober>,
    permits: Arc<Semaphore>,
    interval: Duration,

    /// Sole writer of endpoint state
    tracker: HealthTracker,
    reporter: Reporter,
    emitter: FailoverEmitter,
    metrics: Option<Arc<MetricsRegistry>>,

    /// Probes still running past their settle deadline, by endpoint id
    outstanding: HashMap<String, JoinHandle<CheckResult>>,

    /// Sequence number of the last completed round
    round: u64,
}

impl Scheduler {
    /// Create a scheduler for `config.endpoints`
    pub fn new(
        config: &ServerConfig,
        prober: Arc<dyn Prober>,
        reporter: Reporter,
        emitter: FailoverEmitter,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Self {
        let tracker = HealthTracker::new(config.endpoints.iter().map(|e| e.id.clone()), config.policy);

        if let Some(ref m) = metrics {
            m.set_endpoints_configured(config.endpoints.len());
            m.update_counts(tracker.counts());
        }

        Self {
            endpoints: config.endpoints.clone(),
            prober,
            permits: Arc::new(Semaphore::new(config.pool_size())),
            interval: config.interval,
            tracker,
            reporter,
            emitter,
            metrics,
            outstanding: HashMap::new(),
            round: 0,
        }
    }

    pub fn tracker(&self) -> &HealthTracker {
        &self.tracker
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Sequence number of the last completed round
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Number of probes still running past their settle deadline
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Run rounds until `shutdown` flips to true or its sender is dropped.
    ///
    /// A round in progress when shutdown is raised is completed first.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> HealthTracker {
        info!(
            endpoints = self.endpoints.len(),
            interval_ms = self.interval.as_millis() as u64,
            "Scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next_tick = Instant::now() + self.interval;
            self.run_round().await;

            if Instant::now() >= next_tick {
                warn!(round = self.round, "Round overran the interval, starting next round immediately");
                continue;
            }

            tokio::select! {
                _ = sleep_until(next_tick) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        for (endpoint, handle) in self.outstanding.drain() {
            debug!(endpoint = %endpoint, "Aborting outstanding probe");
            handle.abort();
        }

        info!(rounds = self.round, "Scheduler stopped");
        self.tracker
    }

    /// Probe every endpoint once and aggregate the round.
    ///
    /// Waits for every probe to settle, each bounded by its endpoint's
    /// timeout plus [`SETTLE_GRACE`], so a round may outlast the interval.
    /// A probe still running past that point counts as failed and stays
    /// outstanding; the endpoint is skipped until it finishes and its late
    /// result is discarded.
    pub async fn run_round(&mut self) -> Vec<CheckResult> {
        let started = Instant::now();
        let round = self.round + 1;

        self.reap_outstanding();

        let mut slots: Vec<Slot> = Vec::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            if self.outstanding.contains_key(&endpoint.id) {
                debug!(round, endpoint = %endpoint.id, "Probe still in flight, skipping");
                slots.push(Slot::Done(CheckResult::skipped(&endpoint.id, SKIP_IN_FLIGHT)));
            } else {
                let handle = spawn_probe(self.prober.clone(), self.permits.clone(), endpoint.clone());
                slots.push(Slot::Pending(endpoint.id.clone(), handle));
            }
        }

        let mut results = Vec::with_capacity(slots.len());
        for slot in slots {
            let result = match slot {
                Slot::Done(result) => result,
                Slot::Pending(id, handle) => match handle.await {
                    Ok(Settled::Finished(joined)) => self.settle(&id, joined),
                    Ok(Settled::Overran { elapsed, probe }) => {
                        warn!(round, endpoint = %id, "Probe exceeded its timeout, counting as failure");
                        self.outstanding.insert(id.clone(), probe);
                        CheckResult::failure(id, elapsed, PROBE_OVERRAN)
                    }
                    Err(e) => self.settle(&id, Err(e)),
                },
            };
            results.push(result);
        }

        self.aggregate(round, &results, started.elapsed());
        results
    }

    /// Drop finished probes that overran; their round already counted them
    fn reap_outstanding(&mut self) {
        self.outstanding.retain(|endpoint, handle| {
            if handle.is_finished() {
                debug!(endpoint = %endpoint, "Discarding late probe result");
                false
            } else {
                true
            }
        });
    }

    fn settle(&self, endpoint: &str, joined: Result<CheckResult, JoinError>) -> CheckResult {
        let result = settle_join(endpoint, joined);
        if result.error.as_deref() == Some(PROBE_PANICKED) {
            if let Some(ref m) = self.metrics {
                m.record_error("probe_panic");
            }
        }
        result
    }

    /// Hand the complete round to the tracker, reporter and emitter
    fn aggregate(&mut self, round: u64, results: &[CheckResult], elapsed: Duration) {
        let transitions = self.tracker.update(results);

        if let Err(e) = self
            .reporter
            .record(round, results, &self.endpoints, &self.tracker)
        {
            error!(round, error = %e, "Failed to write round log");
            if let Some(ref m) = self.metrics {
                m.record_error("report_write");
            }
        }

        self.emitter
            .notify(round, &transitions, self.tracker.all_healthy());

        if let Some(ref m) = self.metrics {
            for (endpoint, result) in self.endpoints.iter().zip(results) {
                m.record_check(endpoint.protocol, result);
                if let Some(state) = self.tracker.state(&endpoint.id) {
                    m.update_endpoint(endpoint.protocol, state);
                }
            }
            for transition in &transitions {
                m.record_transition(transition);
            }
            m.update_counts(self.tracker.counts());
            m.record_round(elapsed);
        }

        self.round = round;

        let counts = self.tracker.counts();
        info!(
            round,
            healthy = counts.healthy,
            unhealthy = counts.unhealthy,
            unknown = counts.unknown,
            transitions = transitions.len(),
            duration_ms = elapsed.as_millis() as u64,
            "Round complete"
        );
    }
}

enum Slot {
    Done(CheckResult),
    Pending(String, JoinHandle<Settled>),
}

/// How a probe task ended from the round's point of view
enum Settled {
    Finished(Result<CheckResult, JoinError>),
    /// Still running past its deadline; the handle keeps it alive
    Overran {
        elapsed: Duration,
        probe: JoinHandle<CheckResult>,
    },
}

/// Spawn one probe once a pool permit is free.
///
/// The settle deadline starts when the probe starts, so queueing for a
/// permit does not eat into it. The permit is held until the probe itself
/// finishes, overrun or not.
fn spawn_probe(
    prober: Arc<dyn Prober>,
    permits: Arc<Semaphore>,
    endpoint: Endpoint,
) -> JoinHandle<Settled> {
    tokio::spawn(async move {
        let Ok(permit) = permits.acquire_owned().await else {
            return Settled::Finished(Ok(CheckResult::failure(
                &endpoint.id,
                Duration::ZERO,
                "worker pool closed",
            )));
        };

        let started = Instant::now();
        let deadline = started + endpoint.timeout + SETTLE_GRACE;
        let mut probe = tokio::spawn(async move {
            let _permit = permit;
            prober.probe(&endpoint).await
        });

        match timeout_at(deadline, &mut probe).await {
            Ok(joined) => Settled::Finished(joined),
            Err(_) => Settled::Overran {
                elapsed: started.elapsed(),
                probe,
            },
        }
    })
}

fn settle_join(endpoint: &str, joined: Result<CheckResult, JoinError>) -> CheckResult {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            error!(endpoint = %endpoint, "Probe task panicked");
            CheckResult::failure(endpoint, Duration::ZERO, PROBE_PANICKED)
        }
        Err(_) => CheckResult::failure(endpoint, Duration::ZERO, "probe cancelled"),
    }
}

/// Probe every endpoint once, without thresholds.
///
/// Results are returned in endpoint order.
pub async fn probe_all(
    prober: Arc<dyn Prober>,
    endpoints: &[Endpoint],
    max_concurrency: usize,
) -> Vec<CheckResult> {
    let permits = Arc::new(Semaphore::new(endpoints.len().min(max_concurrency).max(1)));

    let handles: Vec<(String, JoinHandle<Settled>)> = endpoints
        .iter()
        .map(|endpoint| {
            (
                endpoint.id.clone(),
                spawn_probe(prober.clone(), permits.clone(), endpoint.clone()),
            )
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (id, handle) in handles {
        let result = match handle.await {
            Ok(Settled::Finished(joined)) => settle_join(&id, joined),
            Ok(Settled::Overran { elapsed, probe }) => {
                probe.abort();
                CheckResult::failure(id, elapsed, PROBE_OVERRAN)
            }
            Err(e) => settle_join(&id, Err(e)),
        };
        results.push(result);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use healthcheck::Outcome;

    struct Panicking;

    #[async_trait]
    impl Prober for Panicking {
        async fn probe(&self, endpoint: &Endpoint) -> CheckResult {
            if endpoint.id.starts_with("boom") {
                panic!("probe exploded");
            }
            CheckResult::success(&endpoint.id, Duration::from_millis(1))
        }
    }

    fn endpoints(ids: &[&str]) -> Vec<Endpoint> {
        ids.iter()
            .map(|id| Endpoint::parse(id, Duration::from_secs(1)).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_probe_all_keeps_order_and_captures_panics() {
        let endpoints = endpoints(&["a:1", "boom:2", "c:3"]);
        let results = probe_all(Arc::new(Panicking), &endpoints, 2).await;

        let ids: Vec<&str> = results.iter().map(|r| r.endpoint.as_str()).collect();
        assert_eq!(ids, vec!["a:1", "boom:2", "c:3"]);
        assert_eq!(results[0].outcome, Outcome::Success);
        assert_eq!(results[1].outcome, Outcome::Failure);
        assert_eq!(results[1].error.as_deref(), Some(PROBE_PANICKED));
        assert_eq!(results[2].outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn test_run_round_panic_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            endpoints: endpoints(&["boom:1"]),
            ..ServerConfig::default()
        };
        let reporter = Reporter::new(dir.path().join("hc.log"), &config.endpoints);
        let mut scheduler = Scheduler::new(
            &config,
            Arc::new(Panicking),
            reporter,
            FailoverEmitter::log_only(),
            None,
        );

        let results = scheduler.run_round().await;
        assert_eq!(results[0].outcome, Outcome::Failure);
        assert_eq!(scheduler.round(), 1);
        assert_eq!(
            scheduler
                .tracker()
                .state("boom:1")
                .unwrap()
                .consecutive_failures(),
            1
        );
    }
}
