//! Prometheus metrics for the health monitor.

use healthcheck::{
    CheckResult, Classification, ClassificationCounts, EndpointState, Protocol, Transition,
};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::time::Duration;

/// Labels for per-endpoint metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EndpointLabels {
    /// Endpoint identifier as configured
    pub endpoint: String,
    /// Probe protocol (http, https, tcp)
    pub protocol: String,
}

/// Labels for check result metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CheckLabels {
    pub endpoint: String,
    pub protocol: String,
    /// Outcome (success, failure, skipped)
    pub outcome: String,
}

/// Labels for state transition metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TransitionLabels {
    pub endpoint: String,
    pub from: String,
    pub to: String,
}

/// Labels for state-based metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StateLabels {
    /// State (healthy, unhealthy, unknown)
    pub state: String,
}

/// Labels for notification delivery metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct NotificationLabels {
    /// Result (delivered, retried, dropped)
    pub result: String,
}

/// Labels for error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    /// Error type (report_write, probe_panic, webhook, ...)
    pub error_type: String,
}

/// Metrics registry with all monitor metrics
pub struct MetricsRegistry {
    /// Prometheus registry
    pub registry: Registry,

    // Per-endpoint metrics
    checks_total: Family<CheckLabels, Counter>,
    probe_latency_seconds: Family<EndpointLabels, Histogram>,
    /// Current state (0=unknown, 1=healthy, 2=unhealthy)
    state: Family<EndpointLabels, Gauge>,
    consecutive_successes: Family<EndpointLabels, Gauge>,
    consecutive_failures: Family<EndpointLabels, Gauge>,
    state_transitions_total: Family<TransitionLabels, Counter>,

    // System-wide metrics
    endpoints_configured: Gauge,
    endpoints_by_state: Family<StateLabels, Gauge>,
    rounds_total: Counter,
    round_duration_seconds: Histogram,
    notifications_total: Family<NotificationLabels, Counter>,
    errors_total: Family<ErrorLabels, Counter>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let checks_total = Family::<CheckLabels, Counter>::default();
        registry.register(
            "healthwatch_checks",
            "Total probes recorded, by outcome",
            checks_total.clone(),
        );

        // 1ms to ~16s
        let probe_latency_seconds =
            Family::<EndpointLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "healthwatch_probe_latency_seconds",
            "Probe latency in seconds, skipped probes excluded",
            probe_latency_seconds.clone(),
        );

        let state = Family::<EndpointLabels, Gauge>::default();
        registry.register(
            "healthwatch_state",
            "Current classification (0=unknown, 1=healthy, 2=unhealthy)",
            state.clone(),
        );

        let consecutive_successes = Family::<EndpointLabels, Gauge>::default();
        registry.register(
            "healthwatch_consecutive_successes",
            "Current consecutive success count",
            consecutive_successes.clone(),
        );

        let consecutive_failures = Family::<EndpointLabels, Gauge>::default();
        registry.register(
            "healthwatch_consecutive_failures",
            "Current consecutive failure count",
            consecutive_failures.clone(),
        );

        let state_transitions_total = Family::<TransitionLabels, Counter>::default();
        registry.register(
            "healthwatch_state_transitions",
            "Total classification transitions",
            state_transitions_total.clone(),
        );

        let endpoints_configured = Gauge::default();
        registry.register(
            "healthwatch_endpoints_configured",
            "Number of monitored endpoints",
            endpoints_configured.clone(),
        );

        let endpoints_by_state = Family::<StateLabels, Gauge>::default();
        registry.register(
            "healthwatch_endpoints_by_state",
            "Endpoints by classification",
            endpoints_by_state.clone(),
        );

        let rounds_total = Counter::default();
        registry.register(
            "healthwatch_rounds",
            "Total completed check rounds",
            rounds_total.clone(),
        );

        let round_duration_seconds = Histogram::new(exponential_buckets(0.001, 2.0, 16));
        registry.register(
            "healthwatch_round_duration_seconds",
            "Time from round start until results were aggregated",
            round_duration_seconds.clone(),
        );

        let notifications_total = Family::<NotificationLabels, Counter>::default();
        registry.register(
            "healthwatch_notifications",
            "Failover webhook deliveries by result",
            notifications_total.clone(),
        );

        let errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "healthwatch_errors",
            "Total errors by type",
            errors_total.clone(),
        );

        Self {
            registry,
            checks_total,
            probe_latency_seconds,
            state,
            consecutive_successes,
            consecutive_failures,
            state_transitions_total,
            endpoints_configured,
            endpoints_by_state,
            rounds_total,
            round_duration_seconds,
            notifications_total,
            errors_total,
        }
    }

    /// Record one probe result
    pub fn record_check(&self, protocol: Protocol, result: &CheckResult) {
        self.checks_total
            .get_or_create(&CheckLabels {
                endpoint: result.endpoint.clone(),
                protocol: protocol.to_string(),
                outcome: result.outcome.to_string(),
            })
            .inc();

        if !result.is_skipped() {
            self.probe_latency_seconds
                .get_or_create(&EndpointLabels {
                    endpoint: result.endpoint.clone(),
                    protocol: protocol.to_string(),
                })
                .observe(result.latency.as_secs_f64());
        }
    }

    /// Update state and consecutive-count gauges from a tracker entry
    pub fn update_endpoint(&self, protocol: Protocol, state: &EndpointState) {
        let labels = EndpointLabels {
            endpoint: state.endpoint().to_string(),
            protocol: protocol.to_string(),
        };

        self.state
            .get_or_create(&labels)
            .set(state_value(state.classification()));
        self.consecutive_successes
            .get_or_create(&labels)
            .set(state.consecutive_successes() as i64);
        self.consecutive_failures
            .get_or_create(&labels)
            .set(state.consecutive_failures() as i64);
    }

    /// Record a classification transition
    pub fn record_transition(&self, transition: &Transition) {
        self.state_transitions_total
            .get_or_create(&TransitionLabels {
                endpoint: transition.endpoint.clone(),
                from: transition.from.to_string(),
                to: transition.to.to_string(),
            })
            .inc();
    }

    /// Update endpoint count gauge
    pub fn set_endpoints_configured(&self, count: usize) {
        self.endpoints_configured.set(count as i64);
    }

    /// Update endpoints by classification
    pub fn update_counts(&self, counts: ClassificationCounts) {
        for (state, value) in [
            ("healthy", counts.healthy),
            ("unhealthy", counts.unhealthy),
            ("unknown", counts.unknown),
        ] {
            self.endpoints_by_state
                .get_or_create(&StateLabels {
                    state: state.to_string(),
                })
                .set(value as i64);
        }
    }

    /// Record a completed round
    pub fn record_round(&self, duration: Duration) {
        self.rounds_total.inc();
        self.round_duration_seconds.observe(duration.as_secs_f64());
    }

    /// Record a webhook delivery result
    pub fn record_notification(&self, result: &str) {
        self.notifications_total
            .get_or_create(&NotificationLabels {
                result: result.to_string(),
            })
            .inc();
    }

    /// Record error by type
    pub fn record_error(&self, error_type: &str) {
        self.errors_total
            .get_or_create(&ErrorLabels {
                error_type: error_type.to_string(),
            })
            .inc();
    }

    /// Encode all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

fn state_value(classification: Classification) -> i64 {
    match classification {
        Classification::Unknown => 0,
        Classification::Healthy => 1,
        Classification::Unhealthy => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healthcheck::ThresholdPolicy;
    use std::time::SystemTime;

    #[test]
    fn test_record_check() {
        let registry = MetricsRegistry::new();

        registry.record_check(
            Protocol::Http,
            &CheckResult::success("localhost:3000", Duration::from_millis(50)),
        );
        registry.record_check(
            Protocol::Http,
            &CheckResult::skipped("localhost:3000", "probe still in flight"),
        );

        let text = registry.encode().unwrap();
        assert!(text.contains(
            r#"healthwatch_checks_total{endpoint="localhost:3000",protocol="http",outcome="success"} 1"#
        ));
        assert!(text.contains(
            r#"healthwatch_checks_total{endpoint="localhost:3000",protocol="http",outcome="skipped"} 1"#
        ));
        assert!(text.contains(
            r#"healthwatch_probe_latency_seconds_count{endpoint="localhost:3000",protocol="http"} 1"#
        ));
    }

    #[test]
    fn test_update_endpoint() {
        let registry = MetricsRegistry::new();
        let policy = ThresholdPolicy::default();
        let mut state = EndpointState::new("tcp://db:5432", policy.history_capacity);

        for _ in 0..3 {
            state.apply(
                1,
                &CheckResult::failure("tcp://db:5432", Duration::from_millis(1), "connection refused"),
                &policy,
            );
        }
        registry.update_endpoint(Protocol::Tcp, &state);

        let text = registry.encode().unwrap();
        assert!(text.contains(r#"healthwatch_state{endpoint="tcp://db:5432",protocol="tcp"} 2"#));
        assert!(text.contains(
            r#"healthwatch_consecutive_failures{endpoint="tcp://db:5432",protocol="tcp"} 3"#
        ));
    }

    #[test]
    fn test_record_transition() {
        let registry = MetricsRegistry::new();
        registry.record_transition(&Transition {
            endpoint: "a:1".into(),
            from: Classification::Unknown,
            to: Classification::Healthy,
            at: SystemTime::now(),
            round: 1,
        });

        let text = registry.encode().unwrap();
        assert!(text.contains(
            r#"healthwatch_state_transitions_total{endpoint="a:1",from="unknown",to="healthy"} 1"#
        ));
    }

    #[test]
    fn test_system_metrics() {
        let registry = MetricsRegistry::new();
        registry.set_endpoints_configured(3);
        registry.update_counts(ClassificationCounts {
            healthy: 2,
            unhealthy: 1,
            unknown: 0,
        });
        registry.record_round(Duration::from_millis(120));
        registry.record_notification("delivered");
        registry.record_error("report_write");

        let text = registry.encode().unwrap();
        assert!(text.contains("healthwatch_endpoints_configured 3"));
        assert!(text.contains(r#"healthwatch_endpoints_by_state{state="healthy"} 2"#));
        assert!(text.contains(r#"healthwatch_endpoints_by_state{state="unknown"} 0"#));
        assert!(text.contains("healthwatch_rounds_total 1"));
        assert!(text.contains(r#"healthwatch_notifications_total{result="delivered"} 1"#));
        assert!(text.contains(r#"healthwatch_errors_total{error_type="report_write"} 1"#));
    }

    #[test]
    fn test_state_value() {
        assert_eq!(state_value(Classification::Unknown), 0);
        assert_eq!(state_value(Classification::Healthy), 1);
        assert_eq!(state_value(Classification::Unhealthy), 2);
    }
}
