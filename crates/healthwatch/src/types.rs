//! Runtime configuration, status snapshot and failover event types.

use healthcheck::{
    Classification, Endpoint, HealthTracker, Outcome, Protocol, ThresholdPolicy, Transition,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

/// Server configuration
///
/// Built from the validated [`Config`](crate::config::Config); endpoints are
/// already parsed and deduplicated.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Monitored endpoints, in configuration order
    pub endpoints: Vec<Endpoint>,

    /// Period between round starts
    pub interval: Duration,

    /// Upper bound on concurrent probes
    pub max_concurrency: usize,

    /// Failure/recovery thresholds and history size
    pub policy: ThresholdPolicy,

    /// Append-only round log
    pub log_file: PathBuf,

    /// Serve the status endpoints
    pub status_enabled: bool,

    /// Status server listen address
    pub listen_addr: SocketAddr,

    /// Expose Prometheus metrics
    pub metrics_enabled: bool,

    /// Failover webhook, if any
    pub webhook_url: Option<String>,

    /// Outbound failover queue capacity
    pub notify_queue_size: usize,

    /// Delay before the single delivery retry
    pub notify_retry_delay: Duration,

    /// Per-attempt webhook timeout
    pub notify_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            interval: Duration::from_millis(60_000),
            max_concurrency: 64,
            policy: ThresholdPolicy::default(),
            log_file: PathBuf::from("./logs/health-check.log"),
            status_enabled: true,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9100)),
            metrics_enabled: true,
            webhook_url: None,
            notify_queue_size: 64,
            notify_retry_delay: Duration::from_secs(2),
            notify_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Worker pool size for one round
    pub fn pool_size(&self) -> usize {
        self.endpoints.len().min(self.max_concurrency).max(1)
    }
}

/// Status of one endpoint as seen by external readers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointStatus {
    pub endpoint: String,
    pub protocol: Protocol,
    pub classification: Classification,

    /// Latest completed (non-skipped) check
    #[serde(default, with = "humantime_serde")]
    pub last_check: Option<SystemTime>,

    /// Outcome of the latest round entry, skipped included
    pub last_outcome: Option<Outcome>,

    pub latency_ms: Option<u64>,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,

    #[serde(default, with = "humantime_serde")]
    pub last_transition: Option<SystemTime>,
}

impl EndpointStatus {
    fn unknown(endpoint: &Endpoint) -> Self {
        Self {
            endpoint: endpoint.id.clone(),
            protocol: endpoint.protocol,
            classification: Classification::Unknown,
            last_check: None,
            last_outcome: None,
            latency_ms: None,
            status_code: None,
            error: None,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_transition: None,
        }
    }
}

/// Point-in-time view of every endpoint after a complete round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Sequence number of the round this snapshot reflects (0 before the first)
    pub round: u64,

    /// True when every endpoint is healthy
    pub healthy: bool,

    #[serde(default, with = "humantime_serde")]
    pub generated_at: Option<SystemTime>,

    pub endpoints: Vec<EndpointStatus>,
}

impl StatusSnapshot {
    /// Snapshot served before the first round completes
    pub fn initial(endpoints: &[Endpoint]) -> Self {
        Self {
            round: 0,
            healthy: false,
            generated_at: None,
            endpoints: endpoints.iter().map(EndpointStatus::unknown).collect(),
        }
    }

    /// Build a snapshot from the tracker after round `round`
    pub fn from_tracker(round: u64, endpoints: &[Endpoint], tracker: &HealthTracker) -> Self {
        let endpoints = endpoints
            .iter()
            .map(|endpoint| {
                let Some(state) = tracker.state(&endpoint.id) else {
                    return EndpointStatus::unknown(endpoint);
                };
                let latest = state.latest();
                EndpointStatus {
                    endpoint: endpoint.id.clone(),
                    protocol: endpoint.protocol,
                    classification: state.classification(),
                    last_check: state.last_check(),
                    last_outcome: latest.map(|r| r.outcome),
                    latency_ms: latest
                        .filter(|r| !r.is_skipped())
                        .map(|r| r.latency.as_millis() as u64),
                    status_code: latest.and_then(|r| r.status_code),
                    error: latest.and_then(|r| r.error.clone()),
                    consecutive_failures: state.consecutive_failures(),
                    consecutive_successes: state.consecutive_successes(),
                    last_transition: state.last_transition(),
                }
            })
            .collect();

        Self {
            round,
            healthy: tracker.all_healthy(),
            generated_at: Some(SystemTime::now()),
            endpoints,
        }
    }

    /// Process exit code for this status: 0 all healthy, 1 otherwise
    pub fn exit_code(&self) -> u8 {
        if self.healthy { 0 } else { 1 }
    }

    pub fn endpoint(&self, id: &str) -> Option<&EndpointStatus> {
        self.endpoints.iter().find(|e| e.endpoint == id)
    }
}

/// Kind of failover event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailoverKind {
    /// Endpoint became unhealthy
    Alert,
    /// Endpoint became healthy again
    Recovery,
}

/// One endpoint crossing between healthy and unhealthy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverEvent {
    pub endpoint: String,
    pub kind: FailoverKind,
    pub from: Classification,
    pub to: Classification,
    #[serde(with = "humantime_serde")]
    pub at: SystemTime,
}

impl FailoverEvent {
    /// Map a tracker transition to an event.
    ///
    /// Only a move out of `unhealthy` is a recovery; an endpoint first seen
    /// healthy at startup produces no event.
    pub fn from_transition(transition: &Transition) -> Option<Self> {
        let kind = match (transition.from, transition.to) {
            (_, Classification::Unhealthy) => FailoverKind::Alert,
            (Classification::Unhealthy, Classification::Healthy) => FailoverKind::Recovery,
            _ => return None,
        };

        Some(Self {
            endpoint: transition.endpoint.clone(),
            kind,
            from: transition.from,
            to: transition.to,
            at: transition.at,
        })
    }
}

/// Events produced by one round, delivered as a single webhook payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverBatch {
    pub round: u64,
    pub healthy: bool,
    pub events: Vec<FailoverEvent>,
}
