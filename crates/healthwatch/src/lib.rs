//! healthwatch - endpoint health monitor
//!
//! Probes a fixed set of HTTP, HTTPS and TCP endpoints on an interval,
//! classifies each one with failure/recovery thresholds, appends every round
//! to a JSON-lines log and raises failover signals when an endpoint changes
//! between healthy and unhealthy.
//!
//! # Components
//!
//! - **Scheduler**: runs one bounded-concurrency probe round per interval and
//!   aggregates it into the tracker
//! - **Reporter**: writes the round log and publishes the status snapshot
//! - **Notifier**: emits alert/recovery events and delivers webhook batches
//! - **StatusServer**: serves `/health`, `/status` and `/metrics`
//!
//! Probing and classification live in the `healthcheck` crate.

pub mod cli;
pub mod config;
pub mod http_server;
pub mod metrics;
pub mod notifier;
pub mod reporter;
pub mod scheduler;
pub mod server;
pub mod telemetry;
pub mod types;

pub use config::{Config, ConfigError};
pub use http_server::{StatusServer, router};
pub use metrics::MetricsRegistry;
pub use notifier::{AlertSink, FailoverEmitter, NotifyError, WebhookNotifier, WebhookSink};
pub use reporter::{Reporter, ReportingError, RoundLogEntry, StatusHandle};
pub use scheduler::{Scheduler, probe_all};
pub use server::{HealthwatchServer, shutdown_signal};
pub use telemetry::{TelemetryGuard, init_telemetry, setup_tracing_with_otel};
pub use types::{
    EndpointStatus, FailoverBatch, FailoverEvent, FailoverKind, ServerConfig, StatusSnapshot,
};
