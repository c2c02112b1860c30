//! Health check types and structures.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Port used when a bare host is configured without one
pub const DEFAULT_PORT: u16 = 3000;

/// Path probed for `host:port` endpoints
pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// Probe protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain HTTP GET
    Http,
    /// HTTP GET over TLS
    Https,
    /// TCP connect only
    Tcp,
    /// Local memory and load average
    System,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => write!(f, "http"),
            Protocol::Https => write!(f, "https"),
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::System => write!(f, "system"),
        }
    }
}

/// Errors raised while parsing an endpoint entry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("endpoint entry is empty")]
    Empty,

    #[error("unsupported scheme '{0}' (expected http, https, tcp or system)")]
    UnsupportedScheme(String),

    #[error("invalid port in endpoint '{0}'")]
    InvalidPort(String),

    #[error("missing host in endpoint '{0}'")]
    MissingHost(String),

    #[error("invalid URL '{raw}': {reason}")]
    InvalidUrl { raw: String, reason: String },

    #[error("invalid system limit '{0}' (expected memory=<1-100> or load=<per-cpu load>)")]
    InvalidLimit(String),
}

/// A monitored target
///
/// Immutable for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    /// Identifier as configured (`host:port` or URL)
    pub id: String,

    /// Probe protocol
    pub protocol: Protocol,

    /// URL for HTTP(S) probes, `host:port` for TCP probes, the
    /// [`SystemLimits`] for system probes
    pub target: String,

    /// Per-check timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Endpoint {
    /// Create an endpoint from already resolved parts
    pub fn new(
        id: impl Into<String>,
        protocol: Protocol,
        target: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            protocol,
            target: target.into(),
            timeout,
        }
    }

    /// Parse a configured endpoint entry.
    ///
    /// - `http://…` / `https://…` URLs are probed verbatim
    /// - `tcp://host:port` selects a TCP connect probe
    /// - `host:port` is probed at `http://host:port/health`, or over https
    ///   when the port is 443
    /// - a bare `host` uses port 3000
    /// - `system://[?memory=90&load=2.0]` checks the local host's resources
    pub fn parse(raw: &str, timeout: Duration) -> Result<Self, EndpointError> {
        let id = raw.trim();
        if id.is_empty() {
            return Err(EndpointError::Empty);
        }

        if let Some((scheme, _)) = id.split_once("://") {
            return Self::parse_url(id, scheme, timeout);
        }

        let (host, port) = if id.starts_with('[') && id.ends_with(']') {
            (id, DEFAULT_PORT)
        } else {
            match id.rsplit_once(':') {
                Some((host, port)) => {
                    let port = port
                        .parse::<u16>()
                        .ok()
                        .filter(|p| *p != 0)
                        .ok_or_else(|| EndpointError::InvalidPort(id.to_string()))?;
                    (host, port)
                }
                None => (id, DEFAULT_PORT),
            }
        };

        if host.is_empty() {
            return Err(EndpointError::MissingHost(id.to_string()));
        }

        let protocol = if port == 443 {
            Protocol::Https
        } else {
            Protocol::Http
        };
        let target = format!("{protocol}://{host}:{port}{DEFAULT_HEALTH_PATH}");
        Url::parse(&target).map_err(|e| EndpointError::InvalidUrl {
            raw: id.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self::new(id, protocol, target, timeout))
    }

    fn parse_url(id: &str, scheme: &str, timeout: Duration) -> Result<Self, EndpointError> {
        let protocol = match scheme.to_ascii_lowercase().as_str() {
            "http" => Protocol::Http,
            "https" => Protocol::Https,
            "tcp" => Protocol::Tcp,
            "system" => Protocol::System,
            other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
        };

        let url = Url::parse(id).map_err(|e| EndpointError::InvalidUrl {
            raw: id.to_string(),
            reason: e.to_string(),
        })?;

        if protocol == Protocol::System {
            let limits: SystemLimits = url.query().unwrap_or_default().parse()?;
            return Ok(Self::new(id, protocol, limits.to_string(), timeout));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| EndpointError::MissingHost(id.to_string()))?;

        let target = match protocol {
            Protocol::Tcp => {
                let port = url
                    .port()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| EndpointError::InvalidPort(id.to_string()))?;
                format!("{host}:{port}")
            }
            Protocol::Http | Protocol::Https | Protocol::System => url.to_string(),
        };

        Ok(Self::new(id, protocol, target, timeout))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Resource ceilings for a `system://` endpoint
///
/// Written as a query string: `memory=90&load=2.0`. Memory is the used
/// share of physical memory in percent; load is the one-minute load
/// average divided by the CPU count and is unchecked unless given.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemLimits {
    pub max_memory_percent: f64,
    pub max_load_per_cpu: Option<f64>,
}

impl Default for SystemLimits {
    fn default() -> Self {
        Self {
            max_memory_percent: 90.0,
            max_load_per_cpu: None,
        }
    }
}

impl FromStr for SystemLimits {
    type Err = EndpointError;

    fn from_str(query: &str) -> Result<Self, Self::Err> {
        let mut limits = Self::default();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let invalid = || EndpointError::InvalidLimit(pair.to_string());
            let (key, value) = pair.split_once('=').ok_or_else(invalid)?;
            let value: f64 = value.parse().map_err(|_| invalid())?;
            match key {
                "memory" if value > 0.0 && value <= 100.0 => limits.max_memory_percent = value,
                "load" if value.is_finite() && value > 0.0 => limits.max_load_per_cpu = Some(value),
                _ => return Err(invalid()),
            }
        }
        Ok(limits)
    }
}

impl fmt::Display for SystemLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memory={}", self.max_memory_percent)?;
        if let Some(load) = self.max_load_per_cpu {
            write!(f, "&load={load}")?;
        }
        Ok(())
    }
}

/// Outcome of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Target answered within the timeout
    Success,
    /// Target failed, timed out or answered with a bad status
    Failure,
    /// No probe ran this round because an earlier one is still in flight
    Skipped,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failure => write!(f, "failure"),
            Outcome::Skipped => write!(f, "skipped"),
        }
    }
}

/// Result of one probe against one endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Endpoint identifier
    pub endpoint: String,

    /// When the probe finished
    #[serde(with = "humantime_serde")]
    pub timestamp: SystemTime,

    /// Success, failure or skipped
    pub outcome: Outcome,

    /// Time spent probing
    #[serde(with = "humantime_serde")]
    pub latency: Duration,

    /// Error detail ("timeout", "connection refused", "HTTP 503", …)
    pub error: Option<String>,

    /// Response code (for HTTP checks)
    pub status_code: Option<u16>,
}

impl CheckResult {
    fn new(endpoint: impl Into<String>, outcome: Outcome, latency: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timestamp: SystemTime::now(),
            outcome,
            latency,
            error: None,
            status_code: None,
        }
    }

    /// Create a successful result
    pub fn success(endpoint: impl Into<String>, latency: Duration) -> Self {
        Self::new(endpoint, Outcome::Success, latency)
    }

    /// Create a failed result
    pub fn failure(
        endpoint: impl Into<String>,
        latency: Duration,
        error: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(endpoint, Outcome::Failure, latency);
        result.error = Some(error.into());
        result
    }

    /// Create a failed result for a probe that hit its timeout
    pub fn timeout(endpoint: impl Into<String>, latency: Duration) -> Self {
        Self::failure(endpoint, latency, "timeout")
    }

    /// Create a skipped result
    pub fn skipped(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut result = Self::new(endpoint, Outcome::Skipped, Duration::ZERO);
        result.error = Some(reason.into());
        result
    }

    /// Attach the HTTP status code
    pub fn with_status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    /// Override the timestamp
    pub fn at(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    pub fn is_failure(&self) -> bool {
        self.outcome == Outcome::Failure
    }

    pub fn is_skipped(&self) -> bool {
        self.outcome == Outcome::Skipped
    }
}

/// Aggregated health of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// No completed check has crossed a threshold yet
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Unknown => write!(f, "unknown"),
            Classification::Healthy => write!(f, "healthy"),
            Classification::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Threshold policy applied by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdPolicy {
    /// Consecutive failures before an endpoint becomes unhealthy
    pub failure_threshold: u32,

    /// Consecutive successes before an endpoint becomes healthy
    pub recovery_threshold: u32,

    /// Number of results kept per endpoint
    pub history_capacity: usize,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_threshold: 1,
            history_capacity: 10,
        }
    }
}

/// A classification change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub endpoint: String,
    pub from: Classification,
    pub to: Classification,
    #[serde(with = "humantime_serde")]
    pub at: SystemTime,
    /// Sequence number of the round that caused it
    pub round: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_parse_host_port() {
        let ep = Endpoint::parse("localhost:3000", TIMEOUT).unwrap();
        assert_eq!(ep.id, "localhost:3000");
        assert_eq!(ep.protocol, Protocol::Http);
        assert_eq!(ep.target, "http://localhost:3000/health");
        assert_eq!(ep.timeout, TIMEOUT);
    }

    #[test]
    fn test_parse_bare_host_uses_default_port() {
        let ep = Endpoint::parse("  api.internal ", TIMEOUT).unwrap();
        assert_eq!(ep.id, "api.internal");
        assert_eq!(ep.target, "http://api.internal:3000/health");
    }

    #[test]
    fn test_parse_port_443_is_https() {
        let ep = Endpoint::parse("api.example.com:443", TIMEOUT).unwrap();
        assert_eq!(ep.protocol, Protocol::Https);
        assert_eq!(ep.target, "https://api.example.com:443/health");
    }

    #[test]
    fn test_parse_url_verbatim() {
        let ep = Endpoint::parse("http://localhost:11434/api/tags", TIMEOUT).unwrap();
        assert_eq!(ep.protocol, Protocol::Http);
        assert_eq!(ep.target, "http://localhost:11434/api/tags");

        let ep = Endpoint::parse("https://status.example.com/ping", TIMEOUT).unwrap();
        assert_eq!(ep.protocol, Protocol::Https);
    }

    #[test]
    fn test_parse_tcp() {
        let ep = Endpoint::parse("tcp://db.internal:5432", TIMEOUT).unwrap();
        assert_eq!(ep.protocol, Protocol::Tcp);
        assert_eq!(ep.target, "db.internal:5432");
    }

    #[test]
    fn test_parse_system() {
        let ep = Endpoint::parse("system://", TIMEOUT).unwrap();
        assert_eq!(ep.id, "system://");
        assert_eq!(ep.protocol, Protocol::System);
        assert_eq!(ep.target, "memory=90");

        let ep = Endpoint::parse("system://local?memory=75&load=1.5", TIMEOUT).unwrap();
        assert_eq!(ep.target, "memory=75&load=1.5");
        let limits: SystemLimits = ep.target.parse().unwrap();
        assert_eq!(limits.max_memory_percent, 75.0);
        assert_eq!(limits.max_load_per_cpu, Some(1.5));
    }

    #[test]
    fn test_system_limit_errors() {
        for raw in [
            "system://?memory=0",
            "system://?memory=101",
            "system://?load=-1",
            "system://?disk=50",
            "system://?memory",
        ] {
            assert!(
                matches!(Endpoint::parse(raw, TIMEOUT), Err(EndpointError::InvalidLimit(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_ipv6() {
        let ep = Endpoint::parse("[::1]:8080", TIMEOUT).unwrap();
        assert_eq!(ep.target, "http://[::1]:8080/health");

        let ep = Endpoint::parse("[::1]", TIMEOUT).unwrap();
        assert_eq!(ep.target, "http://[::1]:3000/health");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Endpoint::parse("   ", TIMEOUT), Err(EndpointError::Empty));
        assert!(matches!(
            Endpoint::parse("ftp://files:21", TIMEOUT),
            Err(EndpointError::UnsupportedScheme(s)) if s == "ftp"
        ));
        assert!(matches!(
            Endpoint::parse("localhost:http", TIMEOUT),
            Err(EndpointError::InvalidPort(_))
        ));
        assert!(matches!(
            Endpoint::parse("localhost:0", TIMEOUT),
            Err(EndpointError::InvalidPort(_))
        ));
        assert!(matches!(
            Endpoint::parse("tcp://db.internal", TIMEOUT),
            Err(EndpointError::InvalidPort(_))
        ));
        assert!(matches!(
            Endpoint::parse(":8080", TIMEOUT),
            Err(EndpointError::MissingHost(_))
        ));
    }

    #[test]
    fn test_result_constructors() {
        let ok = CheckResult::success("a", Duration::from_millis(12)).with_status_code(204);
        assert!(ok.is_success());
        assert_eq!(ok.status_code, Some(204));
        assert!(ok.error.is_none());

        let timed_out = CheckResult::timeout("a", TIMEOUT);
        assert!(timed_out.is_failure());
        assert_eq!(timed_out.error.as_deref(), Some("timeout"));

        let skipped = CheckResult::skipped("a", "probe still in flight");
        assert!(skipped.is_skipped());
        assert_eq!(skipped.latency, Duration::ZERO);
    }

    #[test]
    fn test_display_lowercase() {
        assert_eq!(Outcome::Skipped.to_string(), "skipped");
        assert_eq!(Classification::Unhealthy.to_string(), "unhealthy");
        assert_eq!(Protocol::Tcp.to_string(), "tcp");
    }

    #[test]
    fn test_classification_serde() {
        let json = serde_json::to_string(&Classification::Healthy).unwrap();
        assert_eq!(json, "\"healthy\"");
        let back: Outcome = serde_json::from_str("\"failure\"").unwrap();
        assert_eq!(back, Outcome::Failure);
    }

    #[test]
    fn test_default_policy() {
        let policy = ThresholdPolicy::default();
        assert_eq!(policy.failure_threshold, 3);
        assert_eq!(policy.recovery_threshold, 1);
        assert_eq!(policy.history_capacity, 10);
    }
}
