//! Endpoint probers.

use crate::types::{CheckResult, Endpoint, Protocol, SystemLimits};
use async_trait::async_trait;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use sysinfo::System;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Why a probe failed
///
/// Never propagated: the prober folds it into a failed [`CheckResult`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("timeout")]
    Timeout,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("failed to sample system resources: {0}")]
    Sample(String),

    #[error("{0}")]
    Limit(String),
}

/// Performs exactly one check against an endpoint.
///
/// Implementations must honour `endpoint.timeout` and must not retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Prober: Send + Sync {
    /// Perform a health check
    async fn probe(&self, endpoint: &Endpoint) -> CheckResult;
}

/// TCP reachability prober
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

impl TcpProber {
    /// Create a new TCP prober
    pub fn new() -> Self {
        Self
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<(), ProbeError> {
        match timeout(endpoint.timeout, TcpStream::connect(endpoint.target.as_str())).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                Err(ProbeError::ConnectionRefused)
            }
            Ok(Err(e)) => Err(ProbeError::Connect(e.to_string())),
            Err(_) => Err(ProbeError::Timeout),
        }
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, endpoint: &Endpoint) -> CheckResult {
        let start = Instant::now();
        let outcome = self.connect(endpoint).await;
        let latency = start.elapsed();

        match outcome {
            Ok(()) => {
                debug!(endpoint = %endpoint.id, latency_ms = latency.as_millis(), "TCP check successful");
                CheckResult::success(&endpoint.id, latency)
            }
            Err(e) => {
                warn!(endpoint = %endpoint.id, error = %e, "TCP check failed");
                CheckResult::failure(&endpoint.id, latency, e.to_string())
            }
        }
    }
}

/// HTTP/HTTPS prober
///
/// Redirects are not followed, so a 3xx answer counts as success.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    /// Create a new HTTP prober
    pub fn new() -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("healthwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProbeError::Client(e.to_string()))?;

        Ok(Self { client })
    }

    async fn get(&self, endpoint: &Endpoint) -> Result<u16, ProbeError> {
        let request = self
            .client
            .get(endpoint.target.as_str())
            .timeout(endpoint.timeout)
            .send();

        match timeout(endpoint.timeout, request).await {
            Ok(Ok(response)) => {
                let code = response.status().as_u16();
                if (200..400).contains(&code) {
                    Ok(code)
                } else {
                    Err(ProbeError::Status(code))
                }
            }
            Ok(Err(e)) => Err(classify_request_error(&e)),
            Err(_) => Err(ProbeError::Timeout),
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, endpoint: &Endpoint) -> CheckResult {
        let start = Instant::now();
        let outcome = self.get(endpoint).await;
        let latency = start.elapsed();

        match outcome {
            Ok(code) => {
                debug!(endpoint = %endpoint.id, status = code, latency_ms = latency.as_millis(),
                       "HTTP check successful");
                CheckResult::success(&endpoint.id, latency).with_status_code(code)
            }
            Err(ProbeError::Status(code)) => {
                warn!(endpoint = %endpoint.id, status = code, "HTTP check failed: unexpected status code");
                CheckResult::failure(&endpoint.id, latency, ProbeError::Status(code).to_string())
                    .with_status_code(code)
            }
            Err(e) => {
                warn!(endpoint = %endpoint.id, error = %e, "HTTP check failed");
                CheckResult::failure(&endpoint.id, latency, e.to_string())
            }
        }
    }
}

/// One reading of the local host's resources
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceUsage {
    pub memory_percent: f64,
    pub load_one: f64,
    pub cpus: usize,
}

impl ResourceUsage {
    /// Compare the reading against `limits`; the first exceeded limit wins
    pub fn check(&self, limits: &SystemLimits) -> Result<(), ProbeError> {
        if self.memory_percent >= limits.max_memory_percent {
            return Err(ProbeError::Limit(format!(
                "memory usage {:.1}% exceeds {}%",
                self.memory_percent, limits.max_memory_percent
            )));
        }
        if let Some(max) = limits.max_load_per_cpu {
            let per_cpu = self.load_one / self.cpus.max(1) as f64;
            if per_cpu >= max {
                return Err(ProbeError::Limit(format!(
                    "load average {:.2} per cpu exceeds {max}",
                    per_cpu
                )));
            }
        }
        Ok(())
    }
}

/// Memory and load prober for `system://` endpoints
#[derive(Debug, Clone)]
pub struct SystemProber {
    system: Arc<Mutex<System>>,
}

impl SystemProber {
    /// Create a new system prober
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }

    async fn measure(&self, endpoint: &Endpoint) -> Result<(), ProbeError> {
        let limits = endpoint
            .target
            .parse::<SystemLimits>()
            .map_err(|e| ProbeError::Sample(e.to_string()))?;

        let system = Arc::clone(&self.system);
        let reading = tokio::task::spawn_blocking(move || sample(&system));

        match timeout(endpoint.timeout, reading).await {
            Ok(Ok(usage)) => {
                let usage = usage?;
                debug!(
                    endpoint = %endpoint.id,
                    memory_percent = usage.memory_percent,
                    load_one = usage.load_one,
                    cpus = usage.cpus,
                    "System resources sampled"
                );
                usage.check(&limits)
            }
            Ok(Err(e)) => Err(ProbeError::Sample(e.to_string())),
            Err(_) => Err(ProbeError::Timeout),
        }
    }
}

impl Default for SystemProber {
    fn default() -> Self {
        Self::new()
    }
}

fn sample(system: &Mutex<System>) -> Result<ResourceUsage, ProbeError> {
    let mut system = system
        .lock()
        .map_err(|_| ProbeError::Sample("sampler lock poisoned".to_string()))?;
    system.refresh_memory();
    system.refresh_cpu();

    let total = system.total_memory();
    if total == 0 {
        return Err(ProbeError::Sample("total memory is zero".to_string()));
    }

    Ok(ResourceUsage {
        memory_percent: system.used_memory() as f64 / total as f64 * 100.0,
        load_one: System::load_average().one,
        cpus: system.cpus().len(),
    })
}

#[async_trait]
impl Prober for SystemProber {
    async fn probe(&self, endpoint: &Endpoint) -> CheckResult {
        let start = Instant::now();
        let outcome = self.measure(endpoint).await;
        let latency = start.elapsed();

        match outcome {
            Ok(()) => CheckResult::success(&endpoint.id, latency),
            Err(e) => {
                warn!(endpoint = %endpoint.id, error = %e, "System check failed");
                CheckResult::failure(&endpoint.id, latency, e.to_string())
            }
        }
    }
}

/// Routes each endpoint to the prober for its protocol
#[derive(Debug, Clone)]
pub struct EndpointProber {
    http: HttpProber,
    tcp: TcpProber,
    system: SystemProber,
}

impl EndpointProber {
    /// Create a prober sharing one HTTP client across all endpoints
    pub fn new() -> Result<Self, ProbeError> {
        Ok(Self {
            http: HttpProber::new()?,
            tcp: TcpProber::new(),
            system: SystemProber::new(),
        })
    }
}

#[async_trait]
impl Prober for EndpointProber {
    async fn probe(&self, endpoint: &Endpoint) -> CheckResult {
        match endpoint.protocol {
            Protocol::Http | Protocol::Https => self.http.probe(endpoint).await,
            Protocol::Tcp => self.tcp.probe(endpoint).await,
            Protocol::System => self.system.probe(endpoint).await,
        }
    }
}

fn classify_request_error(e: &reqwest::Error) -> ProbeError {
    if e.is_timeout() {
        return ProbeError::Timeout;
    }
    if e.is_connect() {
        if io_error_kind(e) == Some(io::ErrorKind::ConnectionRefused) {
            return ProbeError::ConnectionRefused;
        }
        return ProbeError::Connect(e.to_string());
    }
    ProbeError::Request(e.to_string())
}

/// Walk the source chain looking for the underlying socket error.
fn io_error_kind(err: &(dyn std::error::Error + 'static)) -> Option<io::ErrorKind> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = cause.source();
    }
    None
}
