//! Configuration loading and validation for healthwatch

use crate::types::ServerConfig;
use common::LogFormat;
use healthcheck::{Endpoint, EndpointError, ThresholdPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Invalid endpoint '{entry}': {source}")]
    Endpoint {
        entry: String,
        #[source]
        source: EndpointError,
    },

    #[error("Timeout for endpoint '{0}' must be between 1ms and 10m")]
    EndpointTimeout(String),

    #[error("No endpoints configured")]
    NoEndpoints,

    #[error("Invalid value '{value}' for {var}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid webhook URL '{0}'")]
    InvalidWebhook(String),

    #[error("Invalid listen address '{0}'")]
    InvalidListenAddr(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub monitor: MonitorSettings,

    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<EndpointEntry>,

    #[serde(default)]
    pub report: ReportSettings,

    #[serde(default)]
    pub status: StatusSettings,

    #[serde(default)]
    pub notify: NotifySettings,

    #[serde(default)]
    pub metrics: MetricsSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.monitor.validate()?;
        self.notify.validate()?;
        Ok(())
    }
}

/// Polling and classification settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MonitorSettings {
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_interval")]
    pub interval: Duration,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_timeout")]
    pub timeout: Duration,

    #[validate(range(min = 1, max = 100))]
    pub failure_threshold: u32,

    #[validate(range(min = 1, max = 100))]
    pub recovery_threshold: u32,

    #[validate(range(min = 1, max = 10000))]
    pub history_capacity: usize,

    #[validate(range(min = 1, max = 4096))]
    pub max_concurrency: usize,
}

/// A configured endpoint: a bare entry or one with its own timeout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EndpointEntry {
    Address(String),
    Detailed {
        target: String,
        #[serde(default, with = "humantime_serde")]
        timeout: Option<Duration>,
    },
}

impl EndpointEntry {
    fn target(&self) -> &str {
        match self {
            EndpointEntry::Address(target) => target,
            EndpointEntry::Detailed { target, .. } => target,
        }
    }

    fn timeout(&self) -> Option<Duration> {
        match self {
            EndpointEntry::Address(_) => None,
            EndpointEntry::Detailed { timeout, .. } => *timeout,
        }
    }
}

/// Round log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub log_file: PathBuf,
}

/// Status HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSettings {
    pub enabled: bool,
    pub listen_addr: String,
}

/// Failover webhook settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct NotifySettings {
    pub webhook_url: Option<String>,

    #[validate(range(min = 1, max = 10000))]
    pub queue_size: usize,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_retry_delay")]
    pub retry_delay: Duration,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_notify_timeout")]
    pub timeout: Duration,
}

/// Metrics settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: Option<String>,
    pub format: Option<LogFormat>,
}

/// OpenTelemetry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub enabled: bool,
    pub service_name: String,
    pub otlp_endpoint: String,
}

// Default implementations

fn default_endpoints() -> Vec<EndpointEntry> {
    vec![EndpointEntry::Address("localhost:3000".to_string())]
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(60_000),
            timeout: Duration::from_millis(5_000),
            failure_threshold: 3,
            recovery_threshold: 1,
            history_capacity: 10,
            max_concurrency: 64,
        }
    }
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            log_file: PathBuf::from("./logs/health-check.log"),
        }
    }
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:9100".to_string(),
        }
    }
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            queue_size: 64,
            retry_delay: Duration::from_secs(2),
            timeout: Duration::from_secs(5),
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            service_name: "healthwatch".to_string(),
            otlp_endpoint: "http://localhost:4317".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            monitor: MonitorSettings::default(),
            endpoints: default_endpoints(),
            report: ReportSettings::default(),
            status: StatusSettings::default(),
            notify: NotifySettings::default(),
            metrics: MetricsSettings::default(),
            logging: LoggingSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

// Custom validators

fn validate_interval(interval: &Duration) -> Result<(), ValidationError> {
    let millis = interval.as_millis();
    if millis < 100 || millis > 24 * 60 * 60 * 1000 {
        return Err(ValidationError::new("interval_out_of_range"));
    }
    Ok(())
}

fn validate_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    let millis = timeout.as_millis();
    if millis < 1 || millis > 10 * 60 * 1000 {
        return Err(ValidationError::new("timeout_out_of_range"));
    }
    Ok(())
}

fn validate_retry_delay(delay: &Duration) -> Result<(), ValidationError> {
    if delay.as_millis() > 60_000 {
        return Err(ValidationError::new("retry_delay_out_of_range"));
    }
    Ok(())
}

fn validate_notify_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    let millis = timeout.as_millis();
    if millis < 1 || millis > 60_000 {
        return Err(ValidationError::new("notify_timeout_out_of_range"));
    }
    Ok(())
}

// Environment overrides

fn parse_env<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

// Configuration loading implementation

impl Config {
    /// Load configuration: explicit path or search paths, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if !path.is_file() => {
                return Err(ConfigError::FileNotFound(path.to_path_buf()));
            }
            Some(path) => Self::read_file(path)?,
            None => match Self::find_config_file() {
                Some(found) => Self::read_file(&found)?,
                None => Self::default(),
            },
        };

        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file, without environment overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::read_file(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/healthwatch/healthwatch.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./healthwatch.yaml"));

        paths.into_iter().find(|p: &PathBuf| p.exists() && p.is_file())
    }

    /// Get home directory config path
    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/healthwatch/healthwatch.yaml"))
    }

    /// Apply `CHECK_*` environment overrides.
    ///
    /// Intervals and timeouts are milliseconds; `CHECK_ENDPOINTS` is a comma
    /// separated list that replaces the configured endpoints.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("CHECK_INTERVAL") {
            self.monitor.interval = Duration::from_millis(parse_env("CHECK_INTERVAL", &value)?);
        }
        if let Some(value) = lookup("CHECK_ENDPOINTS") {
            self.endpoints = value
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(|entry| EndpointEntry::Address(entry.to_string()))
                .collect();
        }
        if let Some(value) = lookup("CHECK_TIMEOUT") {
            self.monitor.timeout = Duration::from_millis(parse_env("CHECK_TIMEOUT", &value)?);
        }
        if let Some(value) = lookup("CHECK_FAILURE_THRESHOLD") {
            self.monitor.failure_threshold = parse_env("CHECK_FAILURE_THRESHOLD", &value)?;
        }
        if let Some(value) = lookup("CHECK_RECOVERY_THRESHOLD") {
            self.monitor.recovery_threshold = parse_env("CHECK_RECOVERY_THRESHOLD", &value)?;
        }
        if let Some(value) = lookup("CHECK_LOG_FILE") {
            self.report.log_file = PathBuf::from(value.trim());
        }
        if let Some(value) = lookup("CHECK_LISTEN_ADDR") {
            self.status.listen_addr = value.trim().to_string();
        }
        if let Some(value) = lookup("CHECK_WEBHOOK_URL") {
            let value = value.trim();
            self.notify.webhook_url = (!value.is_empty()).then(|| value.to_string());
        }
        Ok(())
    }

    /// Parse endpoints from the configured entries.
    ///
    /// Duplicate identifiers are dropped; zero endpoints is an error.
    pub fn endpoints(&self) -> Result<Vec<Endpoint>, ConfigError> {
        let mut seen = HashSet::new();
        let mut endpoints = Vec::with_capacity(self.endpoints.len());

        for entry in &self.endpoints {
            let timeout = entry.timeout().unwrap_or(self.monitor.timeout);
            if validate_timeout(&timeout).is_err() {
                return Err(ConfigError::EndpointTimeout(entry.target().to_string()));
            }

            let endpoint =
                Endpoint::parse(entry.target(), timeout).map_err(|source| ConfigError::Endpoint {
                    entry: entry.target().to_string(),
                    source,
                })?;

            if !seen.insert(endpoint.id.clone()) {
                tracing::warn!(endpoint = %endpoint.id, "Duplicate endpoint ignored");
                continue;
            }
            endpoints.push(endpoint);
        }

        if endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        Ok(endpoints)
    }

    /// Convert to the runtime ServerConfig
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let endpoints = self.endpoints()?;

        if let Some(slow) = endpoints.iter().find(|e| e.timeout > self.monitor.interval) {
            tracing::warn!(
                endpoint = %slow.id,
                timeout_ms = slow.timeout.as_millis() as u64,
                interval_ms = self.monitor.interval.as_millis() as u64,
                "Probe timeout exceeds check interval; slow rounds will delay the next one"
            );
        }

        let listen_addr: SocketAddr = self
            .status
            .listen_addr
            .parse()
            .map_err(|_| ConfigError::InvalidListenAddr(self.status.listen_addr.clone()))?;

        if let Some(url) = &self.notify.webhook_url {
            match reqwest::Url::parse(url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                _ => return Err(ConfigError::InvalidWebhook(url.clone())),
            }
        }

        Ok(ServerConfig {
            endpoints,
            interval: self.monitor.interval,
            max_concurrency: self.monitor.max_concurrency,
            policy: ThresholdPolicy {
                failure_threshold: self.monitor.failure_threshold,
                recovery_threshold: self.monitor.recovery_threshold,
                history_capacity: self.monitor.history_capacity,
            },
            log_file: self.report.log_file.clone(),
            status_enabled: self.status.enabled,
            listen_addr,
            metrics_enabled: self.metrics.enabled,
            webhook_url: self.notify.webhook_url.clone(),
            notify_queue_size: self.notify.queue_size,
            notify_retry_delay: self.notify.retry_delay,
            notify_timeout: self.notify.timeout,
        })
    }

    /// Effective log level
    pub fn log_level(&self) -> &str {
        self.logging.level.as_deref().unwrap_or("info")
    }

    /// Effective log format
    pub fn log_format(&self) -> LogFormat {
        self.logging.format.unwrap_or_default()
    }
}
