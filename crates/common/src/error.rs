//! Common error types for healthwatch components.

use std::fmt;

/// A specialized Result type for healthwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for healthwatch operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Healthcheck error: {0}")]
    Healthcheck(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new healthcheck error.
    pub fn healthcheck(msg: impl fmt::Display) -> Self {
        Error::Healthcheck(msg.to_string())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new telemetry error.
    pub fn telemetry(msg: impl fmt::Display) -> Self {
        Error::Telemetry(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }

    /// Whether this error should stop the process at startup.
    pub fn is_fatal_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::config("no endpoints configured").to_string(),
            "Configuration error: no endpoints configured"
        );
        assert_eq!(Error::healthcheck("boom").to_string(), "Healthcheck error: boom");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_fatal_config());
    }

    #[test]
    fn test_config_is_fatal() {
        assert!(Error::config("bad").is_fatal_config());
        assert!(!Error::other("bad").is_fatal_config());
    }
}
