//! Endpoint probing and health classification for healthwatch.
//!
//! This crate provides the building blocks of the monitor:
//! - TCP reachability probes
//! - HTTP/HTTPS GET probes (2xx and 3xx count as success)
//! - Local memory and load checks for `system://` endpoints
//! - A threshold tracker that turns probe results into a classification
//!
//! # Features
//!
//! - Async/await based for high concurrency
//! - Configurable failure/recovery thresholds to avoid flapping
//! - Bounded per-endpoint history
//!
//! # Example
//!
//! ```no_run
//! use healthcheck::{Endpoint, EndpointProber, HealthTracker, Prober, ThresholdPolicy};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoint = Endpoint::parse("localhost:3000", Duration::from_secs(5))?;
//! let prober = EndpointProber::new()?;
//! let mut tracker = HealthTracker::new([endpoint.id.clone()], ThresholdPolicy::default());
//!
//! let result = prober.probe(&endpoint).await;
//! for transition in tracker.update(&[result]) {
//!     println!("{} -> {}", transition.from, transition.to);
//! }
//! # Ok(())
//! # }
//! ```

pub mod checkers;
pub mod tracker;
pub mod types;

pub use checkers::{
    EndpointProber, HttpProber, ProbeError, Prober, ResourceUsage, SystemProber, TcpProber,
};
pub use tracker::{ClassificationCounts, EndpointState, HealthTracker};
pub use types::{
    CheckResult, Classification, Endpoint, EndpointError, Outcome, Protocol, SystemLimits,
    ThresholdPolicy, Transition,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_classification_display() {
        assert_eq!(Classification::Healthy.to_string(), "healthy");
        assert_eq!(Classification::Unhealthy.to_string(), "unhealthy");
        assert_eq!(Classification::Unknown.to_string(), "unknown");
    }

    #[test]
    fn test_check_result() {
        let result = CheckResult::success("localhost:3000", Duration::from_millis(100));
        assert!(result.is_success());
        assert_eq!(result.outcome, Outcome::Success);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_tracker_update() {
        let mut tracker = HealthTracker::new(["localhost:3000"], ThresholdPolicy::default());
        let result = CheckResult::success("localhost:3000", Duration::from_millis(100));
        let transitions = tracker.update(&[result]);

        assert_eq!(transitions.len(), 1);
        let state = tracker.state("localhost:3000").unwrap();
        assert_eq!(state.consecutive_successes(), 1);
        assert_eq!(state.consecutive_failures(), 0);
    }
}
