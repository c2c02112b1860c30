//! Round log writer and status snapshot publisher.

use crate::types::StatusSnapshot;
use arc_swap::ArcSwap;
use healthcheck::{CheckResult, Classification, Endpoint, HealthTracker, Outcome};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info};

/// Round log failures. Never fatal: the round still completes.
#[derive(Debug, Error)]
pub enum ReportingError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open log file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write log file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode log entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One line of the round log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundLogEntry {
    #[serde(with = "humantime_serde")]
    pub timestamp: SystemTime,
    pub round: u64,
    pub endpoint: String,
    pub outcome: Outcome,
    pub latency_ms: u64,
    pub classification: Classification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RoundLogEntry {
    fn new(round: u64, result: &CheckResult, classification: Classification) -> Self {
        Self {
            timestamp: result.timestamp,
            round,
            endpoint: result.endpoint.clone(),
            outcome: result.outcome,
            latency_ms: result.latency.as_millis() as u64,
            classification,
            status_code: result.status_code,
            error: result.error.clone(),
        }
    }
}

/// Read-only handle on the latest complete snapshot
#[derive(Debug, Clone)]
pub struct StatusHandle {
    current: Arc<ArcSwap<StatusSnapshot>>,
}

impl StatusHandle {
    /// Create a handle holding `initial` until the first round is published
    pub fn new(initial: StatusSnapshot) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    /// Latest complete snapshot; never blocks the writer
    pub fn snapshot(&self) -> Arc<StatusSnapshot> {
        self.current.load_full()
    }

    fn publish(&self, snapshot: StatusSnapshot) {
        self.current.store(Arc::new(snapshot));
    }
}

/// Appends round results to the log and publishes snapshots
pub struct Reporter {
    log_path: PathBuf,
    file: Option<File>,
    status: StatusHandle,
}

impl Reporter {
    /// Create a reporter; the log file is opened lazily on the first round
    pub fn new(log_path: impl Into<PathBuf>, endpoints: &[Endpoint]) -> Self {
        Self {
            log_path: log_path.into(),
            file: None,
            status: StatusHandle::new(StatusSnapshot::initial(endpoints)),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Handle for status readers
    pub fn handle(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn snapshot(&self) -> Arc<StatusSnapshot> {
        self.status.snapshot()
    }

    /// Record a complete round.
    ///
    /// The snapshot for `round` is published even when the log write fails.
    pub fn record(
        &mut self,
        round: u64,
        results: &[CheckResult],
        endpoints: &[Endpoint],
        tracker: &HealthTracker,
    ) -> Result<(), ReportingError> {
        let written = self.append(round, results, tracker);
        self.status
            .publish(StatusSnapshot::from_tracker(round, endpoints, tracker));

        if written.is_err() {
            // Reopen on the next round
            self.file = None;
        }
        written
    }

    fn append(
        &mut self,
        round: u64,
        results: &[CheckResult],
        tracker: &HealthTracker,
    ) -> Result<(), ReportingError> {
        let mut buffer = Vec::with_capacity(results.len() * 160);
        for result in results {
            let classification = tracker
                .classification(&result.endpoint)
                .unwrap_or_default();
            serde_json::to_writer(&mut buffer, &RoundLogEntry::new(round, result, classification))?;
            buffer.push(b'\n');
        }

        let path = self.log_path.clone();
        let file = self.open()?;
        file.write_all(&buffer)
            .and_then(|_| file.flush())
            .map_err(|source| ReportingError::Write { path, source })?;

        debug!(round, lines = results.len(), "Round logged");
        Ok(())
    }

    fn open(&mut self) -> Result<&mut File, ReportingError> {
        if self.file.is_none() {
            if let Some(parent) = self.log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|source| ReportingError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_path)
                .map_err(|source| ReportingError::Open {
                    path: self.log_path.clone(),
                    source,
                })?;
            info!(path = %self.log_path.display(), "Round log opened");
            self.file = Some(file);
        }

        // Populated above
        self.file.as_mut().ok_or_else(|| ReportingError::Open {
            path: self.log_path.clone(),
            source: io::Error::other("log file unavailable"),
        })
    }
}
