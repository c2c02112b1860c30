//! Failover signalling: tagged log events and optional webhook delivery.

use crate::metrics::MetricsRegistry;
use crate::types::{FailoverBatch, FailoverEvent, FailoverKind};
use async_trait::async_trait;
use healthcheck::Transition;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

/// Webhook delivery failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("failed to build webhook client: {0}")]
    Client(String),

    #[error("webhook request failed: {0}")]
    Transport(String),

    #[error("webhook answered HTTP {0}")]
    Status(u16),
}

/// Destination for failover batches
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, batch: &FailoverBatch) -> Result<(), NotifyError>;
}

/// POSTs each batch as JSON
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("healthwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NotifyError::Client(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn deliver(&self, batch: &FailoverBatch) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(batch)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Status(status.as_u16()))
        }
    }
}

/// Emits failover events for each round's transitions
///
/// Runs inside the scheduler's aggregation step and never blocks it.
pub struct FailoverEmitter {
    queue: Option<mpsc::Sender<FailoverBatch>>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl FailoverEmitter {
    /// Emitter that only writes log events
    pub fn log_only() -> Self {
        Self {
            queue: None,
            metrics: None,
        }
    }

    /// Emitter that also enqueues batches for webhook delivery
    pub fn with_queue(queue: mpsc::Sender<FailoverBatch>) -> Self {
        Self {
            queue: Some(queue),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<MetricsRegistry>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Emit events for `transitions`; returns the events produced
    pub fn notify(&self, round: u64, transitions: &[Transition], healthy: bool) -> Vec<FailoverEvent> {
        let events: Vec<FailoverEvent> = transitions
            .iter()
            .filter_map(FailoverEvent::from_transition)
            .collect();

        for event in &events {
            match event.kind {
                FailoverKind::Alert => error!(
                    alert = true,
                    round,
                    endpoint = %event.endpoint,
                    from = %event.from,
                    to = %event.to,
                    "Endpoint unhealthy, failover required"
                ),
                FailoverKind::Recovery => info!(
                    recovery = true,
                    round,
                    endpoint = %event.endpoint,
                    from = %event.from,
                    to = %event.to,
                    "Endpoint recovered"
                ),
            }
        }

        if events.is_empty() {
            return events;
        }

        if let Some(queue) = &self.queue {
            let batch = FailoverBatch {
                round,
                healthy,
                events: events.clone(),
            };
            match queue.try_send(batch) {
                Ok(()) => debug!(round, events = events.len(), "Failover batch queued"),
                Err(TrySendError::Full(_)) => {
                    warn!(round, "Failover queue full, batch dropped");
                    self.record("dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(round, "Failover queue closed, batch dropped");
                    self.record("dropped");
                }
            }
        }

        events
    }

    fn record(&self, result: &str) {
        if let Some(ref m) = self.metrics {
            m.record_notification(result);
        }
    }
}

/// Delivers queued batches: one attempt, one retry after `retry_delay`, then drop
pub struct WebhookNotifier {
    queue: mpsc::Receiver<FailoverBatch>,
    sink: Arc<dyn AlertSink>,
    retry_delay: Duration,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl WebhookNotifier {
    pub fn new(
        queue: mpsc::Receiver<FailoverBatch>,
        sink: Arc<dyn AlertSink>,
        retry_delay: Duration,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Self {
        Self {
            queue,
            sink,
            retry_delay,
            metrics,
        }
    }

    /// Run until every sender is dropped
    pub async fn run(mut self) {
        info!("Webhook notifier started");

        while let Some(batch) = self.queue.recv().await {
            self.deliver(&batch).await;
        }

        info!("Webhook notifier stopped");
    }

    async fn deliver(&self, batch: &FailoverBatch) {
        let Err(first) = self.sink.deliver(batch).await else {
            debug!(round = batch.round, "Failover batch delivered");
            self.record("delivered");
            return;
        };

        warn!(round = batch.round, error = %first, retry_in = ?self.retry_delay,
              "Failover delivery failed, retrying once");
        self.record("retried");
        tokio::time::sleep(self.retry_delay).await;

        match self.sink.deliver(batch).await {
            Ok(()) => {
                debug!(round = batch.round, "Failover batch delivered on retry");
                self.record("delivered");
            }
            Err(e) => {
                error!(round = batch.round, error = %e, "Failover delivery failed, batch dropped");
                self.record("dropped");
                if let Some(ref m) = self.metrics {
                    m.record_error("webhook");
                }
            }
        }
    }

    fn record(&self, result: &str) {
        if let Some(ref m) = self.metrics {
            m.record_notification(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healthcheck::Classification;
    use std::time::SystemTime;

    fn transition(endpoint: &str, from: Classification, to: Classification) -> Transition {
        Transition {
            endpoint: endpoint.to_string(),
            from,
            to,
            at: SystemTime::now(),
            round: 3,
        }
    }

    #[test]
    fn test_log_only_emits_events() {
        let emitter = FailoverEmitter::log_only();
        let events = emitter.notify(
            3,
            &[
                transition("a:1", Classification::Unknown, Classification::Unhealthy),
                transition("b:2", Classification::Unhealthy, Classification::Healthy),
            ],
            false,
        );

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, FailoverKind::Alert);
        assert_eq!(events[1].kind, FailoverKind::Recovery);
    }

    #[test]
    fn test_no_batch_without_events() {
        let (tx, mut rx) = mpsc::channel(4);
        let emitter = FailoverEmitter::with_queue(tx);
        assert!(emitter.notify(1, &[], true).is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_webhook_sink_creation() {
        assert!(WebhookSink::new("http://127.0.0.1:9/hook", Duration::from_secs(1)).is_ok());
    }
}
