//! Main monitor server implementation.

use crate::http_server::StatusServer;
use crate::metrics::MetricsRegistry;
use crate::notifier::{FailoverEmitter, WebhookNotifier, WebhookSink};
use crate::reporter::Reporter;
use crate::scheduler::Scheduler;
use crate::types::{FailoverBatch, ServerConfig, StatusSnapshot};
use common::{Error, Result};
use healthcheck::{EndpointProber, HealthTracker, Prober};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

/// Health monitor server
pub struct HealthwatchServer {
    config: ServerConfig,
    prober: Option<Arc<dyn Prober>>,
}

impl HealthwatchServer {
    /// Create a new server
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            prober: None,
        }
    }

    /// Use `prober` instead of the default HTTP/TCP prober
    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = Some(prober);
        self
    }

    /// Run until SIGINT or SIGTERM
    pub async fn run(self) -> Result<Arc<StatusSnapshot>> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `signal` resolves; returns the last published snapshot
    pub async fn run_until<F>(self, signal: F) -> Result<Arc<StatusSnapshot>>
    where
        F: Future<Output = ()> + Send,
    {
        if self.config.endpoints.is_empty() {
            return Err(Error::config("no endpoints configured"));
        }

        info!(endpoints = self.config.endpoints.len(), "Starting healthwatch server");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Create metrics registry (optional)
        let metrics = if self.config.metrics_enabled {
            Some(Arc::new(MetricsRegistry::new()))
        } else {
            info!("Metrics disabled");
            None
        };

        let prober = match self.prober {
            Some(prober) => prober,
            None => Arc::new(EndpointProber::new().map_err(Error::healthcheck)?),
        };

        let reporter = Reporter::new(&self.config.log_file, &self.config.endpoints);
        let status = reporter.handle();

        // Spawn webhook delivery (if configured)
        let (emitter, notifier_handle) = match &self.config.webhook_url {
            Some(url) => {
                let sink = WebhookSink::new(url, self.config.notify_timeout).map_err(Error::config)?;
                let (tx, rx) = mpsc::channel::<FailoverBatch>(self.config.notify_queue_size);
                let notifier = WebhookNotifier::new(
                    rx,
                    Arc::new(sink),
                    self.config.notify_retry_delay,
                    metrics.clone(),
                );
                info!(webhook = %url, "Failover webhook enabled");
                (
                    FailoverEmitter::with_queue(tx).with_metrics(metrics.clone()),
                    Some(tokio::spawn(notifier.run())),
                )
            }
            None => (FailoverEmitter::log_only(), None),
        };

        // Spawn status HTTP server (if enabled)
        let status_handle = if self.config.status_enabled {
            let listener = TcpListener::bind(self.config.listen_addr).await?;
            let server = StatusServer::new(status.clone(), metrics.clone());
            let rx = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = server.serve(listener, rx).await {
                    warn!(error = %e, "Status server error");
                }
            }))
        } else {
            info!("Status server disabled");
            None
        };

        let scheduler = Scheduler::new(&self.config, prober, reporter, emitter, metrics);
        let mut scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

        info!("All tasks spawned, server running");

        let exited = tokio::select! {
            _ = signal => {
                info!("Shutdown signal received");
                None
            }
            joined = &mut scheduler_handle => {
                warn!("Scheduler exited unexpectedly");
                Some(joined)
            }
        };

        // Receivers may already be gone
        let _ = shutdown_tx.send(true);

        let joined = match exited {
            Some(joined) => joined,
            None => scheduler_handle.await,
        };
        let outcome = scheduler_outcome(joined);

        // The emitter was dropped with the scheduler, closing the queue
        if let Some(handle) = notifier_handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Webhook notifier task failed");
            }
        }
        if let Some(handle) = status_handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Status server task failed");
            }
        }

        outcome?;

        let snapshot = status.snapshot();
        info!(round = snapshot.round, healthy = snapshot.healthy, "Healthwatch server stopped");
        Ok(snapshot)
    }
}

fn scheduler_outcome(joined: std::result::Result<HealthTracker, JoinError>) -> Result<()> {
    match joined {
        Ok(tracker) => {
            debug!(rounds = tracker.rounds(), "Scheduler joined");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Scheduler task failed");
            Err(Error::other(format!("scheduler task failed: {e}")))
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
