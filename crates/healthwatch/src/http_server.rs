//! HTTP server for status and Prometheus metrics endpoints.

use crate::metrics::MetricsRegistry;
use crate::reporter::StatusHandle;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    status: StatusHandle,
    metrics: Option<Arc<MetricsRegistry>>,
}

/// Build the status router
///
/// `/metrics` is only routed when a registry is given.
pub fn router(status: StatusHandle, metrics: Option<Arc<MetricsRegistry>>) -> Router {
    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler));

    if metrics.is_some() {
        app = app.route("/metrics", get(metrics_handler));
    }

    app.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(AppState { status, metrics })
}

/// HTTP server for status endpoints
pub struct StatusServer {
    status: StatusHandle,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl StatusServer {
    pub fn new(status: StatusHandle, metrics: Option<Arc<MetricsRegistry>>) -> Self {
        Self { status, metrics }
    }

    /// Serve on `listener` until `shutdown` flips to true
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let local_addr = listener.local_addr()?;
        info!(listen_addr = %local_addr, "Status server listening");

        let app = router(self.status, self.metrics);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                while !*shutdown.borrow() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await?;

        info!("Status server stopped");
        Ok(())
    }
}

/// 200 when every endpoint is healthy, 503 otherwise
async fn health_handler(State(state): State<AppState>) -> Response {
    let snapshot = state.status.snapshot();
    let code = if snapshot.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(snapshot.as_ref().clone())).into_response()
}

async fn status_handler(State(state): State<AppState>) -> Response {
    let snapshot = state.status.snapshot();
    Json(snapshot.as_ref().clone()).into_response()
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    let Some(registry) = state.metrics else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match registry.encode() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            buffer,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}
