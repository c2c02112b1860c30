//! End-to-end tests for the monitor server against local fixtures

use axum::{Json, Router, extract::State, routing::post};
use healthcheck::{Classification, Endpoint, ThresholdPolicy};
use healthwatch::server::HealthwatchServer;
use healthwatch::types::{FailoverBatch, FailoverKind, ServerConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

async fn webhook_fixture() -> (String, mpsc::UnboundedReceiver<FailoverBatch>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route(
            "/hook",
            post(
                |State(tx): State<mpsc::UnboundedSender<FailoverBatch>>,
                 Json(batch): Json<FailoverBatch>| async move {
                    let _ = tx.send(batch);
                },
            ),
        )
        .with_state(tx);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/hook"), rx)
}

/// Address with nothing listening
async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn config(endpoints: Vec<Endpoint>, log_dir: &tempfile::TempDir) -> ServerConfig {
    ServerConfig {
        endpoints,
        interval: Duration::from_millis(100),
        log_file: log_dir.path().join("health-check.log"),
        status_enabled: false,
        ..ServerConfig::default()
    }
}

#[tokio::test]
async fn test_run_until_reports_healthy_tcp_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            if listener.accept().await.is_err() {
                break;
            }
        }
    });

    let endpoint = Endpoint::parse(&format!("tcp://{addr}"), Duration::from_millis(500)).unwrap();
    let server = HealthwatchServer::new(config(vec![endpoint], &dir));

    let snapshot = server
        .run_until(tokio::time::sleep(Duration::from_millis(350)))
        .await
        .unwrap();

    assert!(snapshot.round >= 1);
    assert!(snapshot.healthy);
    assert_eq!(snapshot.exit_code(), 0);
    assert!(dir.path().join("health-check.log").exists());
}

#[tokio::test]
async fn test_alert_is_posted_to_webhook() {
    let dir = tempfile::tempdir().unwrap();
    let (url, mut batches) = webhook_fixture().await;
    let down = closed_port().await;

    let endpoint = Endpoint::parse(&format!("tcp://{down}"), Duration::from_millis(200)).unwrap();
    let mut config = config(vec![endpoint], &dir);
    config.policy = ThresholdPolicy {
        failure_threshold: 1,
        ..ThresholdPolicy::default()
    };
    config.webhook_url = Some(url);
    config.notify_retry_delay = Duration::from_millis(50);

    let server = HealthwatchServer::new(config);
    let snapshot = server
        .run_until(tokio::time::sleep(Duration::from_millis(350)))
        .await
        .unwrap();

    assert!(!snapshot.healthy);
    assert_eq!(snapshot.exit_code(), 1);
    assert_eq!(snapshot.endpoints[0].classification, Classification::Unhealthy);

    let batch = tokio::time::timeout(Duration::from_secs(2), batches.recv())
        .await
        .expect("webhook should be called")
        .unwrap();
    assert_eq!(batch.round, 1);
    assert_eq!(batch.events.len(), 1);
    assert_eq!(batch.events[0].kind, FailoverKind::Alert);
}

#[tokio::test]
async fn test_no_endpoints_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let server = HealthwatchServer::new(config(Vec::new(), &dir));

    let err = server.run_until(async {}).await.unwrap_err();
    assert!(err.is_fatal_config());
}
