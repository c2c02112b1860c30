//! Command-line interface for healthwatch

use crate::scheduler::probe_all;
use crate::types::{ServerConfig, StatusSnapshot};
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use healthcheck::{CheckResult, EndpointProber};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Endpoint health monitor with failover signalling
#[derive(Parser, Debug)]
#[command(name = "healthwatch")]
#[command(version, about, long_about = None)]
#[command(after_help = r#"ENVIRONMENT VARIABLES:
    CHECK_INTERVAL            Interval between rounds in milliseconds (default: 60000)
    CHECK_ENDPOINTS           Comma separated endpoints (default: localhost:3000)
    CHECK_TIMEOUT             Probe timeout in milliseconds (default: 5000)
    CHECK_FAILURE_THRESHOLD   Consecutive failures before unhealthy (default: 3)
    CHECK_RECOVERY_THRESHOLD  Consecutive successes before healthy (default: 1)
    CHECK_LOG_FILE            Round log path (default: ./logs/health-check.log)
    CHECK_LISTEN_ADDR         Status server address (default: 127.0.0.1:9100)
    CHECK_WEBHOOK_URL         Failover webhook URL
    RUST_LOG                  Log filter, overrides logging.level
"#)]
pub struct Cli {
    /// Configuration file (default: search standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to execute (default: run)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Monitor endpoints until interrupted
    Run,
    /// Probe every endpoint once and exit
    Check(CheckArgs),
    /// Query a running monitor's /health endpoint
    Status(StatusArgs),
}

/// Arguments for the check subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct CheckArgs {
    /// Print results as JSON lines
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the status subcommand
#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Monitor base URL (default: http://<status.listen_addr>)
    #[arg(long)]
    pub url: Option<String>,

    /// Request timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,
}

/// Execute the check command; exit code 0 when every probe succeeded
pub async fn check(config: &ServerConfig, args: &CheckArgs) -> anyhow::Result<u8> {
    let prober = EndpointProber::new().context("failed to create prober")?;
    let results = probe_all(Arc::new(prober), &config.endpoints, config.max_concurrency).await;

    for result in &results {
        if args.json {
            println!("{}", serde_json::to_string(result)?);
        } else {
            println!("{}", format_result(result));
        }
    }

    Ok(if results.iter().all(CheckResult::is_success) { 0 } else { 1 })
}

/// Execute the status command; exit code 1 when unhealthy or unreachable
pub async fn status(config: &ServerConfig, args: &StatusArgs) -> u8 {
    let base = args
        .url
        .clone()
        .unwrap_or_else(|| format!("http://{}", config.listen_addr));
    let url = format!("{}/health", base.trim_end_matches('/'));

    match fetch_status(&url, Duration::from_millis(args.timeout_ms)).await {
        Ok(snapshot) => {
            print_snapshot(&snapshot);
            snapshot.exit_code()
        }
        Err(e) => {
            eprintln!("monitor unreachable at {url}: {e:#}");
            1
        }
    }
}

async fn fetch_status(url: &str, timeout: Duration) -> anyhow::Result<StatusSnapshot> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build HTTP client")?;

    // /health answers 503 with the same body when unhealthy
    let response = client.get(url).send().await.context("request failed")?;
    response
        .json::<StatusSnapshot>()
        .await
        .context("invalid status response")
}

fn print_snapshot(snapshot: &StatusSnapshot) {
    println!("ROUND\t{}\tHEALTHY\t{}", snapshot.round, snapshot.healthy);
    println!("ENDPOINT\tSTATE\tLAST\tLATENCY\tFAILURES\tERROR");
    for endpoint in &snapshot.endpoints {
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            endpoint.endpoint,
            endpoint.classification,
            endpoint
                .last_outcome
                .map(|o| o.to_string())
                .unwrap_or_else(|| "-".into()),
            endpoint
                .latency_ms
                .map(|ms| format!("{ms}ms"))
                .unwrap_or_else(|| "-".into()),
            endpoint.consecutive_failures,
            endpoint.error.as_deref().unwrap_or("-"),
        );
    }
}

fn format_result(result: &CheckResult) -> String {
    let mut line = format!(
        "{}\t{}\t{}ms",
        result.endpoint,
        result.outcome,
        result.latency.as_millis()
    );
    if let Some(code) = result.status_code {
        line.push_str(&format!("\tHTTP {code}"));
    }
    if let Some(error) = result.error.as_deref().filter(|_| !result.is_success()) {
        line.push('\t');
        line.push_str(error);
    }
    line
}
