//! healthwatch binary

use clap::Parser;
use healthwatch::cli::{self, Cli, Commands};
use healthwatch::{Config, HealthwatchServer, setup_tracing_with_otel};
use std::process::ExitCode;

const EXIT_CONFIG: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration first (needed for logging and telemetry settings)
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            common::logging::init();
            tracing::error!(error = %e, "Configuration error");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let command = cli.command.unwrap_or(Commands::Run);

    // Initialize tracing; OpenTelemetry only for the long-running monitor
    let telemetry_enabled = matches!(command, Commands::Run) && config.telemetry.enabled;
    let _telemetry_guard = match setup_tracing_with_otel(
        &config.telemetry.service_name,
        &config.telemetry.otlp_endpoint,
        telemetry_enabled,
        config.log_level(),
        config.log_format(),
    ) {
        Ok(guard) => guard,
        Err(e) => {
            common::logging::init_with(config.log_level(), config.log_format());
            tracing::warn!(error = %e, "OpenTelemetry unavailable, continuing without it");
            None
        }
    };

    let server_config = match config.to_server_config() {
        Ok(server_config) => server_config,
        Err(e) => {
            tracing::error!(error = %e, "Configuration error");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match command {
        Commands::Run => {
            tracing::info!(version = env!("CARGO_PKG_VERSION"), "healthwatch starting");
            match HealthwatchServer::new(server_config).run().await {
                Ok(snapshot) => ExitCode::from(snapshot.exit_code()),
                Err(e) if e.is_fatal_config() => {
                    tracing::error!(error = %e, "Configuration error");
                    ExitCode::from(EXIT_CONFIG)
                }
                Err(e) => {
                    tracing::error!(error = %e, "healthwatch failed");
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Check(args) => match cli::check(&server_config, &args).await {
            Ok(code) => ExitCode::from(code),
            Err(e) => {
                tracing::error!(error = %e, "Check failed");
                ExitCode::FAILURE
            }
        },
        Commands::Status(args) => ExitCode::from(cli::status(&server_config, &args).await),
    }
}
