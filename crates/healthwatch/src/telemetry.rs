//! OpenTelemetry integration for distributed tracing
//!
//! Installs the process-wide tracing subscriber, optionally exporting spans
//! to an OTLP collector.

use common::LogFormat;
use common::logging::env_filter;
use opentelemetry::{KeyValue, trace::TracerProvider as _};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource, runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider},
};
use tracing_subscriber::{Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// OpenTelemetry tracer guard
///
/// When dropped, flushes all pending spans and shuts down the tracer
pub struct TelemetryGuard;

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        opentelemetry::global::shutdown_tracer_provider();
    }
}

/// Build a tracer provider exporting to `otlp_endpoint` over gRPC
pub fn init_telemetry(
    service_name: &str,
    otlp_endpoint: &str,
) -> Result<TracerProvider, common::Error> {
    tracing::debug!(service_name, otlp_endpoint, "Initializing OpenTelemetry tracing");

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(otlp_endpoint)
        .build()
        .map_err(common::Error::telemetry)?;

    let resource = Resource::new(vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION").to_string()),
    ]);

    Ok(TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource),
        )
        .build())
}

/// Setup tracing-subscriber, with an OpenTelemetry layer when `enabled`
///
/// Must be called from within a tokio runtime when `enabled` is true.
/// Keep the returned guard alive for the lifetime of the process.
pub fn setup_tracing_with_otel(
    service_name: &str,
    otlp_endpoint: &str,
    enabled: bool,
    log_level: &str,
    format: LogFormat,
) -> Result<Option<TelemetryGuard>, common::Error> {
    let fmt_layer = match format {
        LogFormat::Text => fmt::layer().with_writer(std::io::stderr).boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
    };

    let (otel_layer, guard) = if enabled {
        let provider = init_telemetry(service_name, otlp_endpoint)?;
        let tracer = provider.tracer(service_name.to_string());
        opentelemetry::global::set_tracer_provider(provider);
        (
            Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            Some(TelemetryGuard),
        )
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter(log_level))
        .with(otel_layer)
        .try_init()
        .map_err(common::Error::telemetry)?;

    if enabled {
        tracing::info!(service_name, otlp_endpoint, "Tracing initialized with OpenTelemetry integration");
    } else {
        tracing::debug!("Tracing initialized without OpenTelemetry");
    }

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_without_otel() {
        // A second global subscriber in the same test binary is rejected
        let first = setup_tracing_with_otel("test", "http://localhost:4317", false, "info", LogFormat::Json);
        assert!(first.is_ok());
        assert!(first.unwrap().is_none());

        let second = setup_tracing_with_otel("test", "http://localhost:4317", false, "info", LogFormat::Text);
        assert!(matches!(second, Err(common::Error::Telemetry(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_grpc_exporter_builds() {
        // The tonic channel connects lazily, so no collector is needed
        let provider = init_telemetry("healthwatch-test", "http://127.0.0.1:4317");
        assert!(provider.is_ok());
    }
}
