//! Logging and trace export
//!
//! Logs go to stdout through `tracing-subscriber`, filtered by `RUST_LOG`.
//! When `OTEL_EXPORTER_OTLP_ENDPOINT` is set, spans are also exported over
//! OTLP/gRPC.

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace::Config, trace::Tracer, Resource};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Error, Result};

pub const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

const SERVICE_NAME: &str = "vdb-operator";

/// Install the global subscriber; returns whether OTLP export is enabled
pub fn init_telemetry(json: bool) -> Result<bool> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let otel_layer = match std::env::var(OTLP_ENDPOINT_ENV) {
        Ok(endpoint) if !endpoint.is_empty() => {
            Some(tracing_opentelemetry::layer().with_tracer(init_otlp_tracer(&endpoint)?))
        }
        _ => None,
    };
    let otel_enabled = otel_layer.is_some();

    let (text_layer, json_layer) = if json {
        (None, Some(fmt::layer().json().with_target(true)))
    } else {
        (Some(fmt::layer().with_target(true)), None)
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with(text_layer)
        .with(json_layer)
        .try_init()
        .map_err(|e| Error::ConfigError(format!("Failed to install subscriber: {e}")))?;

    Ok(otel_enabled)
}

fn init_otlp_tracer(endpoint: &str) -> Result<Tracer> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint);

    let trace_config = Config::default().with_resource(Resource::new(vec![
        KeyValue::new("service.name", SERVICE_NAME),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]));

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(trace_config)
        .install_batch(runtime::Tokio)
        .map_err(|e| Error::ConfigError(format!("Failed to start OTLP exporter: {e}")))
}

/// Flush pending spans
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}
