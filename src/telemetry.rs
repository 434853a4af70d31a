//! Logging and trace export setup

use std::sync::OnceLock;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::PollMapError;
use crate::config::LoggingConfig;

static TRACER_PROVIDER: OnceLock<Option<SdkTracerProvider>> = OnceLock::new();

/// Build the filter: `RUST_LOG` wins over the configured level
fn env_filter(level: &str) -> Result<EnvFilter, PollMapError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| PollMapError::config(format!("Invalid log level '{level}': {e}")))?;

    ["hyper_util=warn", "reqwest=warn", "fjall=warn", "lsm_tree=warn"]
        .into_iter()
        .try_fold(filter, |filter, directive| {
            directive
                .parse()
                .map(|d| filter.add_directive(d))
                .map_err(|e| PollMapError::config(format!("Invalid log directive '{directive}': {e}")))
        })
}

fn tracer_provider(endpoint: &str) -> Result<SdkTracerProvider, PollMapError> {
    let exporter = SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| PollMapError::config(format!("Failed to build OTLP exporter: {e}")))?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(Resource::builder().with_service_name("pollmap").build())
        .build())
}

/// Install the global subscriber once; later calls are no-ops
pub fn init_logging(config: &LoggingConfig) -> Result<(), PollMapError> {
    if TRACER_PROVIDER.get().is_some() {
        return Ok(());
    }

    let filter = env_filter(&config.level)?;
    let fmt_layer = if config.format == "json" {
        fmt::layer().json().with_span_events(FmtSpan::CLOSE).boxed()
    } else {
        fmt::layer().with_span_events(FmtSpan::CLOSE).boxed()
    };

    let provider = config
        .otlp_endpoint
        .as_deref()
        .map(tracer_provider)
        .transpose()?;
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("pollmap")));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| PollMapError::config(format!("Failed to initialize logging: {e}")))?;

    if let Some(endpoint) = &config.otlp_endpoint {
        tracing::info!("Exporting traces to {}", endpoint);
    }
    let _ = TRACER_PROVIDER.set(provider);
    Ok(())
}

/// Flush pending spans before exit
pub fn shutdown() {
    if let Some(Some(provider)) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Failed to flush traces: {e}");
        }
    }
}
