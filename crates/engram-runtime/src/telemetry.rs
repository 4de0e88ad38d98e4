//! Tracing bootstrap with optional OTLP span export.
//!
//! [`init_tracing`] wires three layers onto the global registry: an
//! [`EnvFilter`] (from `RUST_LOG`, default `info`), an optional
//! OpenTelemetry span layer, and a console formatter.  Setting
//! `ENGRAM_LOG_FORMAT=json` switches the formatter to newline-delimited
//! JSON for log aggregators; setting `OTEL_EXPORTER_OTLP_ENDPOINT` turns on
//! span export to that collector.  Neither variable is required – with both
//! absent you get compact console logs and nothing else.
//!
//! Call it once, first thing in `main`, and keep the returned guard alive
//! until exit:
//!
//! ```rust,no_run
//! let _guard = engram_runtime::telemetry::init_tracing("engram");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber and return the guard that flushes spans.
///
/// Dropping the guard is the only way pending span batches reach the
/// collector, so it must outlive everything that logs.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let provider = otlp_provider(service_name);
    let span_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("engram")));

    tracing_subscriber::registry()
        .with(filter)
        .with(span_layer)
        .with(console_layer())
        .init();

    TracerProviderGuard { provider }
}

/// Console formatter selected by `ENGRAM_LOG_FORMAT`.
fn console_layer<S>() -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    match std::env::var("ENGRAM_LOG_FORMAT").as_deref() {
        Ok("json") => tracing_subscriber::fmt::layer().json().boxed(),
        _ => tracing_subscriber::fmt::layer().compact().boxed(),
    }
}

/// Span pipeline for `OTEL_EXPORTER_OTLP_ENDPOINT`, or `None` when the
/// variable is unset or the exporter cannot be built (reported to stderr,
/// console logging continues without export).
///
/// The exporter is the simple synchronous one on purpose: `init_tracing`
/// runs before the CLI creates its Tokio runtime, and the batch exporter
/// needs a runtime to spawn its flush task on.
fn otlp_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;
    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("engram: span export disabled, exporter failed to build: {e}");
            return None;
        }
    };
    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}

/// Flushes and shuts down the span pipeline when dropped.
pub struct TracerProviderGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        let Some(provider) = self.provider.take() else {
            return;
        };
        if let Err(e) = provider.shutdown() {
            eprintln!("engram: span pipeline shutdown failed: {e}");
        }
    }
}
