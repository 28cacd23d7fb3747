//! Tracing subscriber initialization for hosts embedding the engine.
//!
//! Installs a structured `fmt` layer filtered by `RUST_LOG` (falling
//! back to `info` so state transitions are visible out of the box), and
//! optionally bridges spans to OpenTelemetry.
//!
//! ```no_run
//! use stateflow_observe::tracing_setup::{init_tracing, Export};
//!
//! init_tracing(Export::None).unwrap();
//! // or, for local development:
//! init_tracing(Export::Stdout).unwrap();
//! ```

use std::sync::OnceLock;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Where OpenTelemetry spans go, if anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Export {
    /// Structured logs only, no span export.
    None,
    /// Export spans to stdout. Useful for local development; production
    /// hosts would swap in an OTLP exporter here.
    Stdout,
}

/// Kept so the provider can be flushed on shutdown.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Install the global subscriber.
///
/// Honors `RUST_LOG`; without it, defaults to `info` for the stateflow
/// crates and `warn` elsewhere.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(export: Export) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,stateflow_core=info,stateflow_types=info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);

    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);

    match export {
        Export::None => registry.try_init()?,
        Export::Stdout => {
            let provider = SdkTracerProvider::builder()
                .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
                .build();
            let tracer = provider.tracer("stateflow");

            let _ = TRACER_PROVIDER.set(provider.clone());
            opentelemetry::global::set_tracer_provider(provider);

            registry
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()?;
        }
    }

    Ok(())
}

/// Flush buffered spans and shut the exporter down. No-op when span
/// export was never enabled.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("warning: tracer provider shutdown error: {e}");
        }
    }
}
