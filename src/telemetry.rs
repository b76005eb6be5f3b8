// SPDX-License-Identifier: MIT
//! Telemetry bootstrap: exporters, providers and the `tracing` subscriber.
//!
//! The public entry points are:
//!
//! * [`init_telemetry`] – builds exporters from a [`TelemetryConfig`], installs
//!   them into the process-wide registry and sets up the subscriber.
//! * [`init_subscriber`] – installs the global `tracing` subscriber on its own.
//! * [`bootstrap_logging`] – scoped console logging for the code that runs
//!   before the global subscriber exists.
//! * [`RegistryLogLayer`] – forwards `tracing` events to whatever provider
//!   set is active in a registry.
//! * [`span_layer`] – the `tracing-opentelemetry` layer, kept on the tracer
//!   of the active set.
//!
//! The subscriber is composed of three layers:
//!
//! * console output, filtered by `RUST_LOG` if set, else `STDOUT_LOG_LEVEL`;
//! * the OpenTelemetry log bridge, filtered by `OTEL_LOG_LEVEL`;
//! * the `tracing-opentelemetry` span layer.
//!
//! # Example
//! ```no_run
//! use otel_bootstrap::config::TelemetryConfig;
//! use otel_bootstrap::telemetry::init_telemetry;
//!
//! let providers = init_telemetry(&TelemetryConfig::resolve()).expect("init");
//! tracing::info!("application started");
//! providers.shutdown().expect("shutdown");
//! ```
//!
//! # Re-installs
//! Both OpenTelemetry layers follow the registry. Log events are forwarded to
//! whichever set is current, and the span layer is rebuilt around the new
//! tracer on every install, so nothing keeps feeding a retired set.
//! Because the span layer sits behind a reload handle,
//! `OpenTelemetrySpanExt::context` cannot reach it; use
//! [`TelemetryRegistry::tracer`] when a span's OpenTelemetry context is needed.
use std::sync::Arc;

use tracing::subscriber::DefaultGuard;
use tracing::{Event, Subscriber};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracer;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Layer, Registry};

use crate::config::TelemetryConfig;
use crate::error::TelemetryResult;
use crate::exporter::ExporterSet;
use crate::registry::{self, ProviderSet, TelemetryRegistry};

/// Instrumentation scope of spans bridged from `tracing`.
pub const TRACER_NAME: &str = env!("CARGO_PKG_NAME");

/// Targets never forwarded to OpenTelemetry: the exporters' own transport
/// stack would otherwise feed its logs back into the pipeline.
const SILENCED_TARGETS: &str = "hyper=off,h2=off,tonic=off,tower=off,reqwest=off,opentelemetry=off";

/// Builds exporters from `config`, installs them into [`registry::global`]
/// and installs the global `tracing` subscriber.
///
/// # Errors
/// Fails only if a global subscriber is already installed. Exporter problems
/// degrade to disabled signals instead.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<Arc<ProviderSet>> {
    let registry = registry::global();
    let providers = {
        let _console = bootstrap_logging(config);
        registry.set_resource(config.resource());
        registry.install(ExporterSet::from_config(config))
    };
    init_subscriber(config, &registry)?;
    Ok(providers)
}

/// Console-only subscriber for the current thread, active until the guard
/// is dropped.
pub fn bootstrap_logging(config: &TelemetryConfig) -> DefaultGuard {
    let subscriber = fmt()
        .with_max_level(config.stdout_log_level.level_filter())
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_default(subscriber)
}

/// Installs the global subscriber wired to `registry`.
pub fn init_subscriber(
    config: &TelemetryConfig,
    registry: &Arc<TelemetryRegistry>,
) -> TelemetryResult<()> {
    let stdout_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.stdout_log_level.level_filter().to_string()));
    // Console formatting: plain compact single-line output.
    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .compact()
        .with_filter(stdout_filter);

    let log_layer = RegistryLogLayer::new(Arc::clone(registry)).with_filter(otel_filter(config));
    let trace_layer = span_layer(registry).with_filter(otel_filter(config));

    Registry::default()
        .with(console_layer)
        .with(log_layer)
        .with(trace_layer)
        .try_init()?;
    Ok(())
}

/// `tracing-opentelemetry` layer that swaps in the tracer of each newly
/// installed set.
pub fn span_layer<S>(
    registry: &Arc<TelemetryRegistry>,
) -> reload::Layer<OpenTelemetryLayer<S, SdkTracer>, S>
where
    S: Subscriber + for<'a> LookupSpan<'a> + Send + Sync + 'static,
{
    let (layer, handle) = reload::Layer::new(OpenTelemetryLayer::new(registry.tracer(TRACER_NAME)));
    registry.on_install(move |set| {
        let tracer = set.tracer_provider().tracer(TRACER_NAME);
        // Fails only once the subscriber is gone; nothing left to update.
        let _ = handle.modify(|layer| *layer = OpenTelemetryLayer::new(tracer));
    });
    layer
}

fn otel_filter(config: &TelemetryConfig) -> EnvFilter {
    EnvFilter::new(format!(
        "{},{SILENCED_TARGETS}",
        config.otel_log_level.level_filter()
    ))
}

/// Forwards events to the log bridge of the registry's active provider set.
///
/// Events are dropped while nothing is installed.
pub struct RegistryLogLayer {
    registry: Arc<TelemetryRegistry>,
}

impl RegistryLogLayer {
    pub fn new(registry: Arc<TelemetryRegistry>) -> Self {
        Self { registry }
    }
}

impl<S> Layer<S> for RegistryLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        if let Some(set) = self.registry.current() {
            Layer::<S>::on_event(set.log_bridge(), event, ctx);
        }
    }
}
