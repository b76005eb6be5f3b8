// SPDX-License-Identifier: MIT
//! Provider construction and the process-wide provider slot.
//!
//! [`TelemetryRegistry::install`] wraps an [`ExporterSet`] into one SDK
//! provider per signal and swaps the resulting [`ProviderSet`] into the
//! registry's slot. All three signals flip together under a single write
//! lock, together with the `opentelemetry::global` providers when those are
//! published. Hooks registered with [`TelemetryRegistry::on_install`] then
//! see the new set, and the superseded set is shut down last.
//!
//! A signal without an exporter still gets a provider, just one with no
//! processor or reader attached, so callers going through the accessors
//! always receive a usable (possibly inert) provider.
//!
//! Tests build isolated registries with [`TelemetryRegistry::new`]. Glue code
//! that cannot take a parameter reaches the process registry via [`global`],
//! which additionally publishes tracer and meter providers into
//! `opentelemetry::global`.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::{Lazy, OnceCell};
use opentelemetry::global;
use opentelemetry::logs::LoggerProvider as _;
use opentelemetry::metrics::{Meter, MeterProvider as _};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_sdk::logs::{
    BatchConfigBuilder as LogBatchConfigBuilder, BatchLogProcessor, LogExporter, SdkLogger,
    SdkLoggerProvider,
};
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{
    BatchConfigBuilder as TraceBatchConfigBuilder, BatchSpanProcessor, SdkTracer,
    SdkTracerProvider, SpanExporter,
};
use opentelemetry_sdk::Resource;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{TelemetryError, TelemetryResult};
use crate::exporter::{ExporterSet, SignalKind, EXPORT_TIMEOUT};

/// Batch processor queue bound, in items.
pub const MAX_QUEUE_SIZE: usize = 100;
/// Maximum number of items per export call.
pub const MAX_EXPORT_BATCH_SIZE: usize = 10;
/// Delay between scheduled batch exports.
pub const SCHEDULED_DELAY: Duration = Duration::from_millis(500);
/// Collection interval of the periodic metric reader.
pub const METRIC_EXPORT_INTERVAL: Duration = Duration::from_secs(10);

static GLOBAL: Lazy<Arc<TelemetryRegistry>> =
    Lazy::new(|| Arc::new(TelemetryRegistry::publishing()));

/// The process-wide registry.
pub fn global() -> Arc<TelemetryRegistry> {
    Arc::clone(&GLOBAL)
}

/// Lifecycle of a [`ProviderSet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderState {
    /// Built but never installed.
    Uninitialized,
    /// Installed; pipelines accept telemetry.
    Active,
    /// First shutdown request in progress.
    ShuttingDown,
    /// Terminal.
    Closed,
}

/// One provider per signal plus the bridge that feeds `tracing` events into
/// the logger provider.
pub struct ProviderSet {
    generation: u64,
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
    logger_provider: SdkLoggerProvider,
    log_bridge: OpenTelemetryTracingBridge<SdkLoggerProvider, SdkLogger>,
    pipelines: Vec<SignalKind>,
    state: Mutex<ProviderState>,
}

impl ProviderSet {
    /// Wraps each exporter in its pipeline. Trace and log exporters get a
    /// batch processor, the metric exporter a periodic reader.
    pub fn build<S, M, L>(exporters: ExporterSet<S, M, L>, resource: Resource) -> Self
    where
        S: SpanExporter + 'static,
        M: PushMetricExporter,
        L: LogExporter + 'static,
    {
        Self::with_generation(exporters, resource, 0)
    }

    fn with_generation<S, M, L>(
        exporters: ExporterSet<S, M, L>,
        resource: Resource,
        generation: u64,
    ) -> Self
    where
        S: SpanExporter + 'static,
        M: PushMetricExporter,
        L: LogExporter + 'static,
    {
        let ExporterSet { trace, metric, log } = exporters;
        let mut pipelines = Vec::with_capacity(3);

        let mut tracer_builder = SdkTracerProvider::builder().with_resource(resource.clone());
        if let Some(exporter) = trace {
            let batch_config = TraceBatchConfigBuilder::default()
                .with_max_queue_size(MAX_QUEUE_SIZE)
                .with_max_export_batch_size(MAX_EXPORT_BATCH_SIZE)
                .with_scheduled_delay(SCHEDULED_DELAY)
                .build();
            let processor = BatchSpanProcessor::builder(exporter)
                .with_batch_config(batch_config)
                .build();
            tracer_builder = tracer_builder.with_span_processor(processor);
            pipelines.push(SignalKind::Trace);
        }

        let mut meter_builder = SdkMeterProvider::builder().with_resource(resource.clone());
        if let Some(exporter) = metric {
            let reader = PeriodicReader::builder(exporter)
                .with_interval(METRIC_EXPORT_INTERVAL)
                .build();
            meter_builder = meter_builder.with_reader(reader);
            pipelines.push(SignalKind::Metric);
        }

        let mut logger_builder = SdkLoggerProvider::builder().with_resource(resource);
        if let Some(exporter) = log {
            let batch_config = LogBatchConfigBuilder::default()
                .with_max_queue_size(MAX_QUEUE_SIZE)
                .with_max_export_batch_size(MAX_EXPORT_BATCH_SIZE)
                .with_scheduled_delay(SCHEDULED_DELAY)
                .build();
            let processor = BatchLogProcessor::builder(exporter)
                .with_batch_config(batch_config)
                .build();
            logger_builder = logger_builder.with_log_processor(processor);
            pipelines.push(SignalKind::Log);
        }

        let logger_provider = logger_builder.build();
        let log_bridge = OpenTelemetryTracingBridge::new(&logger_provider);

        Self {
            generation,
            tracer_provider: tracer_builder.build(),
            meter_provider: meter_builder.build(),
            logger_provider,
            log_bridge,
            pipelines,
            state: Mutex::new(ProviderState::Uninitialized),
        }
    }

    /// Install counter value at the time this set was installed. `0` for
    /// sets that were never installed.
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> ProviderState {
        *self.state.lock()
    }

    /// Signals that have an exporting pipeline.
    pub fn pipelines(&self) -> &[SignalKind] {
        &self.pipelines
    }

    /// True when no signal exports anywhere.
    pub fn is_inert(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub const fn tracer_provider(&self) -> &SdkTracerProvider {
        &self.tracer_provider
    }

    pub const fn meter_provider(&self) -> &SdkMeterProvider {
        &self.meter_provider
    }

    pub const fn logger_provider(&self) -> &SdkLoggerProvider {
        &self.logger_provider
    }

    pub(crate) const fn log_bridge(&self) -> &OpenTelemetryTracingBridge<SdkLoggerProvider, SdkLogger> {
        &self.log_bridge
    }

    fn activate(&self) {
        let mut state = self.state.lock();
        if *state == ProviderState::Uninitialized {
            *state = ProviderState::Active;
        }
    }

    /// Exports whatever the pipelines currently buffer. No-op unless active.
    pub fn force_flush(&self) -> TelemetryResult<()> {
        if self.state() != ProviderState::Active {
            return Ok(());
        }
        let mut errs = Vec::new();
        if let Err(e) = self.tracer_provider.force_flush() {
            errs.push(format!("tracer: {e}"));
        }
        if let Err(e) = self.meter_provider.force_flush() {
            errs.push(format!("meter: {e}"));
        }
        if let Err(e) = self.logger_provider.force_flush() {
            errs.push(format!("logger: {e}"));
        }
        if errs.is_empty() {
            Ok(())
        } else {
            Err(TelemetryError::Flush(errs.join(", ")))
        }
    }

    /// Flushes and shuts down every provider, in trace, metric, log order.
    /// Each provider gets [`EXPORT_TIMEOUT`] to finish.
    ///
    /// Only the first call does any work; later calls (including ones made
    /// while the first is still running) return `Ok(())`. Failures of
    /// individual providers are aggregated into one error and the set still
    /// ends up [`ProviderState::Closed`].
    pub fn shutdown(&self) -> TelemetryResult<()> {
        {
            let mut state = self.state.lock();
            if matches!(*state, ProviderState::ShuttingDown | ProviderState::Closed) {
                return Ok(());
            }
            *state = ProviderState::ShuttingDown;
        }

        let mut errs = Vec::new();
        if let Err(e) = self.tracer_provider.shutdown_with_timeout(EXPORT_TIMEOUT) {
            errs.push(format!("tracer: {e}"));
        }
        if let Err(e) = self.meter_provider.shutdown_with_timeout(EXPORT_TIMEOUT) {
            errs.push(format!("meter: {e}"));
        }
        if let Err(e) = self.logger_provider.shutdown_with_timeout(EXPORT_TIMEOUT) {
            errs.push(format!("logger: {e}"));
        }
        *self.state.lock() = ProviderState::Closed;

        if errs.is_empty() {
            Ok(())
        } else {
            Err(TelemetryError::Shutdown(errs.join(", ")))
        }
    }
}

impl fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSet")
            .field("generation", &self.generation)
            .field("pipelines", &self.pipelines)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Callback run after each install, with the newly active set.
type InstallHook = Box<dyn Fn(&Arc<ProviderSet>) + Send + Sync>;

/// Holds the active [`ProviderSet`].
pub struct TelemetryRegistry {
    slot: RwLock<Option<Arc<ProviderSet>>>,
    resource: RwLock<Resource>,
    generation: AtomicU64,
    inert: OnceCell<Arc<ProviderSet>>,
    hooks: RwLock<Vec<InstallHook>>,
    // Serializes installs so hooks observe sets in install order.
    installing: Mutex<()>,
    publish_globals: bool,
}

impl Default for TelemetryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryRegistry {
    /// An isolated registry that leaves `opentelemetry::global` alone.
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
            resource: RwLock::new(Resource::builder().build()),
            generation: AtomicU64::new(0),
            inert: OnceCell::new(),
            hooks: RwLock::new(Vec::new()),
            installing: Mutex::new(()),
            publish_globals: false,
        }
    }

    fn publishing() -> Self {
        Self {
            publish_globals: true,
            ..Self::new()
        }
    }

    /// Resource attached to sets installed from now on.
    pub fn set_resource(&self, resource: Resource) {
        *self.resource.write() = resource;
    }

    /// Registers `hook` to run after every later install, once the new set
    /// is active and before the superseded one is retired.
    pub fn on_install<F>(&self, hook: F)
    where
        F: Fn(&Arc<ProviderSet>) + Send + Sync + 'static,
    {
        self.hooks.write().push(Box::new(hook));
    }

    /// Builds a [`ProviderSet`] from `exporters` and makes it the active one.
    ///
    /// The previously active set, if any, is shut down after the swap; a
    /// failure there is logged and does not affect the new set.
    pub fn install<S, M, L>(&self, exporters: ExporterSet<S, M, L>) -> Arc<ProviderSet>
    where
        S: SpanExporter + 'static,
        M: PushMetricExporter,
        L: LogExporter + 'static,
    {
        let _installing = self.installing.lock();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let resource = self.resource.read().clone();
        let set = Arc::new(ProviderSet::with_generation(exporters, resource, generation));
        set.activate();

        let previous = {
            let mut slot = self.slot.write();
            if self.publish_globals {
                global::set_tracer_provider(set.tracer_provider.clone());
                global::set_meter_provider(set.meter_provider.clone());
            }
            slot.replace(Arc::clone(&set))
        };

        for hook in self.hooks.read().iter() {
            hook(&set);
        }

        if let Some(previous) = previous {
            debug!(generation = previous.generation(), "retiring superseded providers");
            if let Err(e) = previous.shutdown() {
                warn!(error = %e, "failed to retire superseded providers");
            }
        }
        info!(generation, pipelines = ?set.pipelines(), "telemetry providers installed");
        set
    }

    /// The installed set, if any.
    pub fn current(&self) -> Option<Arc<ProviderSet>> {
        self.slot.read().clone()
    }

    /// The installed set, or a shared inert set when nothing is installed.
    pub fn providers(&self) -> Arc<ProviderSet> {
        self.current().unwrap_or_else(|| {
            Arc::clone(self.inert.get_or_init(|| {
                Arc::new(ProviderSet::build(
                    ExporterSet::disabled(),
                    self.resource.read().clone(),
                ))
            }))
        })
    }

    pub fn tracer_provider(&self) -> SdkTracerProvider {
        self.providers().tracer_provider.clone()
    }

    pub fn meter_provider(&self) -> SdkMeterProvider {
        self.providers().meter_provider.clone()
    }

    pub fn logger_provider(&self) -> SdkLoggerProvider {
        self.providers().logger_provider.clone()
    }

    pub fn tracer(&self, name: &'static str) -> SdkTracer {
        self.providers().tracer_provider.tracer(name)
    }

    pub fn meter(&self, name: &'static str) -> Meter {
        self.providers().meter_provider.meter(name)
    }

    pub fn logger(&self, name: &'static str) -> SdkLogger {
        self.providers().logger_provider.logger(name)
    }

    /// Flushes the installed set, if any.
    pub fn force_flush(&self) -> TelemetryResult<()> {
        self.current().map_or(Ok(()), |set| set.force_flush())
    }

    /// Shuts down the installed set, if any. Idempotent.
    pub fn shutdown(&self) -> TelemetryResult<()> {
        self.current().map_or(Ok(()), |set| set.shutdown())
    }
}

impl fmt::Debug for TelemetryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryRegistry")
            .field("current", &self.current())
            .field("publish_globals", &self.publish_globals)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::logs::{AnyValue, LogRecord as _, Logger as _, Severity};
    use opentelemetry::StringValue;
    use opentelemetry::trace::{Span as _, Tracer as _};
    use crate::test_support::{LogSink, GLOBALS};
    use opentelemetry_sdk::logs::InMemoryLogExporter;
    use opentelemetry_sdk::metrics::InMemoryMetricExporter;
    use opentelemetry_sdk::trace::InMemorySpanExporter;
    use tokio_test::assert_ok;

    type MemorySet = ExporterSet<InMemorySpanExporter, InMemoryMetricExporter, InMemoryLogExporter>;

    fn memory_set(
        spans: &InMemorySpanExporter,
        metrics: &InMemoryMetricExporter,
        logs: &InMemoryLogExporter,
    ) -> MemorySet {
        ExporterSet {
            trace: Some(spans.clone()),
            metric: Some(metrics.clone()),
            log: Some(logs.clone()),
        }
    }

    fn emit_log(registry: &TelemetryRegistry, body: &'static str) {
        let logger = registry.logger("registry-test");
        let mut record = logger.create_log_record();
        record.set_body(AnyValue::String(StringValue::from(body)));
        record.set_severity_number(Severity::Info);
        logger.emit(record);
    }

    #[test]
    fn accessors_are_inert_before_install() {
        let registry = TelemetryRegistry::new();
        assert!(registry.current().is_none());

        let providers = registry.providers();
        assert!(providers.is_inert());
        assert_eq!(providers.state(), ProviderState::Uninitialized);
        assert_eq!(providers.generation(), 0);

        // Same inert set on every call.
        assert!(Arc::ptr_eq(&providers, &registry.providers()));
        assert_ok!(registry.shutdown());
    }

    #[test]
    fn disabled_exporters_install_inert_providers() {
        let registry = TelemetryRegistry::new();
        let set = registry.install(ExporterSet::disabled());

        assert!(set.is_inert());
        assert_eq!(set.state(), ProviderState::Active);
        assert!(Arc::ptr_eq(&set, &registry.current().expect("installed")));

        emit_log(&registry, "nobody is listening");
        let mut span = registry.tracer("registry-test").start("inert-span");
        span.end();
        registry.meter("registry-test").u64_counter("requests").build().add(1, &[]);

        assert_ok!(registry.force_flush());
        assert_ok!(registry.shutdown());
    }

    #[test]
    fn every_exporter_gets_a_pipeline() {
        let registry = TelemetryRegistry::new();
        let set = registry.install(memory_set(
            &InMemorySpanExporter::default(),
            &InMemoryMetricExporter::default(),
            &InMemoryLogExporter::default(),
        ));
        assert_eq!(
            set.pipelines(),
            &[SignalKind::Trace, SignalKind::Metric, SignalKind::Log]
        );
        assert!(!set.is_inert());
        assert_ok!(set.shutdown());
    }

    #[test]
    fn second_install_supersedes_the_first() {
        let registry = TelemetryRegistry::new();
        let first_spans = InMemorySpanExporter::default();
        let second_spans = InMemorySpanExporter::default();

        let first = registry.install(ExporterSet {
            trace: Some(first_spans.clone()),
            metric: None::<InMemoryMetricExporter>,
            log: None::<InMemoryLogExporter>,
        });
        let second = registry.install(ExporterSet {
            trace: Some(second_spans.clone()),
            metric: None::<InMemoryMetricExporter>,
            log: None::<InMemoryLogExporter>,
        });

        assert_eq!(first.state(), ProviderState::Closed);
        assert_eq!(second.state(), ProviderState::Active);
        assert!(second.generation() > first.generation());
        let current = registry.current().expect("installed");
        assert!(Arc::ptr_eq(&current, &second));

        let mut span = registry.tracer("registry-test").start("after-reinstall");
        span.end();
        assert_ok!(registry.force_flush());

        let exported = second_spans.get_finished_spans().expect("spans");
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].name, "after-reinstall");
        assert!(first_spans.get_finished_spans().expect("spans").is_empty());

        assert_ok!(registry.shutdown());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let set = ProviderSet::build(
            memory_set(
                &InMemorySpanExporter::default(),
                &InMemoryMetricExporter::default(),
                &InMemoryLogExporter::default(),
            ),
            Resource::builder().build(),
        );
        set.activate();

        assert_ok!(set.shutdown());
        assert_eq!(set.state(), ProviderState::Closed);
        assert_ok!(set.shutdown());
        assert_eq!(set.state(), ProviderState::Closed);
        assert_ok!(set.force_flush());
    }

    fn install_logs(registry: &TelemetryRegistry, logs: &LogSink) -> Arc<ProviderSet> {
        registry.install(ExporterSet {
            trace: None::<InMemorySpanExporter>,
            metric: None::<InMemoryMetricExporter>,
            log: Some(logs.clone()),
        })
    }

    #[test]
    fn shutdown_flushes_buffered_logs() {
        let registry = TelemetryRegistry::new();
        let logs = LogSink::default();
        install_logs(&registry, &logs);

        for body in ["one", "two", "three", "four", "five"] {
            emit_log(&registry, body);
        }
        assert_ok!(registry.shutdown());

        assert_eq!(logs.len(), 5);
    }

    #[test]
    fn shutdown_waits_for_slow_exports() {
        // Slower than the SDK's own 5 s shutdown default, well inside the
        // per-provider export timeout.
        let registry = TelemetryRegistry::new();
        let logs = LogSink::slow(Duration::from_secs(6));
        let set = install_logs(&registry, &logs);

        for body in ["one", "two", "three", "four", "five"] {
            emit_log(&registry, body);
        }
        assert_ok!(registry.shutdown());

        assert_eq!(logs.len(), 5);
        assert_eq!(set.state(), ProviderState::Closed);
    }

    #[test]
    fn racing_installs_leave_globals_on_the_current_set() {
        let _globals = GLOBALS.lock();
        let registry = TelemetryRegistry::publishing();
        let sinks: Vec<InMemorySpanExporter> = (0..8).map(|_| InMemorySpanExporter::default()).collect();

        std::thread::scope(|scope| {
            for sink in &sinks {
                let registry = &registry;
                scope.spawn(move || {
                    registry.install(ExporterSet {
                        trace: Some(sink.clone()),
                        metric: None::<InMemoryMetricExporter>,
                        log: None::<InMemoryLogExporter>,
                    });
                });
            }
        });

        // Retired sets drop spans, so the one span only arrives if the
        // global provider is the current set's.
        let mut span = global::tracer("registry-race").start("published");
        span.end();
        assert_ok!(registry.force_flush());

        let exported: usize = sinks
            .iter()
            .map(|sink| sink.get_finished_spans().expect("spans").len())
            .sum();
        assert_eq!(exported, 1);
        assert_ok!(registry.shutdown());
    }

    #[test]
    fn install_hooks_see_every_new_set_in_order() {
        let registry = TelemetryRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hook_seen = Arc::clone(&seen);
        registry.on_install(move |set| hook_seen.lock().push((set.generation(), set.state())));

        let first = registry.install(ExporterSet::disabled());
        let second = registry.install(ExporterSet::disabled());

        assert_eq!(
            *seen.lock(),
            vec![
                (first.generation(), ProviderState::Active),
                (second.generation(), ProviderState::Active),
            ]
        );
        assert_ok!(registry.shutdown());
    }

    #[test]
    fn metrics_reach_the_reader_on_flush() {
        let registry = TelemetryRegistry::new();
        let metrics = InMemoryMetricExporter::default();
        registry.install(ExporterSet {
            trace: None::<InMemorySpanExporter>,
            metric: Some(metrics.clone()),
            log: None::<InMemoryLogExporter>,
        });

        let counter = registry.meter("registry-test").u64_counter("requests").build();
        counter.add(3, &[]);
        assert_ok!(registry.force_flush());

        assert!(!metrics.get_finished_metrics().expect("metrics").is_empty());
        assert_ok!(registry.shutdown());
    }
}
