// SPDX-License-Identifier: MIT
//! Exporter selection.
//!
//! One OTLP exporter per signal, all on the transport picked by
//! [`TelemetryConfig::protocol`]. With no endpoint configured every signal
//! gets `None`, which the registry turns into inert providers.
//!
//! Exporters are lazy: building one never dials the collector, so an
//! unreachable endpoint only shows up later as failed exports.
use std::fmt;
use std::time::Duration;

use opentelemetry_otlp::{
    LogExporter, MetricExporter, Protocol as WireProtocol, SpanExporter, WithExportConfig,
};
use tracing::{info, warn};

use crate::config::{Protocol, TelemetryConfig};
use crate::error::{TelemetryError, TelemetryResult};

/// Upper bound for a single export request.
pub const EXPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Telemetry signal an exporter or provider serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Trace,
    Metric,
    Log,
}

impl SignalKind {
    pub const ALL: [SignalKind; 3] = [SignalKind::Trace, SignalKind::Metric, SignalKind::Log];

    /// Path appended to the base endpoint for OTLP/HTTP.
    pub const fn http_path(&self) -> &'static str {
        match self {
            Self::Trace => "/v1/traces",
            Self::Metric => "/v1/metrics",
            Self::Log => "/v1/logs",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Trace => "trace",
            Self::Metric => "metric",
            Self::Log => "log",
        })
    }
}

/// An OTLP exporter for one signal.
#[derive(Debug)]
pub enum Exporter {
    Span(SpanExporter),
    Metric(MetricExporter),
    Log(LogExporter),
}

impl Exporter {
    pub const fn signal(&self) -> SignalKind {
        match self {
            Self::Span(_) => SignalKind::Trace,
            Self::Metric(_) => SignalKind::Metric,
            Self::Log(_) => SignalKind::Log,
        }
    }
}

/// Transport that [`build`] will use, or `None` when export is disabled.
pub fn selected_transport(config: &TelemetryConfig) -> Option<Protocol> {
    config.endpoint.as_ref().map(|_| config.protocol)
}

/// Builds the exporter for `signal`, or `Ok(None)` when no endpoint is set.
///
/// # Errors
/// Fails only when the OTLP builder rejects its input (e.g. a malformed
/// endpoint URI). Reachability is never checked here.
pub fn build(config: &TelemetryConfig, signal: SignalKind) -> TelemetryResult<Option<Exporter>> {
    let Some(endpoint) = config.endpoint.as_deref() else {
        return Ok(None);
    };
    let exporter = match signal {
        SignalKind::Trace => Exporter::Span(span_exporter(endpoint, config.protocol)?),
        SignalKind::Metric => Exporter::Metric(metric_exporter(endpoint, config.protocol)?),
        SignalKind::Log => Exporter::Log(log_exporter(endpoint, config.protocol)?),
    };
    Ok(Some(exporter))
}

fn signal_endpoint(base: &str, protocol: Protocol, signal: SignalKind) -> String {
    match protocol {
        Protocol::Grpc => base.to_string(),
        Protocol::HttpJson | Protocol::HttpProtobuf => {
            format!("{}{}", base.trim_end_matches('/'), signal.http_path())
        }
    }
}

fn wire_protocol(protocol: Protocol) -> WireProtocol {
    match protocol {
        Protocol::Grpc => WireProtocol::Grpc,
        Protocol::HttpJson => WireProtocol::HttpJson,
        Protocol::HttpProtobuf => WireProtocol::HttpBinary,
    }
}

fn span_exporter(base: &str, protocol: Protocol) -> TelemetryResult<SpanExporter> {
    let endpoint = signal_endpoint(base, protocol, SignalKind::Trace);
    let built = match protocol {
        Protocol::Grpc => SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .with_timeout(EXPORT_TIMEOUT)
            .build(),
        Protocol::HttpJson | Protocol::HttpProtobuf => SpanExporter::builder()
            .with_http()
            .with_protocol(wire_protocol(protocol))
            .with_endpoint(endpoint)
            .with_timeout(EXPORT_TIMEOUT)
            .build(),
    };
    built.map_err(|source| TelemetryError::Exporter {
        signal: SignalKind::Trace,
        source,
    })
}

fn metric_exporter(base: &str, protocol: Protocol) -> TelemetryResult<MetricExporter> {
    let endpoint = signal_endpoint(base, protocol, SignalKind::Metric);
    let built = match protocol {
        Protocol::Grpc => MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .with_timeout(EXPORT_TIMEOUT)
            .build(),
        Protocol::HttpJson | Protocol::HttpProtobuf => MetricExporter::builder()
            .with_http()
            .with_protocol(wire_protocol(protocol))
            .with_endpoint(endpoint)
            .with_timeout(EXPORT_TIMEOUT)
            .build(),
    };
    built.map_err(|source| TelemetryError::Exporter {
        signal: SignalKind::Metric,
        source,
    })
}

fn log_exporter(base: &str, protocol: Protocol) -> TelemetryResult<LogExporter> {
    let endpoint = signal_endpoint(base, protocol, SignalKind::Log);
    let built = match protocol {
        Protocol::Grpc => LogExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .with_timeout(EXPORT_TIMEOUT)
            .build(),
        Protocol::HttpJson | Protocol::HttpProtobuf => LogExporter::builder()
            .with_http()
            .with_protocol(wire_protocol(protocol))
            .with_endpoint(endpoint)
            .with_timeout(EXPORT_TIMEOUT)
            .build(),
    };
    built.map_err(|source| TelemetryError::Exporter {
        signal: SignalKind::Log,
        source,
    })
}

/// One optional exporter per signal, ready to be installed.
///
/// Generic over the exporter types so any SDK exporter (in-memory ones
/// included) goes through the same install path as the OTLP ones.
#[derive(Debug)]
pub struct ExporterSet<S = SpanExporter, M = MetricExporter, L = LogExporter> {
    pub trace: Option<S>,
    pub metric: Option<M>,
    pub log: Option<L>,
}

impl ExporterSet {
    /// The "telemetry disabled" set: no exporter for any signal.
    pub const fn disabled() -> Self {
        Self {
            trace: None,
            metric: None,
            log: None,
        }
    }

    /// Builds OTLP exporters for every signal from `config`.
    ///
    /// A signal whose exporter fails to build is logged and left without an
    /// exporter; bootstrap carries on with the rest.
    pub fn from_config(config: &TelemetryConfig) -> Self {
        info!("configuring OpenTelemetry exporters");
        let Some(protocol) = selected_transport(config) else {
            info!("OTEL_EXPORTER_OTLP_ENDPOINT not set, using no-op exporters");
            return Self::disabled();
        };
        info!(
            endpoint = config.endpoint.as_deref().unwrap_or_default(),
            %protocol,
            "using OTLP exporters"
        );

        let mut set = Self::disabled();
        for signal in SignalKind::ALL {
            match build(config, signal) {
                Ok(Some(Exporter::Span(e))) => set.trace = Some(e),
                Ok(Some(Exporter::Metric(e))) => set.metric = Some(e),
                Ok(Some(Exporter::Log(e))) => set.log = Some(e),
                Ok(None) => {}
                Err(e) => warn!(%signal, error = %e, "exporter disabled"),
            }
        }
        set
    }
}

impl<S, M, L> ExporterSet<S, M, L> {
    /// True when no signal has an exporter.
    pub const fn is_empty(&self) -> bool {
        self.trace.is_none() && self.metric.is_none() && self.log.is_none()
    }
}
