// SPDX-License-Identifier: MIT
//! Error types for telemetry bootstrap and shutdown.

use std::time::Duration;

use thiserror::Error;

use crate::exporter::SignalKind;

/// Result alias used throughout the crate.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Errors raised while building, installing or tearing down telemetry.
///
/// Configuration problems never show up here: unknown or missing values
/// resolve to defaults instead.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// An OTLP exporter could not be constructed (e.g. malformed endpoint).
    #[error("failed to build {signal} exporter: {source}")]
    Exporter {
        signal: SignalKind,
        #[source]
        source: opentelemetry_otlp::ExporterBuildError,
    },

    /// One or more providers reported an error while shutting down.
    #[error("shutdown failed: {0}")]
    Shutdown(String),

    /// One or more providers reported an error while flushing.
    #[error("flush failed: {0}")]
    Flush(String),

    /// Draining the providers did not finish within the shutdown budget.
    #[error("telemetry drain exceeded {0:?}")]
    Timeout(Duration),

    /// The blocking drain task panicked or was cancelled.
    #[error("drain task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// A global `tracing` subscriber was already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
