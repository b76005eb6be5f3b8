// SPDX-License-Identifier: MIT
//! Bootstrap for an OpenTelemetry pipeline in a Rust service.
//!
//! This library wires `tracing` into OpenTelemetry traces, metrics and logs:
//! * Configuration comes from `OTEL_*` style environment variables, with a
//!   `.env` file as fallback ([`config`]).
//! * One OTLP exporter per signal, over gRPC, HTTP/JSON or HTTP/protobuf
//!   ([`exporter`]). No endpoint means telemetry is disabled, not broken.
//! * A process-wide registry owns the active providers and hands out
//!   tracers, meters and loggers ([`registry`]).
//! * SIGINT/SIGTERM stop the server and drain the providers before exit
//!   ([`lifecycle`]).
//!
//! The primary entry point is [`telemetry::init_telemetry`].
//!
//! # Quick Start
//! ```no_run
//! use otel_bootstrap::config::TelemetryConfig;
//! use otel_bootstrap::telemetry::init_telemetry;
//!
//! fn main() -> anyhow::Result<()> {
//!     let providers = init_telemetry(&TelemetryConfig::resolve())?;
//!     // business logic
//!     providers.shutdown()?;
//!     Ok(())
//! }
//! ```
pub mod config;
pub mod error;
pub mod exporter;
pub mod lifecycle;
pub mod registry;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{LogLevel, Protocol, TelemetryConfig};
pub use error::{TelemetryError, TelemetryResult};
pub use lifecycle::{LifecycleManager, ServerHandle, ShutdownOutcome};
pub use registry::{ProviderSet, ProviderState, TelemetryRegistry};
