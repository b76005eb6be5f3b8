// SPDX-License-Identifier: MIT
//! Environment driven telemetry configuration.
//!
//! Every lookup goes to the process environment first and falls back to a
//! `.env` file (parsed with `dotenvy`, without touching the process
//! environment). Resolution never fails: absent or malformed values fall back
//! to defaults so the bootstrap path cannot take the process down.
//!
//! Recognized variables:
//! * `OTEL_EXPORTER_OTLP_ENDPOINT` – presence turns exporting on.
//! * `OTEL_EXPORTER_OTLP_PROTOCOL` – `grpc`, `http/json` (also `http_json`,
//!   `httpjson`), anything else selects HTTP + protobuf.
//! * `STDOUT_LOG_LEVEL`, `OTEL_LOG_LEVEL` – thresholds for console output and
//!   for records forwarded to OpenTelemetry (`warn` is accepted for `warning`).
//! * `OTEL_SERVICE_NAME`, `RUST_ENV` – resource identity.
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;
use tracing::level_filters::LevelFilter;

pub const ENDPOINT_VAR: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
pub const PROTOCOL_VAR: &str = "OTEL_EXPORTER_OTLP_PROTOCOL";
pub const STDOUT_LOG_LEVEL_VAR: &str = "STDOUT_LOG_LEVEL";
pub const OTEL_LOG_LEVEL_VAR: &str = "OTEL_LOG_LEVEL";
pub const SERVICE_NAME_VAR: &str = "OTEL_SERVICE_NAME";
pub const ENVIRONMENT_VAR: &str = "RUST_ENV";

/// Informal level names and the canonical name they stand for.
const LEVEL_ALIASES: &[(&str, &str)] = &[
    ("warn", "warning"),
    ("err", "error"),
    ("fatal", "critical"),
    ("crit", "critical"),
];

/// OTLP transport selected for all signals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// OTLP over gRPC (tonic).
    Grpc,
    /// OTLP over HTTP with JSON bodies.
    HttpJson,
    /// OTLP over HTTP with protobuf bodies.
    #[default]
    HttpProtobuf,
}

impl Protocol {
    /// Maps a raw protocol string to a transport. Unknown or empty input
    /// selects [`Protocol::HttpProtobuf`].
    pub fn resolve(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "grpc" => Self::Grpc,
            "http/json" | "http_json" | "httpjson" => Self::HttpJson,
            _ => Self::HttpProtobuf,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Grpc => "grpc",
            Self::HttpJson => "http/json",
            Self::HttpProtobuf => "http/protobuf",
        })
    }
}

/// Canonical log levels understood by the configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Resolves a raw level string, applying the alias table first.
    /// Anything that is still not a canonical name yields [`LogLevel::Info`].
    pub fn resolve(raw: &str) -> Self {
        resolve_level(raw).parse().unwrap_or_default()
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }

    /// The `tracing` threshold for this level. `tracing` has no level above
    /// `ERROR`, so `Critical` shares it.
    pub const fn level_filter(&self) -> LevelFilter {
        match self {
            Self::Trace => LevelFilter::TRACE,
            Self::Debug => LevelFilter::DEBUG,
            Self::Info => LevelFilter::INFO,
            Self::Warning => LevelFilter::WARN,
            Self::Error | Self::Critical => LevelFilter::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not one of the canonical level names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLevel(pub String);

impl fmt::Display for UnknownLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown log level `{}`", self.0)
    }
}

impl std::error::Error for UnknownLevel {}

impl FromStr for LogLevel {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            _ => Err(UnknownLevel(s.to_string())),
        }
    }
}

/// Canonicalizes an informal level name through the alias table.
///
/// Alias keys match case-insensitively; any input without an alias is
/// returned unchanged.
pub fn resolve_level(raw: &str) -> String {
    let needle = raw.trim();
    LEVEL_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(needle))
        .map(|(_, canonical)| (*canonical).to_string())
        .unwrap_or_else(|| raw.to_string())
}

/// Resolved telemetry configuration. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Base OTLP endpoint without per-signal suffix. `None` disables export.
    pub endpoint: Option<String>,
    /// Transport used for every signal when `endpoint` is set.
    pub protocol: Protocol,
    /// Threshold for the console layer.
    pub stdout_log_level: LogLevel,
    /// Threshold for records forwarded to the OpenTelemetry log pipeline.
    pub otel_log_level: LogLevel,
    /// `service.name` resource attribute.
    pub service_name: String,
    /// `service.version` resource attribute.
    pub service_version: String,
    /// `deployment.environment` resource attribute.
    pub deployment_environment: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::resolve()
    }
}

impl TelemetryConfig {
    /// Resolves configuration from the process environment, falling back to
    /// a `.env` file for keys the process environment lacks.
    pub fn resolve() -> Self {
        let ambient = AmbientEnv::load();
        Self::resolve_from(|key| ambient.get(key))
    }

    /// Resolves configuration through an arbitrary lookup function.
    pub fn resolve_from<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = lookup(ENDPOINT_VAR)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let protocol = lookup(PROTOCOL_VAR)
            .map(|v| Protocol::resolve(&v))
            .unwrap_or_default();
        let level = |key: &str| {
            lookup(key)
                .map(|v| LogLevel::resolve(&v))
                .unwrap_or_default()
        };

        Self {
            endpoint,
            protocol,
            stdout_log_level: level(STDOUT_LOG_LEVEL_VAR),
            otel_log_level: level(OTEL_LOG_LEVEL_VAR),
            service_name: lookup(SERVICE_NAME_VAR)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string()),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            deployment_environment: lookup(ENVIRONMENT_VAR)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "dev".to_string()),
        }
    }

    /// Whether any exporter will be built for this configuration.
    pub fn exporting(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Resource shared by all providers built from this configuration.
    pub fn resource(&self) -> Resource {
        Resource::builder()
            .with_service_name(self.service_name.clone())
            .with_attributes([
                KeyValue::new("service.version", self.service_version.clone()),
                KeyValue::new("deployment.environment", self.deployment_environment.clone()),
            ])
            .build()
    }
}

/// Looks up a single key the way [`TelemetryConfig::resolve`] does: process
/// environment first, then `.env`.
pub fn ambient_var(key: &str) -> Option<String> {
    AmbientEnv::load().get(key)
}

/// Process environment with a `.env` file behind it.
struct AmbientEnv {
    dotenv: HashMap<String, String>,
}

impl AmbientEnv {
    fn load() -> Self {
        let dotenv = dotenvy::dotenv_iter()
            .map(|iter| iter.filter_map(Result::ok).collect())
            .unwrap_or_default();
        Self { dotenv }
    }

    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .or_else(|| self.dotenv.get(key).cloned())
    }
}
