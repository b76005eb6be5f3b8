// SPDX-License-Identifier: MIT
use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use opentelemetry::metrics::Counter;
use opentelemetry::trace::{Span, Tracer};
use opentelemetry::KeyValue;
use otel_bootstrap::config::{self, TelemetryConfig};
use otel_bootstrap::lifecycle::LifecycleManager;
use otel_bootstrap::registry;
use otel_bootstrap::telemetry::init_telemetry;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

const PORT_VAR: &str = "PORT";
const DEFAULT_PORT: u16 = 8025;
/// How long in-flight requests may keep the server alive after shutdown.
const SERVER_STOP_GRACE: Duration = Duration::from_secs(5);
const INDEX_HTML: &str = "<!doctype html><html><body><h1>otel-bootstrap</h1></body></html>";

#[derive(Clone)]
struct AppState {
    requests: Counter<u64>,
}

#[instrument(skip(state))]
async fn index(State(state): State<AppState>) -> Html<&'static str> {
    state.requests.add(1, &[KeyValue::new("route", "/")]);
    info!(route = "/", "serving index");
    Html(INDEX_HTML)
}

#[instrument(skip(state))]
async fn q(State(state): State<AppState>) -> &'static str {
    state.requests.add(1, &[KeyValue::new("route", "/q")]);
    info!(route = "/q", "serving q");
    "Rust123!\n"
}

/// Startup records so a fresh deployment shows up in every backend.
fn emit_startup_telemetry() {
    warn!(event = "acelink1", "acelink1");
    info!(user_id = 444, method = "oauth", "user login successful");
    info!(user_id = 123456, username = "johndoe", "user johndoe logged in");

    let tracer = registry::global().tracer("local-test-tracer");
    let mut span = tracer.start("test-span");
    span.add_event("test-event", vec![KeyValue::new("foo", "bar")]);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        span.end();
    });
}

fn port<F>(lookup: F) -> u16
where
    F: Fn(&str) -> Option<String>,
{
    lookup(PORT_VAR)
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

/// Waits up to `grace` for the server task, aborting it after that.
async fn join_server(mut server: JoinHandle<io::Result<()>>, grace: Duration) {
    match tokio::time::timeout(grace, &mut server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(error = %e, "server stopped with error"),
        Ok(Err(e)) => error!(error = %e, "server task failed"),
        Err(_) => {
            warn!(?grace, "in-flight requests did not finish, aborting server");
            server.abort();
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let config = TelemetryConfig::resolve();
    init_telemetry(&config).context("telemetry init")?;
    info!(
        exporting = config.exporting(),
        service = %config.service_name,
        "application started"
    );
    emit_startup_telemetry();

    let state = AppState {
        requests: registry::global()
            .meter("http")
            .u64_counter("http.server.requests")
            .with_description("Requests served by route")
            .build(),
    };
    let app = Router::new()
        .route("/", get(index))
        .route("/q", get(q))
        .with_state(state);

    let addr = format!("0.0.0.0:{}", port(config::ambient_var));
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(%addr, "listening");

    let token = CancellationToken::new();
    let stopped = token.clone().cancelled_owned();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(stopped)
            .await
    });

    let lifecycle = LifecycleManager::attach(registry::global(), Arc::new(token));
    let outcome = lifecycle.run().await;

    join_server(server, SERVER_STOP_GRACE).await;
    Ok(outcome.exit_code())
}
