// SPDX-License-Identifier: MIT
//! Signal driven shutdown.
//!
//! On SIGINT or SIGTERM the [`LifecycleManager`] stops the HTTP server first,
//! so no new telemetry is produced, then drains the registry's active
//! provider set on the blocking pool within a fixed budget. The outcome maps
//! to the process exit status: `0` when every provider shut down cleanly,
//! `1` otherwise.
//!
//! Shutdown runs at most once per manager. A second signal, or a concurrent
//! call, waits for the first run and gets its outcome back.
use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::TelemetryError;
use crate::exporter::EXPORT_TIMEOUT;
use crate::registry::TelemetryRegistry;

/// Default time allowed for draining all providers: one export timeout for
/// each of the three providers, which shut down one after another, plus a
/// little slack.
pub const DEFAULT_SHUTDOWN_BUDGET: Duration =
    Duration::from_secs(3 * EXPORT_TIMEOUT.as_secs() + 5);

/// The part of a running server the lifecycle manager needs.
pub trait ServerHandle: Send + Sync {
    /// Stops accepting new connections.
    fn stop(&self);
}

impl ServerHandle for CancellationToken {
    fn stop(&self) {
        self.cancel();
    }
}

/// What started the shutdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
    /// Programmatic request, or signal listeners could not be installed.
    Requested,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Clean,
    Failed,
}

impl ShutdownOutcome {
    pub const fn code(&self) -> u8 {
        match self {
            Self::Clean => 0,
            Self::Failed => 1,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }
}

/// Coordinates server stop and provider drain.
pub struct LifecycleManager {
    registry: Arc<TelemetryRegistry>,
    server: Arc<dyn ServerHandle>,
    budget: Duration,
    outcome: OnceCell<ShutdownOutcome>,
}

impl LifecycleManager {
    pub fn attach(registry: Arc<TelemetryRegistry>, server: Arc<dyn ServerHandle>) -> Self {
        Self {
            registry,
            server,
            budget: DEFAULT_SHUTDOWN_BUDGET,
            outcome: OnceCell::new(),
        }
    }

    /// Overrides the drain budget.
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Resolves on the first SIGINT or SIGTERM.
    pub async fn wait_for_signal() -> io::Result<ShutdownSignal> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut terminate = signal(SignalKind::terminate())?;
            tokio::select! {
                res = tokio::signal::ctrl_c() => res.map(|()| ShutdownSignal::Interrupt),
                _ = terminate.recv() => Ok(ShutdownSignal::Terminate),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await?;
            Ok(ShutdownSignal::Interrupt)
        }
    }

    /// Waits for a termination signal, then shuts down.
    ///
    /// If the signal listeners cannot be installed the failure is logged and
    /// shutdown proceeds immediately with a failed outcome.
    pub async fn run(&self) -> ShutdownOutcome {
        match Self::wait_for_signal().await {
            Ok(signal) => self.shutdown(signal).await,
            Err(e) => {
                error!(error = %e, "failed to listen for termination signals");
                self.shutdown(ShutdownSignal::Requested).await;
                ShutdownOutcome::Failed
            }
        }
    }

    /// Stops the server, then drains the providers. Only the first call does
    /// any work; every call returns the first call's outcome.
    pub async fn shutdown(&self, signal: ShutdownSignal) -> ShutdownOutcome {
        *self.outcome.get_or_init(|| self.drain(signal)).await
    }

    async fn drain(&self, signal: ShutdownSignal) -> ShutdownOutcome {
        info!(?signal, "shutting down");
        self.server.stop();

        let registry = Arc::clone(&self.registry);
        let drained = tokio::time::timeout(
            self.budget,
            task::spawn_blocking(move || registry.shutdown()),
        )
        .await;
        let result = match drained {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(TelemetryError::from(join)),
            Err(_) => Err(TelemetryError::Timeout(self.budget)),
        };

        match result {
            Ok(()) => {
                info!("telemetry shut down");
                ShutdownOutcome::Clean
            }
            Err(e @ TelemetryError::Timeout(_)) => {
                warn!(error = %e, "pending telemetry dropped");
                ShutdownOutcome::Failed
            }
            Err(e) => {
                error!(error = %e, "telemetry shutdown failed");
                ShutdownOutcome::Failed
            }
        }
    }
}
