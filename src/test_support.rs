// SPDX-License-Identifier: MIT
//! Export sinks and shared state for the unit tests.
use std::time::Duration;

use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::logs::{InMemoryLogExporter, LogBatch, LogExporter};
use opentelemetry_sdk::Resource;
use parking_lot::Mutex;

/// Held by tests that publish into `opentelemetry::global`.
pub(crate) static GLOBALS: Mutex<()> = Mutex::new(());

/// Log exporter that keeps every record it receives, also after shutdown.
///
/// Clones share storage, so a test keeps one clone and installs the other.
#[derive(Clone, Debug, Default)]
pub(crate) struct LogSink {
    records: InMemoryLogExporter,
    delay: Duration,
}

impl LogSink {
    /// A sink whose every export call blocks for `delay` first.
    pub(crate) fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Number of records exported so far.
    pub(crate) fn len(&self) -> usize {
        self.records.get_emitted_logs().expect("logs").len()
    }
}

impl LogExporter for LogSink {
    async fn export(&self, batch: LogBatch<'_>) -> OTelSdkResult {
        if !self.delay.is_zero() {
            // Batch processors export from their own thread.
            std::thread::sleep(self.delay);
        }
        self.records.export(batch).await
    }

    fn shutdown_with_timeout(&self, _timeout: Duration) -> OTelSdkResult {
        Ok(())
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.records.set_resource(resource);
    }
}
