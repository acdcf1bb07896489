//! Prometheus metrics for the saga runtime.
//!
//! Counters recorded across the workspace:
//!
//! | Name | Labels | Meaning |
//! |---|---|---|
//! | `saga.publish.acked` | `topic` | Broker stored a published event |
//! | `saga.publish.failed` | `topic` | Publish failed or timed out |
//! | `saga.dead_letter.routed` | `topic` | Record stored on a dead-letter topic |
//! | `saga.dispatch.nacked` | `event_type` | Handler returned an error |
//! | `saga.lifecycle.out_of_order` | `event_type` | Event did not fit the order status |
//! | `saga.lifecycle.duplicate` | | Event id already applied |
//!
//! # Example
//!
//! ```rust,no_run
//! use order_saga_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics recorder
    #[error("Failed to install metrics recorder: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes the saga counters on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server bound to `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and start serving `/metrics`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or a recorder
    /// is already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        metrics::set_global_recorder(recorder).map_err(|e| MetricsError::Install(e.to_string()))?;
        describe_saga_metrics();

        let addr = self.addr;
        tokio::spawn(async move {
            // ExporterError implements neither Debug nor Display.
            if exporter.await.is_err() {
                tracing::error!(addr = %addr, "Metrics exporter stopped");
            }
        });

        tracing::info!(addr = %self.addr, "Metrics server started - available at http://{}/metrics", self.addr);
        self.handle = Some(handle);
        Ok(())
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn describe_saga_metrics() {
    describe_counter!("saga.publish.acked", "Events stored by the broker");
    describe_counter!("saga.publish.failed", "Event publishes that failed or timed out");
    describe_counter!("saga.dead_letter.routed", "Records stored on a dead-letter topic");
    describe_counter!("saga.dispatch.nacked", "Handler attempts that returned an error");
    describe_counter!("saga.lifecycle.out_of_order", "Events that did not fit the order status");
    describe_counter!("saga.lifecycle.duplicate", "Events whose id was already applied");
}
