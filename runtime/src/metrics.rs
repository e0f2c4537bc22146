//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the store runtime:
//! - Action dispatch and reducer timing
//! - Effect interpretation, by kind
//! - Throttle drops and suppressed dispatches
//! - Registry cancellations and shutdown progress
//!
//! # Example
//!
//! ```rust,no_run
//! use flowstate_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Install the recorder and expose metrics on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Render current metrics in Prometheus text format
//! let snapshot = server.render();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Installs the global recorder and renders metrics for scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to advertise (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Initialize metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns an error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), the call
    /// logs a warning and succeeds without replacing it.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        // Register all metric descriptions
        register_metrics();

        // Build the Prometheus exporter with latency-friendly buckets
        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        // Try to install the recorder
        // In tests, this may fail if a recorder is already installed
        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics recorder installed - scrape endpoint {}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    // Multiple MetricsServer instances may be created in tests;
                    // keep the existing recorder.
                    tracing::warn!(
                        "Metrics recorder already initialized, skipping re-initialization"
                    );
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder hasn't been installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Dispatch metrics
    describe_counter!(
        "store.actions.total",
        "Total number of actions dispatched to the store"
    );
    describe_histogram!(
        "store.reducer.duration_seconds",
        "Time spent in the reducer per action"
    );

    // Effect metrics
    describe_counter!(
        "store.effects.executed",
        "Total number of effects interpreted, labelled by kind"
    );
    describe_counter!(
        "store.effects.throttled.dropped",
        "Throttled effects dropped inside an open rate-limit window"
    );
    describe_counter!(
        "store.dispatch.suppressed",
        "Actions suppressed because their effect was superseded or cancelled"
    );

    // Registry metrics
    describe_counter!(
        "store.registry.cancelled",
        "Registry claims released by explicit cancels and teardown"
    );

    // Listener metrics
    describe_counter!(
        "store.listeners.notified",
        "State listener notifications delivered"
    );

    // Shutdown metrics
    describe_gauge!(
        "store.shutdown.pending_effects",
        "Effects still running while graceful shutdown waits"
    );
}
