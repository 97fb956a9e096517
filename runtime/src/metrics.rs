//! Prometheus metrics for the coordination layer.
//!
//! Counters and histograms are recorded through the `metrics` facade by every
//! component. Without an installed recorder they are no-ops, so libraries and
//! tests never need to set one up. A service that wants them scraped starts a
//! [`MetricsServer`].
//!
//! # Example
//!
//! ```rust,no_run
//! use concord_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Prometheus metrics exporter.
///
/// Serves metrics over HTTP at the configured address.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the exporter.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] if the exporter cannot be built, for
    /// example when the listener address is taken. A recorder that is already
    /// installed is tolerated with a warning.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let (recorder, exporter) = builder
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();

        match metrics::set_global_recorder(recorder) {
            Ok(()) => {
                tokio::spawn(async move {
                    if let Err(e) = exporter.await {
                        tracing::error!(error = ?e, "Metrics exporter stopped");
                    }
                });
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics exporter started");
                Ok(())
            },
            Err(_) => {
                tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                Ok(())
            },
        }
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Lock coordinator
    describe_counter!("lock_acquired_total", "Locks acquired and critical sections run");
    describe_counter!("lock_skipped_total", "Lock attempts that found the lock held elsewhere");
    describe_counter!(
        "lock_degraded_total",
        "Critical sections run without a lock (no store or store error)"
    );
    describe_counter!(
        "lock_release_failures_total",
        "Releases that failed or found the lock expired or stolen"
    );

    // Event publisher
    describe_counter!("events_published_total", "Events accepted by the broker");
    describe_counter!("events_publish_errors_total", "Publish calls that returned an error");
    describe_counter!(
        "events_backpressure_waits_total",
        "Times a publish waited for the channel buffer to drain"
    );

    // Retry
    describe_counter!("retry_attempts_total", "Retries scheduled after a transient failure");
    describe_counter!("retry_successes_total", "Operations that succeeded after retrying");
    describe_counter!("retry_exhausted_total", "Operations that failed after max retries");

    // RPC client
    describe_counter!("rpc_attempts_total", "HTTP attempts made by the RPC client");
    describe_counter!("rpc_failures_total", "RPC calls that ended in an error");
    describe_histogram!("rpc_call_duration_seconds", "Whole-call RPC latency including retries");
}

/// Lock coordinator metrics recorder.
pub struct LockMetrics;

impl LockMetrics {
    /// Record a lock acquired.
    pub fn record_acquired() {
        counter!("lock_acquired_total").increment(1);
    }

    /// Record a lock held elsewhere.
    pub fn record_skipped() {
        counter!("lock_skipped_total").increment(1);
    }

    /// Record a run without lock protection.
    pub fn record_degraded() {
        counter!("lock_degraded_total").increment(1);
    }

    /// Record a failed release.
    pub fn record_release_failure() {
        counter!("lock_release_failures_total").increment(1);
    }
}

/// Event publisher metrics recorder.
pub struct PublishMetrics;

impl PublishMetrics {
    /// Record an accepted event.
    pub fn record_published() {
        counter!("events_published_total").increment(1);
    }

    /// Record a failed publish.
    pub fn record_error() {
        counter!("events_publish_errors_total").increment(1);
    }

    /// Record a wait on the drain signal.
    pub fn record_backpressure_wait() {
        counter!("events_backpressure_waits_total").increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}

/// RPC client metrics recorder.
pub struct RpcMetrics;

impl RpcMetrics {
    /// Record one HTTP attempt.
    pub fn record_attempt() {
        counter!("rpc_attempts_total").increment(1);
    }

    /// Record a finished call.
    pub fn record_call(duration: Duration, success: bool) {
        histogram!("rpc_call_duration_seconds").record(duration.as_secs_f64());
        if !success {
            counter!("rpc_failures_total").increment(1);
        }
    }
}
