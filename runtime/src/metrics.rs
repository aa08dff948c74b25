//! Prometheus metrics for transactional traversals.
//!
//! Counters are recorded through the `metrics` facade whether or not a
//! recorder is installed. [`MetricsRecorder::install`] installs the
//! Prometheus recorder so they can be rendered for scraping.
//!
//! # Example
//!
//! ```rust,no_run
//! use traverse_tx_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.install()?;
//!
//! // ... drive some wrapped traversals ...
//!
//! if let Some(text) = recorder.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Transactions committed after a drive.
pub const COMMITS_TOTAL: &str = "traverse_tx_commits_total";
/// Transactions rolled back after a drive.
pub const ROLLBACKS_TOTAL: &str = "traverse_tx_rollbacks_total";
/// Drives stopped by the consumer before exhaustion.
pub const EARLY_STOPS_TOTAL: &str = "traverse_tx_early_stops_total";
/// Drives that ended with a production error.
pub const FAILURES_TOTAL: &str = "traverse_tx_failures_total";
/// Lazy calls handed to the method-scoped interceptor.
pub const DELEGATED_TOTAL: &str = "traverse_tx_delegated_total";
/// Wall time of a transactional drive.
pub const DRIVE_DURATION_SECONDS: &str = "traverse_tx_drive_duration_seconds";

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

/// Installs the Prometheus recorder and renders its output.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsRecorder")
            .field("installed", &self.handle.is_some())
            .finish()
    }
}

impl MetricsRecorder {
    /// Create a recorder that is not installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// Only one global recorder can exist. When one is already installed
    /// (e.g., by another test) this logs a warning, returns `Ok`, and
    /// [`render`](Self::render) returns `None`.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        describe_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
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
    /// Returns `None` if this recorder was not the one installed.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn describe_metrics() {
    describe_counter!(COMMITS_TOTAL, "Total number of transactions committed after a traversal");
    describe_counter!(
        ROLLBACKS_TOTAL,
        "Total number of transactions rolled back after a traversal"
    );
    describe_counter!(
        EARLY_STOPS_TOTAL,
        "Total number of traversals stopped by the consumer before exhaustion"
    );
    describe_counter!(
        FAILURES_TOTAL,
        "Total number of traversals that ended with a production error"
    );
    describe_counter!(
        DELEGATED_TOTAL,
        "Total number of lazy calls delegated to the method-scoped interceptor"
    );
    describe_histogram!(DRIVE_DURATION_SECONDS, "Time taken by a transactional traversal");
}

/// Traversal outcome metrics recorder.
pub struct TraversalMetrics;

impl TraversalMetrics {
    /// Record a commit.
    pub fn record_commit() {
        counter!(COMMITS_TOTAL).increment(1);
    }

    /// Record a rollback.
    pub fn record_rollback() {
        counter!(ROLLBACKS_TOTAL).increment(1);
    }

    /// Record a drive stopped before exhaustion.
    pub fn record_early_stop() {
        counter!(EARLY_STOPS_TOTAL).increment(1);
    }

    /// Record a drive ending with a production error.
    pub fn record_failure() {
        counter!(FAILURES_TOTAL).increment(1);
    }

    /// Record how long a drive took.
    pub fn record_duration(duration: Duration) {
        histogram!(DRIVE_DURATION_SECONDS).record(duration.as_secs_f64());
    }
}

/// Dispatch metrics recorder.
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record a lazy call handed to the method-scoped interceptor.
    pub fn record_delegated(manager: &str) {
        counter!(DELEGATED_TOTAL, "manager" => manager.to_string()).increment(1);
    }
}
