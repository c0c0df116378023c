//! Prometheus metrics for observability and monitoring.
//!
//! Metrics are recorded through the `metrics` facade; without an installed
//! recorder they are no-ops. Binaries call [`install_prometheus_recorder`]
//! once at startup and render the returned handle.
//!
//! # Example
//!
//! ```rust,no_run
//! use async_lifecycle_runtime::metrics::install_prometheus_recorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! if let Some(handle) = install_prometheus_recorder()? {
//!     println!("{}", handle.render());
//! }
//! # Ok(())
//! # }
//! ```

use async_lifecycle_core::LifecycleStatus;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
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

/// Describe metrics and install the Prometheus recorder.
///
/// Returns `Ok(None)` if a recorder is already installed, which happens when
/// several tests in one process call this.
///
/// # Errors
///
/// Returns [`MetricsError`] if the exporter cannot be built or installed.
pub fn install_prometheus_recorder() -> Result<Option<PrometheusHandle>, MetricsError> {
    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[
                0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1,
            ],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?;

    match builder.install_recorder() {
        Ok(handle) => {
            register_metrics();
            tracing::info!("Prometheus metrics recorder installed");
            Ok(Some(handle))
        },
        Err(e) => {
            let err_msg = e.to_string();
            if err_msg.contains("already initialized") {
                tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                Ok(None)
            } else {
                Err(MetricsError::Install(err_msg))
            }
        },
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Lifecycle
    describe_counter!(
        "async_lifecycle.notifications",
        "Lifecycle notifications dispatched, labelled by status"
    );
    describe_counter!(
        "async_lifecycle.operations.started",
        "Operations actually invoked"
    );
    describe_counter!(
        "async_lifecycle.operations.deduped",
        "Calls routed to an operation already in flight"
    );
    describe_counter!(
        "async_lifecycle.operations.cache_hits",
        "Calls served from a cached response"
    );
    describe_counter!(
        "async_lifecycle.operations.failed",
        "Operations that settled with a failure"
    );
    describe_gauge!(
        "async_lifecycle.in_flight",
        "Operations currently in flight"
    );

    // Store
    describe_counter!("store.commands.total", "Actions sent to a store");
    describe_counter!(
        "store.effects.executed",
        "Effects executed by a store, labelled by effect type"
    );
    describe_counter!(
        "store.shutdown.rejected_actions",
        "Actions rejected because the store was shutting down"
    );
    describe_histogram!(
        "store.reducer.duration_seconds",
        "Time taken to run the reducer for one action"
    );
}

/// Lifecycle metrics recorder.
pub struct LifecycleMetrics;

impl LifecycleMetrics {
    /// Record a dispatched notification.
    pub fn record_notification(status: LifecycleStatus) {
        counter!("async_lifecycle.notifications", "status" => status.label()).increment(1);
    }

    /// Record an operation being invoked.
    pub fn record_started() {
        counter!("async_lifecycle.operations.started").increment(1);
    }

    /// Record a deduplicated call.
    pub fn record_deduped() {
        counter!("async_lifecycle.operations.deduped").increment(1);
    }

    /// Record a cache hit.
    pub fn record_cache_hit() {
        counter!("async_lifecycle.operations.cache_hits").increment(1);
    }

    /// Record a failed operation.
    pub fn record_failed() {
        counter!("async_lifecycle.operations.failed").increment(1);
    }

    /// Record the size of the in-flight table.
    #[allow(clippy::cast_precision_loss)] // in-flight counts stay far below 2^52
    pub fn record_in_flight(count: usize) {
        gauge!("async_lifecycle.in_flight").set(count as f64);
    }
}

/// Store metrics recorder.
pub struct StoreMetrics;

impl StoreMetrics {
    /// Record an action accepted by a store.
    pub fn record_command() {
        counter!("store.commands.total").increment(1);
    }

    /// Record the reducer run for one action.
    pub fn record_reducer(duration: Duration) {
        histogram!("store.reducer.duration_seconds").record(duration.as_secs_f64());
    }

    /// Record an executed effect.
    pub fn record_effect(kind: &'static str) {
        counter!("store.effects.executed", "type" => kind).increment(1);
    }

    /// Record an action rejected during shutdown.
    pub fn record_rejected() {
        counter!("store.shutdown.rejected_actions").increment(1);
    }
}
