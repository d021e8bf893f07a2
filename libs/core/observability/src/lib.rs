//! Observability utilities for the compute cost reconciler.
//!
//! This crate provides:
//! - Prometheus metrics recording and export
//! - Counters for cache lookups, upstream requests and produced cost records
//!
//! # Example
//!
//! ```rust,ignore
//! use observability::{init_metrics, render_metrics, CostMetrics};
//!
//! init_metrics();
//!
//! CostMetrics::record_cache_lookup("retail", "hit");
//! CostMetrics::record_upstream_request("cost_management", 429);
//!
//! println!("{}", render_metrics());
//! ```

pub mod cost;

pub use cost::CostMetrics;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::{info, warn};

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize the Prometheus metrics recorder.
///
/// Call once at startup. Returns `None` when another recorder was already
/// installed in this process.
pub fn init_metrics() -> Option<&'static PrometheusHandle> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Some(handle);
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("Prometheus metrics recorder initialized");
            register_metric_descriptions();
            Some(METRICS_HANDLE.get_or_init(|| handle))
        }
        Err(e) => {
            warn!(error = %e, "Failed to install Prometheus recorder");
            None
        }
    }
}

/// Get the metrics handle (must call init_metrics first)
pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Prometheus text exposition of everything recorded so far
pub fn render_metrics() -> String {
    match get_metrics_handle() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

fn register_metric_descriptions() {
    use metrics::{describe_counter, describe_histogram};

    describe_counter!(
        cost::CACHE_LOOKUPS,
        "Response cache lookups by cache and result (hit, miss, bypass)"
    );
    describe_counter!(
        cost::UPSTREAM_REQUESTS,
        "Requests sent to remote services by service and status"
    );
    describe_counter!(
        cost::COST_RECORDS,
        "Cost records produced by pricing path"
    );
    describe_histogram!(
        cost::BATCH_SIZE,
        "Usage details priced per aggregation call"
    );
}
