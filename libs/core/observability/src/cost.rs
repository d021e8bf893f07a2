//! Metrics for the pricing reconciliation engine.

use metrics::{counter, histogram};

pub const CACHE_LOOKUPS: &str = "compute_cost_cache_lookups_total";
pub const UPSTREAM_REQUESTS: &str = "compute_cost_upstream_requests_total";
pub const COST_RECORDS: &str = "compute_cost_records_total";
pub const BATCH_SIZE: &str = "compute_cost_aggregation_batch_size";

/// Cost reconciliation metrics recorder
pub struct CostMetrics;

impl CostMetrics {
    /// Record a response cache lookup; `result` is `hit`, `miss` or `bypass`
    pub fn record_cache_lookup(cache: &str, result: &str) {
        counter!(CACHE_LOOKUPS, "cache" => cache.to_string(), "result" => result.to_string())
            .increment(1);
    }

    /// Record a request that actually reached a remote service
    pub fn record_upstream_request(service: &str, status: u16) {
        counter!(
            UPSTREAM_REQUESTS,
            "service" => service.to_string(),
            "status" => status.to_string()
        )
        .increment(1);

        if status == 429 {
            tracing::debug!(service = service, "Upstream throttled request");
        }
    }

    /// Record the records produced by one aggregation; `path` is `billed` or `retail`
    pub fn record_cost_records(path: &str, count: usize) {
        counter!(COST_RECORDS, "path" => path.to_string()).increment(count as u64);
        histogram!(BATCH_SIZE, "path" => path.to_string()).record(count as f64);
    }
}
