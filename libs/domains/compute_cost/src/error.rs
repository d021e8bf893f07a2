use thiserror::Error;

use crate::models::PricingTier;

/// Result type for compute cost operations
pub type CostResult<T> = Result<T, CostError>;

/// Errors that can occur while reconciling usage with pricing data
#[derive(Debug, Error)]
pub enum CostError {
    /// A remote dependency answered with a non-success status
    #[error("Upstream returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    /// The cost-management service throttled the request (HTTP 429)
    #[error("Rate limited by upstream (retry after {retry_after:?}s)")]
    RateLimited {
        headers: Vec<(String, String)>,
        retry_after: Option<u64>,
    },

    /// Token acquisition failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// No retail catalog entry survived the selection filters
    #[error("No retail rate for {sku_name} in {region} ({tier})")]
    RateNotFound {
        sku_name: String,
        region: String,
        tier: PricingTier,
    },

    /// A usage detail could not be priced, the whole batch is abandoned
    #[error("Pricing unavailable for {sku_name} in {region} (node array {node_array}): {source}")]
    PricingUnavailable {
        node_array: String,
        sku_name: String,
        region: String,
        #[source]
        source: Box<CostError>,
    },

    /// Storage I/O failure in the response cache
    #[error("Cache backend error: {0}")]
    CacheBackend(String),

    /// Usage input violates a precondition (e.g. zero core count)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// Transport-level HTTP failure
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Upstream payload did not have the expected shape
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Component was built with an unusable configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CostError {
    /// Whether a caller-driven retry could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            CostError::RateLimited { .. } | CostError::Transport(_) => true,
            CostError::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn upstream(status: u16, body: &serde_json::Value) -> Self {
        let body = match body {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        CostError::Upstream { status, body }
    }
}

impl From<serde_json::Error> for CostError {
    fn from(err: serde_json::Error) -> Self {
        CostError::Parse(err.to_string())
    }
}
