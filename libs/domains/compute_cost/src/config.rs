//! Explicit configuration values handed to each component's constructor.

use rust_decimal::Decimal;

pub const DEFAULT_RETAIL_PRICES_URL: &str = "https://prices.azure.com/api/retail/prices";
pub const DEFAULT_RETAIL_API_VERSION: &str = "2021-10-01-preview";
pub const DEFAULT_COST_MANAGEMENT_URL: &str = "https://management.azure.com";
pub const DEFAULT_COST_API_VERSION: &str = "2021-10-01";
pub const DEFAULT_MANAGEMENT_RESOURCE: &str = "https://management.azure.com";

/// Public retail price catalog
#[derive(Debug, Clone)]
pub struct RetailCatalogConfig {
    pub base_url: String,
    pub api_version: String,
    /// Value of the `meterRegion` parameter
    pub meter_region: String,
    /// Upper bound on `NextPageLink` pages followed per lookup
    pub max_pages: usize,
}

impl Default for RetailCatalogConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_RETAIL_PRICES_URL.to_string(),
            api_version: DEFAULT_RETAIL_API_VERSION.to_string(),
            meter_region: "'primary'".to_string(),
            max_pages: 5,
        }
    }
}

/// Billed-cost query service
#[derive(Debug, Clone)]
pub struct CostManagementConfig {
    pub endpoint: String,
    pub api_version: String,
    /// Query scope, e.g. `subscriptions/<id>`
    pub scope: String,
    /// Resource the bearer token is requested for
    pub resource_scope: String,
    /// Multiplier turning a row's cost/usage ratio into an hourly rate.
    ///
    /// Depends on the query granularity. Needs confirmation from the
    /// billing owners before anything other than 1 is used.
    pub normalization_factor: Decimal,
}

impl CostManagementConfig {
    pub fn for_subscription(subscription_id: &str) -> Self {
        Self {
            endpoint: DEFAULT_COST_MANAGEMENT_URL.to_string(),
            api_version: DEFAULT_COST_API_VERSION.to_string(),
            scope: format!("subscriptions/{}", subscription_id),
            resource_scope: DEFAULT_MANAGEMENT_RESOURCE.to_string(),
            normalization_factor: Decimal::ONE,
        }
    }

    pub fn query_url(&self) -> String {
        format!(
            "{}/{}/providers/Microsoft.CostManagement/query",
            self.endpoint.trim_end_matches('/'),
            self.scope.trim_matches('/')
        )
    }
}

/// Cluster usage report endpoint
#[derive(Debug, Clone)]
pub struct UsageReportConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Value of the `granularity` parameter
    pub granularity: String,
}

impl UsageReportConfig {
    pub fn new(base_url: &str, username: &str, password: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            granularity: "total".to_string(),
        }
    }
}
