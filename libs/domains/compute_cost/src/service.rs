use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use strum::Display;
use tracing::{info, instrument};

use crate::aggregator::{PriceSource, UsageCostAggregator};
use crate::billed::{BilledCostQueryClient, CostDataAvailability};
use crate::error::CostResult;
use crate::meter::{MeterIdentity, MeterIdentityResolver};
use crate::models::{CostRecord, PricingTier, RetailPriceEntry};
use crate::retail::RetailPriceResolver;
use crate::usage::UsageSource;

/// Which price source a window is reconciled against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PricingStrategy {
    /// Actual spend from the cost-management service
    Billed,
    /// Public list prices
    Retail,
}

struct BilledPath {
    client: BilledCostQueryClient,
    availability: Arc<dyn CostDataAvailability>,
}

/// Unified cost query surface
pub struct PricingFacade {
    usage: Arc<dyn UsageSource>,
    retail: RetailPriceResolver,
    meters: MeterIdentityResolver,
    billed: Option<BilledPath>,
    aggregator: UsageCostAggregator,
}

impl PricingFacade {
    /// Facade that prices everything from the retail catalog
    pub fn new(
        usage: Arc<dyn UsageSource>,
        retail: RetailPriceResolver,
        meters: MeterIdentityResolver,
    ) -> Self {
        Self {
            usage,
            retail,
            meters,
            billed: None,
            aggregator: UsageCostAggregator::new(),
        }
    }

    /// Enable the billed path, probing availability through the client itself
    pub fn with_billed_costs(self, client: BilledCostQueryClient) -> Self {
        let availability: Arc<dyn CostDataAvailability> = Arc::new(client.clone());
        self.with_billed_costs_and_availability(client, availability)
    }

    pub fn with_billed_costs_and_availability(
        mut self,
        client: BilledCostQueryClient,
        availability: Arc<dyn CostDataAvailability>,
    ) -> Self {
        self.billed = Some(BilledPath {
            client,
            availability,
        });
        self
    }

    /// Billed when a billed client is configured and has data for the window
    pub async fn select_strategy(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CostResult<PricingStrategy> {
        match &self.billed {
            Some(billed) if billed.availability.has_billed_cost_data(start, end).await? => {
                Ok(PricingStrategy::Billed)
            }
            _ => Ok(PricingStrategy::Retail),
        }
    }

    /// Cost records for every node array of the given clusters
    #[instrument(skip(self))]
    pub async fn get_cluster_cost(
        &self,
        clusters: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CostResult<Vec<CostRecord>> {
        let strategy = self.select_strategy(start, end).await?;
        info!(%strategy, "Selected pricing strategy");

        let mut usage = Vec::new();
        for cluster in clusters {
            usage.extend(self.usage.usage(cluster, start, end).await?);
        }

        match (&self.billed, strategy) {
            (Some(billed), PricingStrategy::Billed) => {
                let table = billed.client.query(start, end, clusters).await?;
                self.aggregator
                    .aggregate(&usage, PriceSource::Table(&table))
                    .await
            }
            _ => {
                self.aggregator
                    .aggregate(&usage, PriceSource::Retail(&self.retail))
                    .await
            }
        }
    }

    /// Retail rate for a single SKU
    pub async fn retail_rate(
        &self,
        sku_name: &str,
        region: &str,
        pricing_tier: PricingTier,
    ) -> CostResult<RetailPriceEntry> {
        self.retail.resolve(sku_name, region, pricing_tier).await
    }

    pub async fn meter_identities(&self, meter_id: &str) -> CostResult<BTreeSet<MeterIdentity>> {
        self.meters.resolve(meter_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccessToken, MockTokenProvider};
    use crate::billed::{AzureCostQueryRenderer, MockCostDataAvailability};
    use crate::cache::{CachePolicy, MemoryCacheStore, ResponseCache};
    use crate::config::{CostManagementConfig, RetailCatalogConfig};
    use crate::error::CostError;
    use crate::http::{HttpClient, HttpResponse, MockHttpClient};
    use crate::models::{NodeArrayUsage, UsageDetail};
    use crate::usage::MockUsageSource;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        (start, start + Duration::days(1))
    }

    fn usage_source() -> MockUsageSource {
        let mut usage = MockUsageSource::new();
        usage.expect_usage().returning(|cluster, _, _| {
            Ok(vec![NodeArrayUsage {
                cluster: cluster.to_string(),
                node_array: "hpc".to_string(),
                details: vec![UsageDetail {
                    sku_name: "Standard_F2s_v2".to_string(),
                    region: "eastus".to_string(),
                    pricing_tier: PricingTier::Regular,
                    hours: dec!(10),
                    core_count: 2,
                }],
            }])
        });
        usage
    }

    fn retail_item() -> serde_json::Value {
        json!({
            "type": "Consumption",
            "productName": "Virtual Machines FSv2 Series",
            "meterName": "F2s v2",
            "meterId": "meter-retail",
            "serviceName": "Virtual Machines",
            "armSkuName": "Standard_F2s_v2",
            "armRegionName": "eastus",
            "retailPrice": 0.085,
            "currencyCode": "USD"
        })
    }

    fn retail_cache() -> ResponseCache {
        ResponseCache::new(
            "retail",
            Arc::new(MemoryCacheStore::new()),
            CachePolicy::get_only(std::time::Duration::from_secs(3600)),
        )
    }

    fn facade(http: MockHttpClient) -> (PricingFacade, Arc<dyn HttpClient>) {
        let http: Arc<dyn HttpClient> = Arc::new(http);
        let facade = PricingFacade::new(
            Arc::new(usage_source()),
            RetailPriceResolver::new(http.clone(), retail_cache(), RetailCatalogConfig::default()),
            MeterIdentityResolver::new(http.clone(), retail_cache(), RetailCatalogConfig::default()),
        );
        (facade, http)
    }

    fn billed_client(http: Arc<dyn HttpClient>) -> BilledCostQueryClient {
        let mut tokens = MockTokenProvider::new();
        tokens.expect_get_token().returning(|_| {
            Ok(AccessToken {
                token: "token".to_string(),
                expires_at: Utc::now() + Duration::hours(1),
            })
        });
        BilledCostQueryClient::new(
            http.clone(),
            ResponseCache::new(
                "cost",
                Arc::new(MemoryCacheStore::new()),
                CachePolicy::get_and_post(std::time::Duration::from_secs(3600)),
            ),
            Arc::new(tokens),
            Arc::new(AzureCostQueryRenderer),
            MeterIdentityResolver::new(http, retail_cache(), RetailCatalogConfig::default()),
            CostManagementConfig::for_subscription("sub-1"),
        )
    }

    #[tokio::test]
    async fn test_without_billed_client_uses_retail() {
        let mut http = MockHttpClient::new();
        http.expect_send()
            .times(1)
            .returning(|_| Ok(HttpResponse::ok(json!({"Items": [retail_item()]}))));
        let (facade, _) = facade(http);
        let (start, end) = window();

        assert_eq!(
            facade.select_strategy(start, end).await.unwrap(),
            PricingStrategy::Retail
        );
        let records = facade
            .get_cluster_cost(&["demo".to_string()], start, end)
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].cluster, "demo");
        assert_eq!(records[0].cost, dec!(0.425));
        assert_eq!(records[0].meter_id, "meter-retail");
    }

    #[tokio::test]
    async fn test_billed_data_available_uses_price_table() {
        let mut http = MockHttpClient::new();
        http.expect_send()
            .withf(|req| req.url.ends_with("Microsoft.CostManagement/query"))
            .times(1)
            .returning(|_| {
                Ok(HttpResponse::ok(json!({"properties": {"rows": [[
                    5.0, 50.0, "eastus", "meter-billed", "F2s v2", "Virtual Machines",
                    "FSv2 Series", "rg-hpc", ["clustername:demo"], "USD"
                ]]}})))
            });
        http.expect_send()
            .withf(|req| req.param_value("$filter") == Some("meterId eq 'meter-billed'"))
            .times(1)
            .returning(|_| {
                Ok(HttpResponse::ok(json!({"Items": [
                    {"armSkuName": "Standard_F2s_v2", "armRegionName": "eastus"}
                ]})))
            });

        let mut availability = MockCostDataAvailability::new();
        availability
            .expect_has_billed_cost_data()
            .times(1)
            .returning(|_, _| Ok(true));

        let (facade, http) = facade(http);
        let facade = facade
            .with_billed_costs_and_availability(billed_client(http), Arc::new(availability));
        let (start, end) = window();

        let records = facade
            .get_cluster_cost(&["demo".to_string()], start, end)
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rate, dec!(0.1));
        assert_eq!(records[0].cost, dec!(0.5));
        assert_eq!(records[0].resource_group.as_deref(), Some("rg-hpc"));
    }

    #[tokio::test]
    async fn test_no_billed_data_falls_back_to_retail() {
        let mut http = MockHttpClient::new();
        http.expect_send()
            .withf(|req| req.param_value("$filter").is_some_and(|f| f.contains("armSkuName")))
            .times(1)
            .returning(|_| Ok(HttpResponse::ok(json!({"Items": [retail_item()]}))));

        let mut availability = MockCostDataAvailability::new();
        availability
            .expect_has_billed_cost_data()
            .returning(|_, _| Ok(false));

        let (facade, http) = facade(http);
        let facade = facade
            .with_billed_costs_and_availability(billed_client(http), Arc::new(availability));
        let (start, end) = window();

        let records = facade
            .get_cluster_cost(&["demo".to_string()], start, end)
            .await
            .unwrap();
        assert_eq!(records[0].rate, dec!(0.085));
    }

    #[tokio::test]
    async fn test_availability_failure_propagates() {
        let mut availability = MockCostDataAvailability::new();
        availability.expect_has_billed_cost_data().returning(|_, _| {
            Err(CostError::RateLimited {
                headers: vec![],
                retry_after: None,
            })
        });

        let (facade, http) = facade(MockHttpClient::new());
        let facade = facade
            .with_billed_costs_and_availability(billed_client(http), Arc::new(availability));
        let (start, end) = window();

        let err = facade
            .get_cluster_cost(&["demo".to_string()], start, end)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_billed_client_probes_availability_itself() {
        let mut http = MockHttpClient::new();
        http.expect_send()
            .withf(|req| req.url.ends_with("Microsoft.CostManagement/query"))
            .times(1)
            .returning(|_| Ok(HttpResponse::ok(json!({"properties": {"rows": []}}))));

        let (facade, http) = facade(http);
        let facade = facade.with_billed_costs(billed_client(http));
        let (start, end) = window();

        assert_eq!(
            facade.select_strategy(start, end).await.unwrap(),
            PricingStrategy::Retail
        );
    }
}
