//! Billed-cost queries against the cost-management service.
//!
//! Rows describing compute meters are attributed to (region, sku) pairs
//! through the retail catalog, producing the authoritative [`PriceTable`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::auth::TokenProvider;
use crate::cache::ResponseCache;
use crate::config::CostManagementConfig;
use crate::error::{CostError, CostResult};
use crate::http::{HttpClient, HttpRequest, HttpResponse, bearer_auth_header};
use crate::meter::MeterIdentityResolver;
use crate::models::{CostQueryRow, MeterRate, PriceTable};

const VIRTUAL_MACHINES: &str = "Virtual Machines";
const CLUSTER_TAG: &str = "clustername";

/// Renders the cost-query request body for a window and cluster list
#[cfg_attr(test, mockall::automock)]
pub trait QueryTemplateRenderer: Send + Sync {
    fn render(
        &self,
        clusters: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CostResult<Value>;
}

/// Built-in query: actual cost over a custom period, one row per meter,
/// location and resource group, with tags included.
///
/// The requested columns come back as cost, usage, location, meter id,
/// meter, category, subcategory, resource group, tags, currency, which is
/// the positional layout [`CostQueryRow::from_row`] expects.
#[derive(Debug, Clone, Default)]
pub struct AzureCostQueryRenderer;

impl QueryTemplateRenderer for AzureCostQueryRenderer {
    fn render(
        &self,
        clusters: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CostResult<Value> {
        if end <= start {
            return Err(CostError::Configuration(format!(
                "query window ends ({}) before it starts ({})",
                end, start
            )));
        }

        let grouping: Vec<Value> = [
            "ResourceLocation",
            "MeterId",
            "Meter",
            "MeterCategory",
            "MeterSubcategory",
            "ResourceGroupName",
        ]
        .iter()
        .map(|name| json!({"type": "Dimension", "name": name}))
        .collect();

        let mut dataset = json!({
            "granularity": "None",
            "aggregation": {
                "totalCost": {"name": "PreTaxCost", "function": "Sum"},
                "totalUsage": {"name": "UsageQuantity", "function": "Sum"}
            },
            "grouping": grouping,
            "include": ["Tags"]
        });
        if !clusters.is_empty() {
            dataset["filter"] = json!({
                "tags": {"name": CLUSTER_TAG, "operator": "In", "values": clusters}
            });
        }

        Ok(json!({
            "type": "ActualCost",
            "timeframe": "Custom",
            "timePeriod": {
                "from": start.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                "to": end.format("%Y-%m-%dT%H:%M:%SZ").to_string()
            },
            "dataset": dataset
        }))
    }
}

/// Reports whether billed-cost data covers a window
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CostDataAvailability: Send + Sync {
    async fn has_billed_cost_data(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CostResult<bool>;
}

/// Client for the cost-management query endpoint
#[derive(Clone)]
pub struct BilledCostQueryClient {
    http: Arc<dyn HttpClient>,
    cache: ResponseCache,
    tokens: Arc<dyn TokenProvider>,
    renderer: Arc<dyn QueryTemplateRenderer>,
    meters: MeterIdentityResolver,
    config: CostManagementConfig,
}

impl BilledCostQueryClient {
    pub fn new(
        http: Arc<dyn HttpClient>,
        cache: ResponseCache,
        tokens: Arc<dyn TokenProvider>,
        renderer: Arc<dyn QueryTemplateRenderer>,
        meters: MeterIdentityResolver,
        config: CostManagementConfig,
    ) -> Self {
        Self {
            http,
            cache,
            tokens,
            renderer,
            meters,
            config,
        }
    }

    /// Build the price table for a window.
    ///
    /// Only "Virtual Machines" rows contribute. Each row's rate is
    /// `cost / usage * normalization_factor` and is attributed to every
    /// (region, sku) pair its meter maps to; the first row to claim a pair
    /// keeps it. Rows are not filtered by cluster here.
    #[instrument(skip(self, clusters), fields(clusters = clusters.len()))]
    pub async fn query(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        clusters: &[String],
    ) -> CostResult<PriceTable> {
        let rows = self.fetch_rows(start, end, clusters).await?;
        let mut table = PriceTable::new();

        for row in rows {
            if row.meter_category != VIRTUAL_MACHINES {
                continue;
            }
            if row.usage.is_zero() {
                warn!(meter_id = %row.meter_id, "Skipping row with zero usage");
                continue;
            }

            debug!(
                meter_id = %row.meter_id,
                clusters = ?row.cluster_names(),
                "Attributing compute meter"
            );
            let Some(meter_price) = row
                .cost
                .checked_div(row.usage)
                .and_then(|rate| rate.checked_mul(self.config.normalization_factor))
            else {
                warn!(
                    meter_id = %row.meter_id,
                    cost = %row.cost,
                    usage = %row.usage,
                    "Skipping row whose rate overflows"
                );
                continue;
            };

            let identities = self.meters.resolve(&row.meter_id).await?;
            if identities.is_empty() {
                debug!(meter_id = %row.meter_id, "No catalog identity for meter");
            }

            for identity in identities {
                if identity.sku_name.is_empty() {
                    continue;
                }
                let claimed = table.insert_if_absent(MeterRate {
                    sku_name: identity.sku_name,
                    region: identity.region,
                    meter_name: row.meter_name.clone(),
                    meter_id: row.meter_id.clone(),
                    meter_category: row.meter_category.clone(),
                    meter_subcategory: Some(row.meter_subcategory.clone()),
                    resource_group: Some(row.resource_group.clone()),
                    rate: meter_price,
                    currency: row.currency.clone(),
                });
                if !claimed {
                    debug!(meter_id = %row.meter_id, "Pair already priced by an earlier row");
                }
            }
        }

        info!(entries = table.len(), "Built billed price table");
        Ok(table)
    }

    /// Run the query and parse every result row
    pub async fn fetch_rows(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        clusters: &[String],
    ) -> CostResult<Vec<CostQueryRow>> {
        let body = self.renderer.render(clusters, start, end)?;
        let token = self.tokens.get_token(&self.config.resource_scope).await?;

        let request = HttpRequest::post(self.config.query_url())
            .param("api-version", &self.config.api_version)
            .header("Authorization", bearer_auth_header(&token.token))
            .json(body);

        let response = self.cache.send(self.http.as_ref(), request).await?;
        check_status(&response)?;

        let rows = response
            .body
            .pointer("/properties/rows")
            .and_then(Value::as_array)
            .ok_or_else(|| CostError::Parse("response has no properties.rows".to_string()))?;

        rows.iter()
            .map(|row| {
                let columns = row
                    .as_array()
                    .ok_or_else(|| CostError::Parse(format!("row is not an array: {}", row)))?;
                CostQueryRow::from_row(columns)
            })
            .collect()
    }
}

fn check_status(response: &HttpResponse) -> CostResult<()> {
    if response.status == 429 {
        let retry_after = response
            .header("retry-after")
            .or_else(|| response.header("x-ms-ratelimit-microsoft.costmanagement-entity-retry-after"))
            .and_then(|v| v.trim().parse().ok());
        warn!(retry_after = ?retry_after, "Cost management query throttled");
        return Err(CostError::RateLimited {
            headers: response.headers.clone(),
            retry_after,
        });
    }
    if !response.is_success() {
        return Err(CostError::upstream(response.status, &response.body));
    }
    Ok(())
}

#[async_trait]
impl CostDataAvailability for BilledCostQueryClient {
    /// True when the query for the window returns at least one row
    async fn has_billed_cost_data(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CostResult<bool> {
        let rows = self.fetch_rows(start, end, &[]).await?;
        Ok(!rows.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccessToken, MockTokenProvider};
    use crate::cache::{CachePolicy, MemoryCacheStore};
    use crate::config::RetailCatalogConfig;
    use crate::http::MockHttpClient;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    const COST_URL: &str =
        "https://management.azure.com/subscriptions/sub-1/providers/Microsoft.CostManagement/query";

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        (start, start + Duration::days(1))
    }

    fn tokens() -> MockTokenProvider {
        let mut tokens = MockTokenProvider::new();
        tokens.expect_get_token().returning(|_| {
            Ok(AccessToken {
                token: "token-abc".to_string(),
                expires_at: Utc::now() + Duration::hours(1),
            })
        });
        tokens
    }

    fn cost_row(cost: f64, usage: f64, meter_id: &str, category: &str, rg: &str) -> Value {
        json!([
            cost,
            usage,
            "eastus",
            meter_id,
            "F2s v2",
            category,
            "FSv2 Series",
            rg,
            ["clustername:hpc"],
            "USD"
        ])
    }

    fn catalog(items: Value) -> HttpResponse {
        HttpResponse::ok(json!({ "Items": items }))
    }

    fn client(http: MockHttpClient, factor: Decimal) -> BilledCostQueryClient {
        let http: Arc<dyn HttpClient> = Arc::new(http);
        let store = Arc::new(MemoryCacheStore::new());
        let retail_cache = ResponseCache::new(
            "retail",
            store.clone(),
            CachePolicy::get_only(std::time::Duration::from_secs(3600)),
        );
        let cost_cache = ResponseCache::new(
            "cost",
            store,
            CachePolicy::get_and_post(std::time::Duration::from_secs(3600)),
        );
        let meters =
            MeterIdentityResolver::new(http.clone(), retail_cache, RetailCatalogConfig::default());
        let mut config = CostManagementConfig::for_subscription("sub-1");
        config.normalization_factor = factor;

        BilledCostQueryClient::new(
            http,
            cost_cache,
            Arc::new(tokens()),
            Arc::new(AzureCostQueryRenderer),
            meters,
            config,
        )
    }

    #[tokio::test]
    async fn test_first_row_claims_pair_and_later_rows_are_ignored() {
        let mut http = MockHttpClient::new();
        http.expect_send()
            .withf(|req| req.url == COST_URL)
            .times(1)
            .returning(|_| {
                Ok(HttpResponse::ok(json!({"properties": {"rows": [
                    cost_row(5.0, 50.0, "meter-a", "Virtual Machines", "rg-one"),
                    cost_row(1.0, 2.0, "meter-storage", "Storage", "rg-one"),
                    cost_row(9.0, 10.0, "meter-b", "Virtual Machines", "rg-two"),
                ]}})))
            });
        http.expect_send()
            .withf(|req| req.param_value("$filter") == Some("meterId eq 'meter-a'"))
            .returning(|_| {
                Ok(catalog(json!([
                    {"armSkuName": "Standard_F2s_v2", "armRegionName": "eastus"},
                    {"armSkuName": "Standard_F2s", "armRegionName": "eastus"}
                ])))
            });
        http.expect_send()
            .withf(|req| req.param_value("$filter") == Some("meterId eq 'meter-b'"))
            .returning(|_| {
                Ok(catalog(json!([
                    {"armSkuName": "Standard_F2s_v2", "armRegionName": "eastus"},
                    {"armSkuName": "Standard_F4s_v2", "armRegionName": "eastus"}
                ])))
            });

        let (start, end) = window();
        let table = client(http, Decimal::ONE)
            .query(start, end, &["hpc".to_string()])
            .await
            .unwrap();

        assert_eq!(table.len(), 3);
        let f2s_v2 = table.get("eastus", "Standard_F2s_v2").unwrap();
        assert_eq!(f2s_v2.meter_id, "meter-a");
        assert_eq!(f2s_v2.rate, dec!(0.1));
        assert_eq!(f2s_v2.resource_group.as_deref(), Some("rg-one"));
        assert_eq!(table.get("eastus", "Standard_F4s_v2").unwrap().rate, dec!(0.9));
    }

    #[tokio::test]
    async fn test_normalization_factor_scales_rate() {
        let mut http = MockHttpClient::new();
        http.expect_send()
            .withf(|req| req.url == COST_URL)
            .returning(|_| {
                Ok(HttpResponse::ok(json!({"properties": {"rows": [
                    cost_row(5.0, 50.0, "meter-a", "Virtual Machines", "rg"),
                ]}})))
            });
        http.expect_send().returning(|_| {
            Ok(catalog(json!([
                {"armSkuName": "Standard_F2s_v2", "armRegionName": "eastus"}
            ])))
        });

        let (start, end) = window();
        let table = client(http, dec!(24)).query(start, end, &[]).await.unwrap();

        assert_eq!(table.get("eastus", "Standard_F2s_v2").unwrap().rate, dec!(2.4));
    }

    #[tokio::test]
    async fn test_throttled_query_is_rate_limited_error() {
        let mut http = MockHttpClient::new();
        http.expect_send().times(1).returning(|_| {
            Ok(HttpResponse::new(429, json!({"error": "Too many requests"}))
                .with_header("Retry-After", "30"))
        });

        let (start, end) = window();
        let err = client(http, Decimal::ONE)
            .query(start, end, &["hpc".to_string()])
            .await
            .unwrap_err();

        match err {
            CostError::RateLimited {
                headers,
                retry_after,
            } => {
                assert_eq!(retry_after, Some(30));
                assert_eq!(headers[0].0, "Retry-After");
            }
            other => panic!("expected rate limited error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_other_failures_are_upstream_errors() {
        let mut http = MockHttpClient::new();
        http.expect_send()
            .returning(|_| Ok(HttpResponse::new(403, json!({"error": "Forbidden"}))));

        let (start, end) = window();
        let err = client(http, Decimal::ONE)
            .query(start, end, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, CostError::Upstream { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_unattributable_meter_is_skipped() {
        let mut http = MockHttpClient::new();
        http.expect_send()
            .withf(|req| req.url == COST_URL)
            .returning(|_| {
                Ok(HttpResponse::ok(json!({"properties": {"rows": [
                    cost_row(5.0, 50.0, "meter-gone", "Virtual Machines", "rg"),
                    cost_row(3.0, 0.0, "meter-idle", "Virtual Machines", "rg"),
                ]}})))
            });
        http.expect_send()
            .withf(|req| req.param_value("$filter") == Some("meterId eq 'meter-gone'"))
            .times(1)
            .returning(|_| Ok(catalog(json!([]))));

        let (start, end) = window();
        let table = client(http, Decimal::ONE).query(start, end, &[]).await.unwrap();
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_row_with_overflowing_rate_is_skipped() {
        let mut http = MockHttpClient::new();
        http.expect_send()
            .withf(|req| req.url == COST_URL)
            .returning(|_| {
                Ok(HttpResponse::ok(json!({"properties": {"rows": [
                    cost_row(1e10, 1e-27, "meter-tiny", "Virtual Machines", "rg"),
                    cost_row(5.0, 50.0, "meter-a", "Virtual Machines", "rg"),
                ]}})))
            });
        http.expect_send()
            .withf(|req| req.param_value("$filter") == Some("meterId eq 'meter-a'"))
            .times(1)
            .returning(|_| {
                Ok(catalog(json!([
                    {"armSkuName": "Standard_F2s_v2", "armRegionName": "eastus"}
                ])))
            });

        let (start, end) = window();
        let table = client(http, Decimal::ONE).query(start, end, &[]).await.unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.get("eastus", "Standard_F2s_v2").unwrap().meter_id, "meter-a");
    }

    #[tokio::test]
    async fn test_token_is_attached_but_not_part_of_cache_key() {
        let mut http = MockHttpClient::new();
        http.expect_send()
            .withf(|req| {
                req.url == COST_URL
                    && req
                        .headers
                        .iter()
                        .any(|(k, v)| k == "Authorization" && v == "Bearer token-abc")
            })
            .times(1)
            .returning(|_| Ok(HttpResponse::ok(json!({"properties": {"rows": []}}))));

        let client = client(http, Decimal::ONE);
        let (start, end) = window();

        assert!(!client.has_billed_cost_data(start, end).await.unwrap());
        // Same body again: served from cache
        assert!(client.query(start, end, &[]).await.unwrap().is_empty());
    }

    #[test]
    fn test_renderer_filters_on_cluster_tag() {
        let (start, end) = window();
        let body = AzureCostQueryRenderer
            .render(&["hpc".to_string(), "htc".to_string()], start, end)
            .unwrap();

        assert_eq!(body["type"], "ActualCost");
        assert_eq!(body["timePeriod"]["from"], "2024-03-01T00:00:00Z");
        assert_eq!(body["dataset"]["filter"]["tags"]["name"], "clustername");
        assert_eq!(body["dataset"]["filter"]["tags"]["values"], json!(["hpc", "htc"]));
        assert_eq!(body["dataset"]["grouping"][0]["name"], "ResourceLocation");
    }

    #[test]
    fn test_renderer_omits_filter_without_clusters_and_rejects_empty_window() {
        let (start, end) = window();
        let body = AzureCostQueryRenderer.render(&[], start, end).unwrap();
        assert!(body["dataset"].get("filter").is_none());

        assert!(AzureCostQueryRenderer.render(&[], end, start).is_err());
    }
}
