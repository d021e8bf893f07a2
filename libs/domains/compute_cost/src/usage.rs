//! Cluster usage reports.
//!
//! Translates the usage endpoint's node-array breakdown into
//! [`NodeArrayUsage`] values. Usage is always fetched fresh.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use observability::CostMetrics;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::config::UsageReportConfig;
use crate::error::{CostError, CostResult};
use crate::http::{HttpClient, HttpRequest, basic_auth_header};
use crate::models::{NodeArrayUsage, PricingTier, UsageDetail, decimal_from_json};

const NODE_ARRAY_CATEGORY: &str = "nodearray";

/// Supplies per-node-array usage for a cluster and window
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UsageSource: Send + Sync {
    async fn usage(
        &self,
        cluster: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CostResult<Vec<NodeArrayUsage>>;
}

#[derive(Debug, Deserialize)]
struct UsageReport {
    #[serde(default)]
    usage: Vec<UsagePeriod>,
}

#[derive(Debug, Deserialize)]
struct UsagePeriod {
    #[serde(default)]
    breakdown: Vec<BreakdownEntry>,
}

#[derive(Debug, Deserialize)]
struct BreakdownEntry {
    #[serde(default)]
    category: String,
    #[serde(default)]
    node: String,
    #[serde(default)]
    details: Vec<RawDetail>,
}

#[derive(Debug, Deserialize)]
struct RawDetail {
    vm_size: String,
    region: String,
    #[serde(default)]
    priority: Option<String>,
    hours: Value,
    core_count: u32,
}

impl RawDetail {
    fn into_detail(self) -> CostResult<UsageDetail> {
        let hours = decimal_from_json(&self.hours).ok_or_else(|| {
            CostError::InvalidUsage(format!("hours is not numeric for {}: {}", self.vm_size, self.hours))
        })?;
        let pricing_tier = match self.priority.as_deref() {
            None | Some("") => PricingTier::Regular,
            Some(raw) => raw.parse().map_err(|_| {
                CostError::InvalidUsage(format!("unknown priority '{}' for {}", raw, self.vm_size))
            })?,
        };

        Ok(UsageDetail {
            sku_name: self.vm_size,
            region: self.region,
            pricing_tier,
            hours,
            core_count: self.core_count,
        })
    }
}

/// Usage endpoint client using basic auth
#[derive(Clone)]
pub struct UsageReportClient {
    http: Arc<dyn HttpClient>,
    config: UsageReportConfig,
}

impl UsageReportClient {
    pub fn new(http: Arc<dyn HttpClient>, config: UsageReportConfig) -> Self {
        Self { http, config }
    }

    fn usage_url(&self, cluster: &str) -> String {
        format!(
            "{}/clusters/{}/usage",
            self.config.base_url.trim_end_matches('/'),
            cluster
        )
    }
}

#[async_trait]
impl UsageSource for UsageReportClient {
    #[instrument(skip(self))]
    async fn usage(
        &self,
        cluster: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CostResult<Vec<NodeArrayUsage>> {
        let request = HttpRequest::get(self.usage_url(cluster))
            .param("granularity", &self.config.granularity)
            .param("timeframe", "custom")
            .param("from", start.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            .param("to", end.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            .header(
                "Authorization",
                basic_auth_header(&self.config.username, &self.config.password),
            );

        let response = self.http.send(request).await?;
        CostMetrics::record_upstream_request("usage", response.status);
        if !response.is_success() {
            return Err(CostError::upstream(response.status, &response.body));
        }

        let report: UsageReport = serde_json::from_value(response.body)?;
        let mut node_arrays = Vec::new();
        for entry in report.usage.into_iter().flat_map(|period| period.breakdown) {
            if entry.category != NODE_ARRAY_CATEGORY {
                continue;
            }
            let details = entry
                .details
                .into_iter()
                .map(RawDetail::into_detail)
                .collect::<CostResult<Vec<_>>>()?;
            node_arrays.push(NodeArrayUsage {
                cluster: cluster.to_string(),
                node_array: entry.node,
                details,
            });
        }

        debug!(node_arrays = node_arrays.len(), "Parsed usage report");
        Ok(node_arrays)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpResponse, MockHttpClient};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        (start, start + Duration::days(7))
    }

    fn client(mock: MockHttpClient) -> UsageReportClient {
        UsageReportClient::new(
            Arc::new(mock),
            UsageReportConfig::new("https://cycle.example.test/", "admin", "secret"),
        )
    }

    #[tokio::test]
    async fn test_parses_node_array_breakdown() {
        let mut mock = MockHttpClient::new();
        mock.expect_send()
            .withf(|req| {
                req.url == "https://cycle.example.test/clusters/demo/usage"
                    && req.param_value("granularity") == Some("total")
                    && req.param_value("timeframe") == Some("custom")
                    && req.param_value("from") == Some("2024-03-01T00:00:00Z")
                    && req.param_value("to") == Some("2024-03-08T00:00:00Z")
                    && req
                        .headers
                        .iter()
                        .any(|(k, v)| k == "Authorization" && v.starts_with("Basic "))
            })
            .times(1)
            .returning(|_| {
                Ok(HttpResponse::ok(json!({"usage": [{
                    "breakdown": [
                        {"category": "cluster", "node": "demo", "hours": 30.0},
                        {"category": "nodearray", "node": "hpc", "hours": 20.0, "details": [
                            {"vm_size": "Standard_F2s_v2", "region": "eastus",
                             "priority": "regular", "hours": 20.0, "core_count": 2}
                        ]},
                        {"category": "nodearray", "node": "htc", "hours": 10.5, "details": [
                            {"vm_size": "Standard_F4s_v2", "region": "eastus",
                             "priority": "spot", "hours": 10.5, "core_count": 4}
                        ]},
                        {"category": "nodearray", "node": "idle"}
                    ]
                }]})))
            });

        let (start, end) = window();
        let usage = client(mock).usage("demo", start, end).await.unwrap();

        assert_eq!(usage.len(), 3);
        assert_eq!(usage[0].node_array, "hpc");
        assert_eq!(usage[0].cluster, "demo");
        assert_eq!(usage[0].details[0].hours, dec!(20));
        assert_eq!(usage[1].details[0].pricing_tier, PricingTier::Spot);
        assert_eq!(usage[1].details[0].core_count, 4);
        assert!(usage[2].details.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_priority_is_invalid_usage() {
        let mut mock = MockHttpClient::new();
        mock.expect_send().returning(|_| {
            Ok(HttpResponse::ok(json!({"usage": [{"breakdown": [
                {"category": "nodearray", "node": "hpc", "details": [
                    {"vm_size": "Standard_F2s_v2", "region": "eastus",
                     "priority": "premium", "hours": 1, "core_count": 2}
                ]}
            ]}]})))
        });

        let (start, end) = window();
        let err = client(mock).usage("demo", start, end).await.unwrap_err();
        assert!(matches!(err, CostError::InvalidUsage(_)));
    }

    #[tokio::test]
    async fn test_rejected_request_is_upstream_error() {
        let mut mock = MockHttpClient::new();
        mock.expect_send()
            .returning(|_| Ok(HttpResponse::new(401, json!("Unauthorized"))));

        let (start, end) = window();
        let err = client(mock).usage("demo", start, end).await.unwrap_err();
        assert!(matches!(err, CostError::Upstream { status: 401, .. }));
    }
}
