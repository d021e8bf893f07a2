//! Retail price catalog lookups.
//!
//! Catalog: <https://learn.microsoft.com/en-us/rest/api/cost-management/retail-prices/azure-retail-prices>

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::cache::ResponseCache;
use crate::config::RetailCatalogConfig;
use crate::error::{CostError, CostResult};
use crate::http::{HttpClient, HttpRequest};
use crate::models::{PricingTier, RetailPriceEntry, decimal_from_json};

const VIRTUAL_MACHINES: &str = "Virtual Machines";

#[derive(Debug, Deserialize)]
pub(crate) struct CatalogPage {
    #[serde(rename = "Items", default)]
    pub items: Vec<CatalogItem>,
    #[serde(rename = "NextPageLink", default)]
    pub next_page_link: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CatalogItem {
    #[serde(rename = "type", default)]
    pub price_type: String,
    #[serde(rename = "productName", default)]
    pub product_name: String,
    #[serde(rename = "meterName", default)]
    pub meter_name: String,
    #[serde(rename = "meterId", default)]
    pub meter_id: String,
    #[serde(rename = "serviceName", default)]
    pub service_name: String,
    #[serde(rename = "armSkuName", default)]
    pub arm_sku_name: Option<String>,
    #[serde(rename = "armRegionName", default)]
    pub arm_region_name: Option<String>,
    #[serde(rename = "retailPrice", default)]
    pub retail_price: Value,
    #[serde(rename = "currencyCode", default)]
    pub currency_code: String,
}

impl CatalogItem {
    /// Pay-as-you-go line, Linux, not the legacy low priority tier
    fn is_eligible(&self) -> bool {
        self.price_type == "Consumption"
            && !self.product_name.contains("Windows")
            && !self.meter_name.contains("Low Priority")
    }

    fn is_spot(&self) -> bool {
        self.meter_name.contains("Spot")
    }

    fn into_entry(self) -> CostResult<RetailPriceEntry> {
        let unit_price = decimal_from_json(&self.retail_price).ok_or_else(|| {
            CostError::Parse(format!(
                "retailPrice is not numeric for meter {}: {}",
                self.meter_id, self.retail_price
            ))
        })?;

        Ok(RetailPriceEntry {
            sku_name: self.arm_sku_name.unwrap_or_default(),
            region: self.arm_region_name.unwrap_or_default(),
            product_name: self.product_name,
            meter_name: self.meter_name,
            meter_id: self.meter_id,
            service_category: self.service_name,
            unit_price,
            currency: self.currency_code,
        })
    }
}

/// Paged, cached access to the catalog. Shared by both resolvers.
#[derive(Clone)]
pub(crate) struct RetailCatalog {
    http: Arc<dyn HttpClient>,
    cache: ResponseCache,
    config: RetailCatalogConfig,
}

impl RetailCatalog {
    pub fn new(http: Arc<dyn HttpClient>, cache: ResponseCache, config: RetailCatalogConfig) -> Self {
        Self {
            http,
            cache,
            config,
        }
    }

    pub fn max_pages(&self) -> usize {
        self.config.max_pages.max(1)
    }

    /// First page for `filter`, or the page behind `next_link`
    pub async fn page(&self, filter: &str, next_link: Option<&str>) -> CostResult<CatalogPage> {
        let request = match next_link {
            Some(link) => HttpRequest::get(link),
            None => HttpRequest::get(&self.config.base_url)
                .param("api-version", &self.config.api_version)
                .param("meterRegion", &self.config.meter_region)
                .param("$filter", filter),
        };

        let response = self.cache.send(self.http.as_ref(), request).await?;

        if !response.is_success() {
            warn!(status = response.status, filter = filter, "Retail catalog request failed");
            return Err(CostError::upstream(response.status, &response.body));
        }

        Ok(serde_json::from_value(response.body)?)
    }
}

/// Resolves one canonical retail price for a SKU, region and tier
#[derive(Clone)]
pub struct RetailPriceResolver {
    catalog: RetailCatalog,
}

impl RetailPriceResolver {
    pub fn new(http: Arc<dyn HttpClient>, cache: ResponseCache, config: RetailCatalogConfig) -> Self {
        Self {
            catalog: RetailCatalog::new(http, cache, config),
        }
    }

    /// Look up the price entry for a SKU in a region.
    ///
    /// Reserved and savings-plan lines, Windows products and low priority
    /// meters are never selected. Other tiers take the first eligible line.
    /// Spot requests prefer a Spot meter and fall back to the first eligible
    /// line when no Spot meter exists in the scanned pages.
    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        sku_name: &str,
        region: &str,
        pricing_tier: PricingTier,
    ) -> CostResult<RetailPriceEntry> {
        let filter = format!(
            "armRegionName eq '{}' and armSkuName eq '{}' and serviceName eq '{}'",
            region, sku_name, VIRTUAL_MACHINES
        );

        let mut fallback: Option<CatalogItem> = None;
        let mut next_link: Option<String> = None;

        for page_number in 0..self.catalog.max_pages() {
            let page = self.catalog.page(&filter, next_link.as_deref()).await?;
            debug!(page = page_number, items = page.items.len(), "Scanning catalog page");

            if let Some(item) = select(&page.items, pricing_tier) {
                info!(meter = %item.meter_name, "Resolved retail price");
                return item.clone().into_entry();
            }
            if fallback.is_none() {
                fallback = page.items.into_iter().find(CatalogItem::is_eligible);
            }

            match page.next_page_link {
                Some(link) if !link.is_empty() => next_link = Some(link),
                _ => break,
            }
        }

        match fallback {
            Some(item) => {
                debug!(meter = %item.meter_name, "No preferred meter, using first eligible line");
                item.into_entry()
            }
            None => Err(CostError::RateNotFound {
                sku_name: sku_name.to_string(),
                region: region.to_string(),
                tier: pricing_tier,
            }),
        }
    }
}

/// First eligible Spot item for Spot requests, first eligible item otherwise
fn select(items: &[CatalogItem], tier: PricingTier) -> Option<&CatalogItem> {
    let mut eligible = items.iter().filter(|item| item.is_eligible());
    match tier {
        PricingTier::Spot => eligible.find(|item| item.is_spot()),
        PricingTier::Regular | PricingTier::LowPriority => eligible.next(),
    }
}
