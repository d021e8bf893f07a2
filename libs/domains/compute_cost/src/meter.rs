use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::cache::ResponseCache;
use crate::config::RetailCatalogConfig;
use crate::error::CostResult;
use crate::http::HttpClient;
use crate::retail::RetailCatalog;

/// A (SKU, region) pair a meter can bill for
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MeterIdentity {
    pub sku_name: String,
    pub region: String,
}

/// Recovers SKU/region identity for opaque meter ids via the retail catalog
#[derive(Clone)]
pub struct MeterIdentityResolver {
    catalog: RetailCatalog,
}

impl MeterIdentityResolver {
    pub fn new(http: Arc<dyn HttpClient>, cache: ResponseCache, config: RetailCatalogConfig) -> Self {
        Self {
            catalog: RetailCatalog::new(http, cache, config),
        }
    }

    /// Every (sku, region) pair listed for `meter_id`.
    ///
    /// An unknown meter yields an empty set rather than an error.
    #[instrument(skip(self))]
    pub async fn resolve(&self, meter_id: &str) -> CostResult<BTreeSet<MeterIdentity>> {
        let filter = format!("meterId eq '{}'", meter_id);
        let mut identities = BTreeSet::new();
        let mut next_link: Option<String> = None;

        for _ in 0..self.catalog.max_pages() {
            let page = self.catalog.page(&filter, next_link.as_deref()).await?;

            identities.extend(page.items.into_iter().filter_map(|item| {
                match (item.arm_sku_name, item.arm_region_name) {
                    (Some(sku_name), Some(region)) if !sku_name.is_empty() && !region.is_empty() => {
                        Some(MeterIdentity { sku_name, region })
                    }
                    _ => None,
                }
            }));

            match page.next_page_link {
                Some(link) if !link.is_empty() => next_link = Some(link),
                _ => break,
            }
        }

        debug!(count = identities.len(), "Resolved meter identities");
        Ok(identities)
    }
}
