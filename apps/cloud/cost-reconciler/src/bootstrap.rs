//! Builds the pricing facade from configuration

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain_compute_cost::{
    AzureCostQueryRenderer, BilledCostQueryClient, CachePolicy, CacheStore,
    ClientSecretTokenProvider, CostError, CostManagementConfig, CostResult, FileCacheStore,
    HttpClient, MemoryCacheStore, MeterIdentityResolver, NodeArrayUsage, PricingFacade,
    RedisCacheStore, ResponseCache, RetailPriceResolver, ReqwestHttpClient, UsageReportClient,
    UsageReportConfig, UsageSource,
};
use eyre::{Result, WrapErr};
use std::sync::Arc;
use tracing::info;

use crate::config::{CacheBackendKind, CacheConfig, Config};

/// Stores for retail lookups and cost queries
struct Stores {
    retail: Arc<dyn CacheStore>,
    cost: Arc<dyn CacheStore>,
}

async fn open_stores(cache: &CacheConfig) -> Result<Stores> {
    match cache.backend {
        CacheBackendKind::Memory => {
            let store: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
            Ok(Stores {
                retail: store.clone(),
                cost: store,
            })
        }
        CacheBackendKind::Filesystem => Ok(Stores {
            retail: Arc::new(FileCacheStore::open(cache.root.join("retail")).await?),
            cost: Arc::new(FileCacheStore::open(cache.root.join("cost")).await?),
        }),
        CacheBackendKind::Redis => {
            let redis = cache
                .redis
                .as_ref()
                .ok_or_else(|| eyre::eyre!("REDIS_HOST is required for the redis cache backend"))?;
            let store: Arc<dyn CacheStore> = Arc::new(
                RedisCacheStore::connect(&redis.uri)
                    .await
                    .wrap_err("Redis connection failed")?
                    .with_namespace(&redis.namespace),
            );
            Ok(Stores {
                retail: store.clone(),
                cost: store,
            })
        }
    }
}

/// Usage source for runs without CycleCloud settings
struct UnconfiguredUsage;

#[async_trait]
impl UsageSource for UnconfiguredUsage {
    async fn usage(
        &self,
        _cluster: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> CostResult<Vec<NodeArrayUsage>> {
        Err(CostError::Configuration(
            "CYCLECLOUD_URL, CYCLECLOUD_USERNAME and CYCLECLOUD_PASSWORD must be set".to_string(),
        ))
    }
}

fn usage_source(config: &Config) -> Result<Arc<dyn UsageSource>> {
    let Some(cycle) = &config.cyclecloud else {
        return Ok(Arc::new(UnconfiguredUsage));
    };

    let http: Arc<dyn HttpClient> = if cycle.accept_invalid_certs {
        Arc::new(ReqwestHttpClient::accepting_invalid_certs()?)
    } else {
        Arc::new(ReqwestHttpClient::new())
    };
    Ok(Arc::new(UsageReportClient::new(
        http,
        UsageReportConfig::new(&cycle.url, &cycle.username, &cycle.password),
    )))
}

pub async fn build_facade(config: &Config) -> Result<PricingFacade> {
    info!(backend = %config.cache.backend, "Opening response cache");
    let stores = open_stores(&config.cache).await?;
    let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());

    let retail_cache = ResponseCache::new(
        "retail",
        stores.retail,
        CachePolicy::get_only(config.cache.retail_ttl),
    );
    let retail = RetailPriceResolver::new(http.clone(), retail_cache.clone(), config.retail.clone());
    let meters = MeterIdentityResolver::new(http.clone(), retail_cache, config.retail.clone());

    let facade = PricingFacade::new(usage_source(config)?, retail, meters.clone());

    let Some(azure) = &config.azure else {
        info!("Azure credentials not configured, using retail prices only");
        return Ok(facade);
    };

    let tokens = ClientSecretTokenProvider::new(
        &azure.tenant_id,
        &azure.client_id,
        &azure.client_secret,
    );
    let mut cost_config = CostManagementConfig::for_subscription(&azure.subscription_id);
    cost_config.normalization_factor = config.normalization_factor;

    let billed = BilledCostQueryClient::new(
        http,
        ResponseCache::new(
            "cost_management",
            stores.cost,
            CachePolicy::get_and_post(config.cache.cost_ttl),
        ),
        Arc::new(tokens),
        Arc::new(AzureCostQueryRenderer),
        meters,
        cost_config,
    );

    info!(subscription = %azure.subscription_id, "Billed cost path enabled");
    Ok(facade.with_billed_costs(billed))
}
