//! Configuration for the cost reconciler

use core_config::redis::RedisConfig;
use core_config::{
    ConfigError, Environment, FromEnv, env_flag, env_optional, env_or_default, env_parse,
    env_required,
};
use domain_compute_cost::RetailCatalogConfig;
use domain_compute_cost::config::{DEFAULT_RETAIL_API_VERSION, DEFAULT_RETAIL_PRICES_URL};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::time::Duration;
use strum::{Display, EnumString};
use tracing::warn;

const RETAIL_CACHE_TTL_SECS: u64 = 172_800;
const COST_CACHE_TTL_SECS: u64 = 3_600;
const RETAIL_MAX_PAGES: usize = 5;
const DEFAULT_CACHE_ROOT: &str = "./.cache/compute-cost";

/// Where cached responses live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CacheBackendKind {
    Memory,
    Filesystem,
    Redis,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub retail: RetailCatalogConfig,
    pub cache: CacheConfig,
    /// Billed path is disabled when absent
    pub azure: Option<AzureConfig>,
    pub normalization_factor: Decimal,
    /// Required by the `cost` command only
    pub cyclecloud: Option<CycleCloudConfig>,
    /// Clusters used when none are given on the command line
    pub default_clusters: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    pub root: PathBuf,
    pub redis: Option<RedisConfig>,
    pub retail_ttl: Duration,
    pub cost_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct AzureConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub subscription_id: String,
}

#[derive(Debug, Clone)]
pub struct CycleCloudConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    /// Skip TLS verification (CycleCloud often serves a self-signed cert)
    pub accept_invalid_certs: bool,
}

impl FromEnv for Config {
    fn from_env() -> Result<Self, ConfigError> {
        let backend_raw = env_or_default("CACHE_BACKEND", "filesystem");
        let backend = backend_raw
            .parse::<CacheBackendKind>()
            .map_err(|_| ConfigError::ParseError {
                key: "CACHE_BACKEND".to_string(),
                details: format!("unknown backend '{}'", backend_raw),
            })?;

        let redis = match backend {
            CacheBackendKind::Redis => Some(RedisConfig::from_env()?),
            _ => None,
        };

        Ok(Config {
            environment: Environment::from_env(),
            retail: RetailCatalogConfig {
                base_url: env_or_default("RETAIL_PRICES_URL", DEFAULT_RETAIL_PRICES_URL),
                api_version: env_or_default("RETAIL_API_VERSION", DEFAULT_RETAIL_API_VERSION),
                max_pages: env_parse("RETAIL_MAX_PAGES", RETAIL_MAX_PAGES)?,
                ..RetailCatalogConfig::default()
            },
            cache: CacheConfig {
                backend,
                root: PathBuf::from(env_or_default("CACHE_ROOT", DEFAULT_CACHE_ROOT)),
                redis,
                retail_ttl: Duration::from_secs(env_parse(
                    "RETAIL_CACHE_TTL_SECS",
                    RETAIL_CACHE_TTL_SECS,
                )?),
                cost_ttl: Duration::from_secs(env_parse("COST_CACHE_TTL_SECS", COST_CACHE_TTL_SECS)?),
            },
            azure: azure_from_env(),
            normalization_factor: env_parse("COST_NORMALIZATION_FACTOR", Decimal::ONE)?,
            cyclecloud: cyclecloud_from_env()?,
            default_clusters: env_optional("CLUSTER_NAMES")
                .map(|s| {
                    s.split(',')
                        .map(|c| c.trim().to_string())
                        .filter(|c| !c.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        })
    }
}

fn azure_from_env() -> Option<AzureConfig> {
    let vars = [
        env_optional("AZURE_TENANT_ID"),
        env_optional("AZURE_CLIENT_ID"),
        env_optional("AZURE_CLIENT_SECRET"),
        env_optional("AZURE_SUBSCRIPTION_ID"),
    ];
    match vars {
        [Some(tenant_id), Some(client_id), Some(client_secret), Some(subscription_id)] => {
            Some(AzureConfig {
                tenant_id,
                client_id,
                client_secret,
                subscription_id,
            })
        }
        [None, None, None, None] => None,
        _ => {
            warn!("Azure credentials are incomplete, billed costs disabled");
            None
        }
    }
}

fn cyclecloud_from_env() -> Result<Option<CycleCloudConfig>, ConfigError> {
    let Some(url) = env_optional("CYCLECLOUD_URL") else {
        return Ok(None);
    };
    Ok(Some(CycleCloudConfig {
        url,
        username: env_required("CYCLECLOUD_USERNAME")?,
        password: env_required("CYCLECLOUD_PASSWORD")?,
        accept_invalid_certs: env_flag("CYCLECLOUD_ACCEPT_INVALID_CERTS", false)?,
    }))
}
