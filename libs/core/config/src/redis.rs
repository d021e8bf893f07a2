use crate::{env_or_default, env_required, ConfigError, FromEnv};

const DEFAULT_NAMESPACE: &str = "compute-cost";

/// Redis connection for the shared response cache
#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub uri: String,
    /// Prefix for every cache key
    pub namespace: String,
}

impl RedisConfig {
    pub fn new(uri: String) -> Self {
        Self {
            uri,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl FromEnv for RedisConfig {
    /// Requires REDIS_HOST to be set (no default)
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            uri: env_required("REDIS_HOST")?,
            namespace: env_or_default("REDIS_NAMESPACE", DEFAULT_NAMESPACE),
        })
    }
}
