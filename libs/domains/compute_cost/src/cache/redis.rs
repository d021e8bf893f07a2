use async_trait::async_trait;
use chrono::Utc;
use ::redis::AsyncCommands;
use ::redis::aio::ConnectionManager;

use super::{CacheEntry, CacheStore};
use crate::error::{CostError, CostResult};

const DEFAULT_NAMESPACE: &str = "compute-cost";

/// Entries stored as JSON with a matching Redis expiry
#[derive(Clone)]
pub struct RedisCacheStore {
    connection: ConnectionManager,
    namespace: String,
}

impl RedisCacheStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Connect and verify with PING
    pub async fn connect(url: &str) -> CostResult<Self> {
        let client = ::redis::Client::open(url).map_err(redis_error)?;
        let mut connection = ConnectionManager::new(client).await.map_err(redis_error)?;
        let _: String = ::redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(redis_error)?;
        Ok(Self::new(connection))
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

fn redis_error(err: ::redis::RedisError) -> CostError {
    CostError::CacheBackend(err.to_string())
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> CostResult<Option<CacheEntry>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(self.redis_key(key)).await.map_err(redis_error)?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let entry: CacheEntry = serde_json::from_str(&raw)
            .map_err(|e| CostError::CacheBackend(format!("corrupt cache entry: {}", e)))?;
        if entry.is_expired(Utc::now()) {
            self.remove(key).await?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn put(&self, entry: CacheEntry) -> CostResult<()> {
        let ttl_secs = (entry.expires_at - entry.stored_at).num_seconds().max(1) as u64;
        let raw = serde_json::to_string(&entry)?;
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(self.redis_key(&entry.key), raw, ttl_secs)
            .await
            .map_err(redis_error)
    }

    async fn remove(&self, key: &str) -> CostResult<()> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(self.redis_key(key))
            .await
            .map_err(redis_error)
    }
}
