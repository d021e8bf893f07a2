//! Redis test infrastructure
//!
//! Provides a `TestRedis` helper that starts a Redis container for cache
//! backend tests.

use redis::Client;
use redis::aio::ConnectionManager;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::redis::Redis;

/// Test Redis wrapper that ensures proper cleanup
///
/// The container is stopped and removed when this struct is dropped.
pub struct TestRedis {
    #[allow(dead_code)]
    container: ContainerAsync<Redis>,
    connection_string: String,
}

impl TestRedis {
    /// Start a Redis 8 Alpine container
    pub async fn new() -> Self {
        let container = Redis::default()
            .with_tag("8-alpine")
            .start()
            .await
            .expect("Failed to start Redis container");

        let host_port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("Failed to get Redis port");

        let connection_string = format!("redis://127.0.0.1:{}", host_port);
        tracing::info!(port = host_port, "Test Redis ready (Redis 8-alpine)");

        Self {
            container,
            connection_string,
        }
    }

    /// A reconnecting connection, the kind the cache store holds
    pub async fn connection_manager(&self) -> ConnectionManager {
        let client =
            Client::open(self.connection_string.as_str()).expect("Failed to create Redis client");
        ConnectionManager::new(client)
            .await
            .expect("Failed to connect to Redis")
    }

    /// Get the connection string for manual client creation
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}

impl Drop for TestRedis {
    fn drop(&mut self) {
        tracing::debug!("Cleaning up test Redis container");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::AsyncCommands;

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_redis_set_ex_expires() {
        let redis = TestRedis::new().await;
        let mut conn = redis.connection_manager().await;

        conn.set_ex::<_, _, ()>("compute-cost:k", "v", 1).await.unwrap();
        let exists: bool = conn.exists("compute-cost:k").await.unwrap();
        assert!(exists);

        tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
        let exists: bool = conn.exists("compute-cost:k").await.unwrap();
        assert!(!exists);
    }
}
