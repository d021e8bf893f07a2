//! Response cache for remote lookups.
//!
//! Entries are keyed by a digest of the request descriptor, minus the
//! params and headers named in the [`CachePolicy`], and expire lazily:
//! nothing evicts them in the background, an expired entry is simply
//! treated as a miss (and dropped) the next time it is read.

mod file;
mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use file::FileCacheStore;
pub use memory::MemoryCacheStore;
#[cfg(feature = "redis")]
pub use redis::RedisCacheStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use observability::CostMetrics;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{CostError, CostResult};
use crate::http::{HttpClient, HttpRequest, HttpResponse};

/// Stored response, owned by the cache backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    #[serde(with = "payload_encoding")]
    pub payload: Vec<u8>,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

mod payload_encoding {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Key → entry storage.
///
/// Backends must give read-after-write consistency per key. Concurrent
/// writers for the same key may race; the last write wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> CostResult<Option<CacheEntry>>;

    async fn put(&self, entry: CacheEntry) -> CostResult<()>;

    async fn remove(&self, key: &str) -> CostResult<()>;
}

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Which requests and responses are eligible for caching, and for how long
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub allowed_methods: Vec<Method>,
    pub allowed_statuses: Vec<u16>,
    /// Query params left out of the cache key
    pub ignored_params: Vec<String>,
    /// Headers left out of the cache key, compared case-insensitively
    pub ignored_headers: Vec<String>,
}

impl CachePolicy {
    /// GET-only, status 200. Used for catalog lookups.
    pub fn get_only(ttl: Duration) -> Self {
        Self {
            ttl,
            allowed_methods: vec![Method::GET],
            allowed_statuses: vec![200],
            ignored_params: Vec::new(),
            ignored_headers: vec!["authorization".to_string()],
        }
    }

    /// GET and POST, status 200. The POST body is part of the key, the
    /// bearer token is not.
    pub fn get_and_post(ttl: Duration) -> Self {
        Self {
            allowed_methods: vec![Method::GET, Method::POST],
            ..Self::get_only(ttl)
        }
    }

    pub fn ignore_param(mut self, name: &str) -> Self {
        self.ignored_params.push(name.to_string());
        self
    }

    pub fn ignore_header(mut self, name: &str) -> Self {
        self.ignored_headers.push(name.to_ascii_lowercase());
        self
    }

    pub fn allows_method(&self, method: &Method) -> bool {
        self.allowed_methods.contains(method)
    }

    pub fn allows_status(&self, status: u16) -> bool {
        self.allowed_statuses.contains(&status)
    }

    /// Digest of the request with ignored params and headers removed
    pub fn cache_key(&self, request: &HttpRequest) -> String {
        let mut params: Vec<&(String, String)> = request
            .params
            .iter()
            .filter(|(name, _)| !self.ignored_params.contains(name))
            .collect();
        params.sort();

        let mut headers: Vec<(String, &str)> = request
            .headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.as_str()))
            .filter(|(name, _)| !self.ignored_headers.iter().any(|h| h.eq_ignore_ascii_case(name)))
            .collect();
        headers.sort();

        let mut hasher = Sha256::new();
        hasher.update(request.method.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(request.url.as_bytes());
        for (name, value) in params {
            hasher.update(b"\np:");
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }
        for (name, value) in headers {
            hasher.update(b"\nh:");
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }
        if let Some(body) = &request.body {
            hasher.update(b"\nb:");
            hasher.update(body.to_string().as_bytes());
        }

        format!("{:x}", hasher.finalize())
    }
}

/// Cache in front of remote lookups
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    policy: CachePolicy,
    clock: Arc<dyn Clock>,
    name: &'static str,
}

impl ResponseCache {
    pub fn new(name: &'static str, store: Arc<dyn CacheStore>, policy: CachePolicy) -> Self {
        Self {
            store,
            policy,
            clock: Arc::new(SystemClock),
            name,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Send `request` through `client`, using the policy's TTL
    pub async fn send(
        &self,
        client: &dyn HttpClient,
        request: HttpRequest,
    ) -> CostResult<HttpResponse> {
        let ttl = self.policy.ttl;
        let descriptor = request.clone();
        self.get_or_fetch(&descriptor, ttl, || async move {
            let response = client.send(request).await?;
            CostMetrics::record_upstream_request(self.name, response.status);
            Ok(response)
        })
        .await
    }

    /// Return the stored response for `request` or run `fetch` and store it.
    ///
    /// Only responses with an allowed status are stored. Fetch failures
    /// are never stored and are returned to the caller unchanged.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        request: &HttpRequest,
        ttl: Duration,
        fetch: F,
    ) -> CostResult<HttpResponse>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CostResult<HttpResponse>>,
    {
        if !self.policy.allows_method(&request.method) {
            trace!(cache = self.name, method = %request.method, "Method not cacheable");
            CostMetrics::record_cache_lookup(self.name, "bypass");
            return fetch().await;
        }

        let key = self.policy.cache_key(request);
        let now = self.clock.now();

        if let Some(entry) = self.store.get(&key).await? {
            if !entry.is_expired(now) {
                debug!(cache = self.name, key = %key, "Cache hit");
                CostMetrics::record_cache_lookup(self.name, "hit");
                return decode_payload(&entry.payload);
            }
            debug!(cache = self.name, key = %key, "Cache entry expired");
            self.store.remove(&key).await?;
        }

        CostMetrics::record_cache_lookup(self.name, "miss");
        let response = fetch().await?;

        if self.policy.allows_status(response.status) {
            let ttl = chrono::Duration::from_std(ttl)
                .map_err(|e| CostError::Configuration(format!("cache ttl out of range: {}", e)))?;
            let stored_at = self.clock.now();
            let entry = CacheEntry {
                key: key.clone(),
                payload: serde_json::to_vec(&response)?,
                stored_at,
                expires_at: stored_at + ttl,
            };
            self.store.put(entry).await?;
            debug!(cache = self.name, key = %key, "Stored response");
        }

        Ok(response)
    }
}

fn decode_payload(payload: &[u8]) -> CostResult<HttpResponse> {
    serde_json::from_slice(payload)
        .map_err(|e| CostError::CacheBackend(format!("corrupt cache entry: {}", e)))
}
