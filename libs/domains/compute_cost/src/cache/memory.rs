use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{CacheEntry, CacheStore};
use crate::error::{CostError, CostResult};

/// Process-local store guarded by a mutex
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored entries, expired ones included until they are next read
    pub fn len(&self) -> CostResult<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> CostResult<bool> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> CostResult<std::sync::MutexGuard<'_, HashMap<String, CacheEntry>>> {
        self.entries
            .lock()
            .map_err(|_| CostError::CacheBackend("memory cache lock poisoned".to_string()))
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> CostResult<Option<CacheEntry>> {
        let mut entries = self.lock()?;
        match entries.get(key) {
            Some(entry) if entry.is_expired(Utc::now()) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.clone())),
            None => Ok(None),
        }
    }

    async fn put(&self, entry: CacheEntry) -> CostResult<()> {
        self.lock()?.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> CostResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}
