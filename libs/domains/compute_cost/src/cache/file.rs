use async_trait::async_trait;
use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::{CacheEntry, CacheStore};
use crate::error::{CostError, CostResult};

/// One JSON file per key under a root directory
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    root: PathBuf,
}

impl FileCacheStore {
    /// Create the store, making the root directory if needed
    pub async fn open(root: impl AsRef<Path>) -> CostResult<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| backend_error(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // Keys are hex digests, safe to use as file names as-is
    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", key))
    }
}

fn backend_error(path: &Path, err: std::io::Error) -> CostError {
    CostError::CacheBackend(format!("{}: {}", path.display(), err))
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn get(&self, key: &str) -> CostResult<Option<CacheEntry>> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(backend_error(&path, e)),
        };

        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Dropping unreadable cache file");
                self.remove(key).await?;
                return Ok(None);
            }
        };

        if entry.is_expired(Utc::now()) {
            self.remove(key).await?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn put(&self, entry: CacheEntry) -> CostResult<()> {
        let path = self.path_for(&entry.key);
        let bytes = serde_json::to_vec(&entry)?;

        // Write then rename so readers never observe a half-written file
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| backend_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| backend_error(&path, e))
    }

    async fn remove(&self, key: &str) -> CostResult<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(backend_error(&path, e)),
        }
    }
}
