use std::path::Path;

use sled::Db;

use crate::cache::{CacheIndex, CachedEntry};
use crate::{ImgCacheError, Result};

/// Sled-backed index that survives restarts, so a warm process does not
/// re-probe the store for every entry it wrote before. Pure Rust, no C++
/// compilation needed.
pub struct SledIndex {
    db: Db,
}

impl SledIndex {
    /// Open (or create) the index database under `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| ImgCacheError::IndexError(format!("Failed to open Sled database: {e}")))?;
        Ok(Self { db })
    }

    /// Ephemeral database for tests.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| ImgCacheError::IndexError(e.to_string()))?;
        Ok(Self { db })
    }

    fn index_err(e: impl std::fmt::Display) -> ImgCacheError {
        ImgCacheError::IndexError(e.to_string())
    }
}

#[async_trait::async_trait]
impl CacheIndex for SledIndex {
    async fn get(&self, path: &str) -> Result<Option<CachedEntry>> {
        match self.db.get(path.as_bytes()).map_err(Self::index_err)? {
            Some(bytes) => {
                let entry = serde_json::from_slice::<CachedEntry>(&bytes)
                    .map_err(Self::index_err)?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    async fn add(&self, entry: CachedEntry) -> Result<()> {
        let value = serde_json::to_vec(&entry).map_err(Self::index_err)?;
        self.db
            .insert(entry.storage_path.as_bytes(), value)
            .map_err(|e| ImgCacheError::IndexError(format!("Failed to write index entry: {e}")))?;
        self.db.flush_async().await.map_err(Self::index_err)?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.db.remove(path.as_bytes()).map_err(Self::index_err)?;
        self.db.flush_async().await.map_err(Self::index_err)?;
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.db.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    #[tokio::test]
    async fn entries_round_trip_through_sled() {
        let index = SledIndex::temporary().unwrap();
        let entry = CachedEntry::new("abc123", "cache/a/b/c/abc123.jpg", OffsetDateTime::now_utc());

        index.add(entry.clone()).await.unwrap();
        assert_eq!(index.get("cache/a/b/c/abc123.jpg").await.unwrap(), Some(entry));
        assert_eq!(index.len().await.unwrap(), 1);

        index.remove("cache/a/b/c/abc123.jpg").await.unwrap();
        assert_eq!(index.get("cache/a/b/c/abc123.jpg").await.unwrap(), None);
    }
}
