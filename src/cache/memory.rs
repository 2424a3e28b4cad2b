use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::cache::{CacheIndex, CachedEntry};
use crate::Result;

/// In-memory index. Loses its contents on restart, which is fine: the store
/// is authoritative and entries are resynthesized on miss.
pub struct MemoryIndex {
    entries: RwLock<HashMap<String, CachedEntry>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CacheIndex for MemoryIndex {
    async fn get(&self, path: &str) -> Result<Option<CachedEntry>> {
        Ok(self.entries.read().await.get(path).cloned())
    }

    async fn add(&self, entry: CachedEntry) -> Result<()> {
        self.entries.write().await.insert(entry.storage_path.clone(), entry);
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.entries.write().await.remove(path);
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }
}
