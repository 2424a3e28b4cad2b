use std::collections::BTreeMap;
use std::ops::Bound;

use bytes::Bytes;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::store::{ObjectAttributes, ObjectItem, ObjectMetadata, ObjectPage, ObjectStore};
use crate::Result;

const DEFAULT_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Bytes,
    last_modified: OffsetDateTime,
    metadata: Option<ObjectMetadata>,
}

/// In-memory object store used by tests and local development.
///
/// Listing paginates over the sorted key space with the last-seen path as
/// the continuation token, mimicking segmented listing semantics.
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    page_size: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { objects: RwLock::new(BTreeMap::new()), page_size: DEFAULT_PAGE_SIZE }
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self { objects: RwLock::new(BTreeMap::new()), page_size }
    }

    /// Insert an object with an explicit timestamp. Lets tests and seeding
    /// code shape the listing order the trimmer walks.
    pub async fn insert_with_timestamp(
        &self,
        path: &str,
        bytes: Bytes,
        last_modified: OffsetDateTime,
    ) {
        let mut objects = self.objects.write().await;
        objects.insert(
            path.to_string(),
            StoredObject { bytes, last_modified, metadata: None },
        );
    }

    pub async fn metadata_of(&self, path: &str) -> Option<ObjectMetadata> {
        let objects = self.objects.read().await;
        objects.get(path).and_then(|o| o.metadata.clone())
    }

    pub async fn bytes_of(&self, path: &str) -> Option<Bytes> {
        let objects = self.objects.read().await;
        objects.get(path).map(|o| o.bytes.clone())
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn create_container(&self) -> Result<()> {
        // The map doubles as the container; nothing to provision.
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.objects.read().await.contains_key(path))
    }

    async fn get_attributes(&self, path: &str) -> Result<Option<ObjectAttributes>> {
        let objects = self.objects.read().await;
        Ok(objects.get(path).map(|o| ObjectAttributes {
            last_modified: o.last_modified,
            length: o.bytes.len() as u64,
        }))
    }

    async fn upload(&self, path: &str, bytes: Bytes) -> Result<()> {
        let mut objects = self.objects.write().await;
        objects.insert(
            path.to_string(),
            StoredObject { bytes, last_modified: OffsetDateTime::now_utc(), metadata: None },
        );
        Ok(())
    }

    async fn set_metadata(&self, path: &str, metadata: ObjectMetadata) -> Result<()> {
        let mut objects = self.objects.write().await;
        match objects.get_mut(path) {
            Some(obj) => {
                obj.metadata = Some(metadata);
                Ok(())
            }
            None => Err(crate::ImgCacheError::NotFound(path.to_string())),
        }
    }

    async fn list_segmented(&self, prefix: &str, token: Option<String>) -> Result<ObjectPage> {
        let objects = self.objects.read().await;
        let start = match &token {
            Some(last) => Bound::Excluded(last.clone()),
            None => Bound::Included(prefix.to_string()),
        };
        let mut items = Vec::new();
        for (path, obj) in objects.range((start, Bound::Unbounded)) {
            if !path.starts_with(prefix) {
                break;
            }
            items.push(ObjectItem {
                path: path.clone(),
                last_modified: Some(obj.last_modified),
            });
            if items.len() == self.page_size {
                break;
            }
        }
        let next_token = if items.len() == self.page_size {
            items.last().map(|i| i.path.clone())
        } else {
            None
        };
        Ok(ObjectPage { items, next_token })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut objects = self.objects.write().await;
        objects.remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listing_paginates_with_continuation_token() {
        let store = MemoryStore::with_page_size(2);
        for i in 0..5 {
            store.upload(&format!("cache/a/{i}.jpg"), Bytes::from_static(b"x")).await.unwrap();
        }
        store.upload("other/z.jpg", Bytes::from_static(b"x")).await.unwrap();

        let mut seen = Vec::new();
        let mut token = None;
        loop {
            let page = store.list_segmented("cache/a/", token).await.unwrap();
            seen.extend(page.items.into_iter().map(|i| i.path));
            token = page.next_token;
            if token.is_none() {
                break;
            }
        }
        assert_eq!(seen.len(), 5);
        assert!(seen.iter().all(|p| p.starts_with("cache/a/")));
    }

    #[tokio::test]
    async fn set_metadata_on_missing_object_fails() {
        let store = MemoryStore::new();
        let meta = ObjectMetadata {
            content_type: "image/jpeg".into(),
            cache_control: "public, max-age=60".into(),
            tags: vec![],
        };
        assert!(store.set_metadata("cache/missing.jpg", meta).await.is_err());
    }
}
