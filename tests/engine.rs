use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use time::{Duration, OffsetDateTime};

use imgcache::cache::{CacheIndex, CachedEntry, ImageCache, MemoryIndex};
use imgcache::config::CacheConfig;
use imgcache::store::{MemoryStore, ObjectStore};

fn test_config(window_days: i64) -> CacheConfig {
    CacheConfig {
        cached_container: "cache".to_string(),
        store_endpoint: "http://store.local".to_string(),
        freshness_window: Duration::days(window_days),
        ..CacheConfig::default()
    }
}

fn engine(
    store: Arc<MemoryStore>,
    index: Arc<MemoryIndex>,
    window_days: i64,
) -> Arc<ImageCache> {
    Arc::new(ImageCache::new(test_config(window_days), store, index))
}

fn params() -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert("src".to_string(), "photo.jpg".to_string());
    params.insert("w".to_string(), "400".to_string());
    params
}

#[tokio::test]
async fn unknown_key_reports_new() {
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(MemoryIndex::new());
    let cache = engine(store, index, 30);

    let session = cache.session("photo.jpg", &params()).await;
    assert!(session.is_stale_or_missing().await);
}

#[tokio::test]
async fn persist_then_recheck_reports_not_new() {
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(MemoryIndex::new());
    let cache = engine(store.clone(), index, 30);

    let session = cache.session("photo.jpg", &params()).await;
    assert!(session.is_stale_or_missing().await);

    session.persist(Bytes::from_static(b"pixels"), "image/jpeg").await.unwrap();
    assert!(!session.is_stale_or_missing().await);

    let metadata = store.metadata_of(session.storage_path()).await.unwrap();
    assert_eq!(metadata.content_type, "image/jpeg");
    assert!(metadata.cache_control.starts_with("public, max-age="));
    assert!(metadata.tags.iter().any(|(k, v)| k == "creator" && v.starts_with("imgcache/")));
}

#[tokio::test]
async fn cold_index_is_rebuilt_from_store_metadata() {
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(MemoryIndex::new());
    let cache = engine(store.clone(), index.clone(), 30);

    let session = cache.session("photo.jpg", &params()).await;
    store
        .insert_with_timestamp(
            session.storage_path(),
            Bytes::from_static(b"pixels"),
            OffsetDateTime::now_utc() - Duration::days(1),
        )
        .await;

    // No index entry, but the store has the object: not new, and the
    // index gets populated from store attributes.
    assert!(!session.is_stale_or_missing().await);
    let entry = index.get(session.storage_path()).await.unwrap().unwrap();
    assert_eq!(entry.storage_path, session.storage_path());
}

#[tokio::test]
async fn expired_entry_reports_new_and_evicts_index_only() {
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(MemoryIndex::new());
    let cache = engine(store.clone(), index.clone(), 2);

    let session = cache.session("photo.jpg", &params()).await;
    store
        .insert_with_timestamp(
            session.storage_path(),
            Bytes::from_static(b"pixels"),
            OffsetDateTime::now_utc() - Duration::days(10),
        )
        .await;
    index
        .add(CachedEntry::new(
            "stem",
            session.storage_path(),
            OffsetDateTime::now_utc() - Duration::days(10),
        ))
        .await
        .unwrap();

    assert!(session.is_stale_or_missing().await);
    // Evicted from the index, but deletion is the trimmer's job.
    assert_eq!(index.get(session.storage_path()).await.unwrap(), None);
    assert!(store.exists(session.storage_path()).await.unwrap());
}

#[tokio::test]
async fn index_entry_ahead_of_store_is_tolerated() {
    // The index may reference objects another process already deleted; the
    // entry still answers freshness, and regeneration reconciles it.
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(MemoryIndex::new());
    let cache = engine(store, index.clone(), 30);

    let session = cache.session("photo.jpg", &params()).await;
    index
        .add(CachedEntry::new("stem", session.storage_path(), OffsetDateTime::now_utc()))
        .await
        .unwrap();
    assert!(!session.is_stale_or_missing().await);
}

#[tokio::test]
async fn distinct_instructions_produce_distinct_entries() {
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(MemoryIndex::new());
    let cache = engine(store, index, 30);

    let small = cache.session("photo.jpg", &params()).await;
    let mut large_params = params();
    large_params.insert("w".to_string(), "800".to_string());
    let large = cache.session("photo.jpg", &large_params).await;

    assert_ne!(small.cache_key(), large.cache_key());
    assert_ne!(small.storage_path(), large.storage_path());
}

fn shard_root(storage_path: &str) -> String {
    let dir = storage_path.rsplit_once('/').unwrap().0;
    dir.rsplit_once('/').unwrap().0.to_string()
}

#[tokio::test]
async fn trim_deletes_maximal_expired_prefix_and_keeps_fresh() {
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(MemoryIndex::new());
    let cache = engine(store.clone(), index.clone(), 2);

    let session = cache.session("photo.jpg", &params()).await;
    let root = shard_root(session.storage_path());
    let now = OffsetDateTime::now_utc();

    let aged = [
        ("old-a.jpg", Duration::days(10)),
        ("old-b.jpg", Duration::days(9)),
        ("old-c.jpg", Duration::days(3)),
        ("fresh-a.jpg", Duration::days(1)),
        ("fresh-b.jpg", Duration::hours(1)),
    ];
    for (name, age) in &aged {
        let path = format!("{root}/x/{name}");
        store.insert_with_timestamp(&path, Bytes::from_static(b"pixels"), now - *age).await;
        index.add(CachedEntry::new("stem", &path, now - *age)).await.unwrap();
    }
    // Outside the shard root: never touched.
    store
        .insert_with_timestamp("cache/z/other.jpg", Bytes::from_static(b"pixels"), now - Duration::days(30))
        .await;

    let removed = session.trim_expired().await.unwrap();
    assert_eq!(removed, 3);

    for (name, age) in &aged {
        let path = format!("{root}/x/{name}");
        let expect_alive = *age <= Duration::days(2);
        assert_eq!(store.exists(&path).await.unwrap(), expect_alive, "{name}");
        assert_eq!(index.get(&path).await.unwrap().is_some(), expect_alive, "{name}");
    }
    assert!(store.exists("cache/z/other.jpg").await.unwrap());
}

#[tokio::test]
async fn trim_walks_paginated_listings() {
    let store = Arc::new(MemoryStore::with_page_size(2));
    let index = Arc::new(MemoryIndex::new());
    let cache = engine(store.clone(), index, 2);

    let session = cache.session("photo.jpg", &params()).await;
    let root = shard_root(session.storage_path());
    let now = OffsetDateTime::now_utc();

    for i in 0..7 {
        let path = format!("{root}/x/old-{i}.jpg");
        store
            .insert_with_timestamp(&path, Bytes::from_static(b"pixels"), now - Duration::days(10 + i))
            .await;
    }

    let removed = session.trim_expired().await.unwrap();
    assert_eq!(removed, 7);
}

/// Store wrapper whose delete fails for one specific path.
struct FailingDeleteStore {
    inner: Arc<MemoryStore>,
    poison: String,
}

#[async_trait::async_trait]
impl ObjectStore for FailingDeleteStore {
    async fn create_container(&self) -> imgcache::Result<()> {
        self.inner.create_container().await
    }
    async fn exists(&self, path: &str) -> imgcache::Result<bool> {
        self.inner.exists(path).await
    }
    async fn get_attributes(
        &self,
        path: &str,
    ) -> imgcache::Result<Option<imgcache::store::ObjectAttributes>> {
        self.inner.get_attributes(path).await
    }
    async fn upload(&self, path: &str, bytes: Bytes) -> imgcache::Result<()> {
        self.inner.upload(path, bytes).await
    }
    async fn set_metadata(
        &self,
        path: &str,
        metadata: imgcache::store::ObjectMetadata,
    ) -> imgcache::Result<()> {
        self.inner.set_metadata(path, metadata).await
    }
    async fn list_segmented(
        &self,
        prefix: &str,
        token: Option<String>,
    ) -> imgcache::Result<imgcache::store::ObjectPage> {
        self.inner.list_segmented(prefix, token).await
    }
    async fn delete(&self, path: &str) -> imgcache::Result<()> {
        if path == self.poison {
            return Err(imgcache::ImgCacheError::StoreError("delete refused".into()));
        }
        self.inner.delete(path).await
    }
}

#[tokio::test]
async fn failed_delete_does_not_abort_the_sweep() {
    let inner = Arc::new(MemoryStore::new());
    let index = Arc::new(MemoryIndex::new());

    // Compute the shard root with a throwaway engine over the same store.
    let probe = engine(inner.clone(), Arc::new(MemoryIndex::new()), 2);
    let probe_session = probe.session("photo.jpg", &params()).await;
    let root = shard_root(probe_session.storage_path());
    let now = OffsetDateTime::now_utc();

    let poison = format!("{root}/x/old-1.jpg");
    for name in ["old-0.jpg", "old-1.jpg", "old-2.jpg"] {
        let path = format!("{root}/x/{name}");
        inner.insert_with_timestamp(&path, Bytes::from_static(b"pixels"), now - Duration::days(10)).await;
    }

    let store = Arc::new(FailingDeleteStore { inner: inner.clone(), poison: poison.clone() });
    let cache = Arc::new(ImageCache::new(test_config(2), store, index));
    let session = cache.session("photo.jpg", &params()).await;

    let removed = session.trim_expired().await.unwrap();
    assert_eq!(removed, 2);
    assert!(inner.exists(&poison).await.unwrap());
    assert!(!inner.exists(&format!("{root}/x/old-0.jpg")).await.unwrap());
    assert!(!inner.exists(&format!("{root}/x/old-2.jpg")).await.unwrap());
}
