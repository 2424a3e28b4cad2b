use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::http::HeaderMap;
use axum::response::Response;
use bytes::Bytes;
use time::OffsetDateTime;
use tokio::sync::OnceCell;

use crate::cache::{content_type_for_extension, CacheIndex, CachedEntry};
use crate::config::CacheConfig;
use crate::fingerprint::Fingerprinter;
use crate::layout::PathLayout;
use crate::rewrite::{PathRewriter, RewriteTarget};
use crate::store::{ObjectMetadata, ObjectStore};
use crate::{Result, METRICS};

/// The cache lifecycle engine. Process-wide, shared by all in-flight
/// requests; container setup happens once, guarded, on first use.
pub struct ImageCache {
    config: CacheConfig,
    store: Arc<dyn ObjectStore>,
    index: Arc<dyn CacheIndex>,
    layout: PathLayout,
    fingerprinter: Fingerprinter,
    rewriter: PathRewriter,
    container_init: OnceCell<()>,
}

impl ImageCache {
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn ObjectStore>,
        index: Arc<dyn CacheIndex>,
    ) -> Self {
        let client = reqwest::Client::new();
        let layout = PathLayout::from_config(&config);
        let fingerprinter = Fingerprinter::new(
            store.clone(),
            client.clone(),
            config.source_container.clone(),
        );
        let rewriter = PathRewriter::new(client, &config);
        Self {
            config,
            store,
            index,
            layout,
            fingerprinter,
            rewriter,
            container_init: OnceCell::new(),
        }
    }

    /// Idempotent container setup. Concurrent first requests serialize on
    /// the cell, and the store operation itself tolerates re-invocation.
    pub async fn ensure_container(&self) -> Result<()> {
        self.container_init
            .get_or_try_init(|| self.store.create_container())
            .await?;
        Ok(())
    }

    pub async fn index_len(&self) -> Result<usize> {
        self.index.len().await
    }

    /// Start a request-scoped session: compute the cache key once and
    /// derive the storage path and public URL from it.
    pub async fn session(
        self: &Arc<Self>,
        locator: &str,
        params: &BTreeMap<String, String>,
    ) -> CacheSession {
        let full_path = canonical_request_path(locator, params);
        let key = self.fingerprinter.cache_key(locator, &full_path, params).await;
        let storage_path = self.layout.storage_path(&key);
        let public_url = self.layout.public_url(&key);
        CacheSession { cache: self.clone(), key, storage_path, public_url }
    }
}

/// Canonical full path: locator plus sorted transformation instructions.
/// The map is ordered, so parameter insertion order never changes the key.
fn canonical_request_path(locator: &str, params: &BTreeMap<String, String>) -> String {
    let mut parts = Vec::new();
    for (k, v) in params {
        if k != "src" {
            parts.push(format!("{}={}", k, v));
        }
    }
    if parts.is_empty() {
        locator.to_string()
    } else {
        format!("{}?{}", locator, parts.join("&"))
    }
}

/// Per-request view of one cache entry. Cheap to clone; trimming is
/// typically spawned off the request path with a clone.
#[derive(Clone)]
pub struct CacheSession {
    cache: Arc<ImageCache>,
    key: String,
    storage_path: String,
    public_url: String,
}

impl CacheSession {
    pub fn cache_key(&self) -> &str {
        &self.key
    }

    pub fn storage_path(&self) -> &str {
        &self.storage_path
    }

    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    fn key_stem(&self) -> &str {
        self.key.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(&self.key)
    }

    fn extension(&self) -> &str {
        self.key.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("")
    }

    /// Staleness oracle: must the artifact be (re)generated?
    ///
    /// Two-tier lookup, index first, then the authoritative store; an entry
    /// found only in the store is synthesized into the index. Expired
    /// entries are evicted from the index here but never deleted from the
    /// store; that is the trimmer's job.
    pub async fn is_stale_or_missing(&self) -> bool {
        let entry = match self.lookup().await {
            Some(entry) => entry,
            None => return true,
        };
        let now = OffsetDateTime::now_utc();
        if entry.is_expired(self.cache.config.freshness_window, now) {
            tracing::debug!(path = %self.storage_path, "Cache entry expired, evicting from index");
            if let Err(e) = self.cache.index.remove(&self.storage_path).await {
                tracing::warn!(path = %self.storage_path, error = %e, "Failed to evict index entry");
            }
            return true;
        }
        false
    }

    async fn lookup(&self) -> Option<CachedEntry> {
        match self.cache.index.get(&self.storage_path).await {
            Ok(Some(entry)) => return Some(entry),
            Ok(None) => {}
            Err(e) => tracing::warn!(path = %self.storage_path, error = %e, "Index read failed"),
        }

        // Cold index: probe the mounted filesystem first when available,
        // sparing a remote round-trip.
        if let Some(root) = &self.cache.config.local_root {
            let candidate = root.join(&self.storage_path);
            if let Ok(meta) = tokio::fs::metadata(&candidate).await {
                if meta.is_file() {
                    if let Ok(stamp) = meta.created().or_else(|_| meta.modified()) {
                        return Some(self.synthesize(OffsetDateTime::from(stamp)).await);
                    }
                }
            }
        }

        // Metadata-read failures count as absent: regenerating is always
        // safe, failing the request is not.
        match self.cache.store.get_attributes(&self.storage_path).await {
            Ok(Some(attrs)) => Some(self.synthesize(attrs.last_modified).await),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(path = %self.storage_path, error = %e, "Attribute fetch failed, treating as absent");
                None
            }
        }
    }

    async fn synthesize(&self, created_at: OffsetDateTime) -> CachedEntry {
        let entry = CachedEntry::new(self.key_stem(), &self.storage_path, created_at);
        if let Err(e) = self.cache.index.add(entry.clone()).await {
            tracing::warn!(path = %self.storage_path, error = %e, "Failed to populate index");
        }
        entry
    }

    /// Persist processed bytes at the storage path: upload, then metadata,
    /// then the index entry. A failure partway leaves the object with
    /// default metadata, retrievable and correctly named; no cleanup.
    pub async fn persist(&self, bytes: Bytes, content_type: &str) -> Result<()> {
        self.cache.ensure_container().await?;
        self.cache.store.upload(&self.storage_path, bytes).await?;
        let metadata = ObjectMetadata {
            content_type: content_type.to_string(),
            cache_control: format!("public, max-age={}", self.cache.config.browser_max_age_secs()),
            tags: vec![(
                "creator".to_string(),
                format!("imgcache/{}", env!("CARGO_PKG_VERSION")),
            )],
        };
        self.cache.store.set_metadata(&self.storage_path, metadata).await?;
        let entry = CachedEntry::new(self.key_stem(), &self.storage_path, OffsetDateTime::now_utc());
        self.cache.index.add(entry).await?;
        tracing::info!(path = %self.storage_path, "Persisted cache entry");
        Ok(())
    }

    /// Trim expired siblings under this entry's shard root.
    ///
    /// Lists the parent prefix one level above the entry's directory, sorts
    /// ascending by last-modified (missing timestamps first) and deletes
    /// from oldest to newest, stopping at the first non-expired object.
    /// The early stop assumes expired objects form a contiguous
    /// oldest-prefix of the listing, trading completeness for bounded
    /// sweep cost. Per-item delete failures are logged and skipped.
    pub async fn trim_expired(&self) -> Result<usize> {
        let prefix = trim_root(&self.storage_path);
        let mut items = Vec::new();
        let mut token = None;
        loop {
            let page = self.cache.store.list_segmented(prefix, token).await?;
            items.extend(page.items);
            token = page.next_token;
            if token.is_none() {
                break;
            }
        }

        items.sort_by_key(|i| i.last_modified.map(|t| t.unix_timestamp()).unwrap_or(i64::MIN));

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let window = self.cache.config.freshness_window.whole_seconds();
        let mut removed = 0;
        for item in items {
            // An object without a timestamp cannot prove its freshness and
            // is reclaimed with the expired prefix.
            let expired = match item.last_modified {
                Some(stamp) => now - stamp.unix_timestamp() > window,
                None => true,
            };
            if !expired {
                break;
            }
            match self.cache.store.delete(&item.path).await {
                Ok(()) => {
                    if let Err(e) = self.cache.index.remove(&item.path).await {
                        tracing::warn!(path = %item.path, error = %e, "Failed to drop index entry");
                    }
                    removed += 1;
                    METRICS.trims.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::warn!(path = %item.path, error = %e, "Delete failed, continuing sweep");
                }
            }
        }
        if removed > 0 {
            tracing::info!(prefix, removed, "Trimmed expired cache entries");
        }
        Ok(removed)
    }

    /// Complete the client response for this entry via the path rewriter.
    pub async fn complete_response(&self, inbound: &HeaderMap) -> Result<Response> {
        let target = RewriteTarget {
            public_url: self.public_url.clone(),
            raw_url: self.cache.layout.raw_url(&self.storage_path),
            content_type: content_type_for_extension(self.extension()).to_string(),
        };
        self.cache.rewriter.complete_response(inbound, &target).await
    }
}

/// Parent prefix one level above the entry's directory: the sweep covers
/// siblings and cousins under the same shard root, not the whole bucket.
fn trim_root(storage_path: &str) -> &str {
    let dir = storage_path.rsplit_once('/').map(|(d, _)| d).unwrap_or(storage_path);
    dir.rsplit_once('/').map(|(d, _)| d).unwrap_or(dir)
}
