use crate::config::CacheConfig;

/// Maps cache keys to sharded storage paths and public URLs.
///
/// The leading characters of the key become one directory level each, so a
/// uniform hash spreads entries across up to 16^depth buckets instead of
/// piling millions of objects into one directory. Pure given its
/// configuration; performs no I/O.
#[derive(Debug, Clone)]
pub struct PathLayout {
    container: String,
    store_endpoint: String,
    public_root: String,
    include_container_in_url: bool,
    shard_depth: usize,
}

impl PathLayout {
    pub fn from_config(config: &CacheConfig) -> Self {
        let endpoint = config.store_endpoint.trim_end_matches('/').to_string();
        let public_root = config
            .public_root
            .as_deref()
            .unwrap_or(&config.store_endpoint)
            .trim_end_matches('/')
            .to_string();
        Self {
            container: config.cached_container.clone(),
            store_endpoint: endpoint,
            public_root,
            include_container_in_url: config.include_container_in_url,
            shard_depth: config.shard_depth,
        }
    }

    fn shard(&self, key: &str) -> String {
        let mut shard = String::with_capacity(self.shard_depth * 2);
        for c in key.chars().take(self.shard_depth) {
            if !shard.is_empty() {
                shard.push('/');
            }
            shard.push(c);
        }
        shard
    }

    /// Container-qualified location of the artifact inside the store.
    pub fn storage_path(&self, key: &str) -> String {
        format!("{}/{}/{}", self.container, self.shard(key), key)
    }

    /// Externally visible rewritten URL for the artifact.
    pub fn public_url(&self, key: &str) -> String {
        if self.include_container_in_url {
            format!("{}/{}/{}/{}", self.public_root, self.container, self.shard(key), key)
        } else {
            format!("{}/{}/{}", self.public_root, self.shard(key), key)
        }
    }

    /// Direct store URL for a storage path, the self-healing fallback when
    /// the rewritten URL turns out not to resolve.
    pub fn raw_url(&self, storage_path: &str) -> String {
        format!("{}/{}", self.store_endpoint, storage_path)
    }
}
