use std::path::PathBuf;
use thiserror::Error;

/// How a resolved cache entry is returned to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServeMode {
    /// 302 redirect to the entry's public URL.
    Redirect,
    /// Proxy the cached bytes through this process.
    Stream,
}

impl std::fmt::Display for ServeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServeMode::Redirect => write!(f, "redirect"),
            ServeMode::Stream => write!(f, "stream"),
        }
    }
}

/// Number of leading key characters used as directory shards.
/// Hex keys give ~16 entries per level, 16^6 buckets total.
pub const DEFAULT_SHARD_DEPTH: usize = 6;

pub const DEFAULT_BROWSER_MAX_AGE_DAYS: u32 = 365;
pub const DEFAULT_FRESHNESS_DAYS: i64 = 365;
pub const DEFAULT_MAX_SOURCE_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Container (bucket) holding cached artifacts.
    pub cached_container: String,
    /// Optional container holding source images addressed as `store://` locators.
    pub source_container: Option<String>,
    /// Root URL of the object store, used to build raw storage URLs.
    pub store_endpoint: String,
    /// Public root override for rewritten URLs (e.g. a CDN hostname).
    /// Falls back to `store_endpoint` when unset.
    pub public_root: Option<String>,
    /// Whether rewritten URLs include the container segment. Some deployments
    /// front the store so the bucket name never appears in public URLs.
    pub include_container_in_url: bool,
    pub serve_mode: ServeMode,
    /// Client-side Cache-Control max-age, in days.
    pub browser_max_age_days: u32,
    /// Age past which a cached entry is regenerated and eligible for trimming.
    pub freshness_window: time::Duration,
    pub shard_depth: usize,
    /// When the store is mounted locally, staleness checks probe this root
    /// before issuing a remote metadata request.
    pub local_root: Option<PathBuf>,
    /// Value for Access-Control-Allow-Origin on redirect responses.
    pub cors_origin: Option<String>,
    /// Upper bound on source image downloads, in bytes.
    pub max_source_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cached_container: "cache".into(),
            source_container: None,
            store_endpoint: "http://127.0.0.1:10000".into(),
            public_root: None,
            include_container_in_url: true,
            serve_mode: ServeMode::Redirect,
            browser_max_age_days: DEFAULT_BROWSER_MAX_AGE_DAYS,
            freshness_window: time::Duration::days(DEFAULT_FRESHNESS_DAYS),
            shard_depth: DEFAULT_SHARD_DEPTH,
            local_root: None,
            cors_origin: None,
            max_source_size: DEFAULT_MAX_SOURCE_SIZE,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cached container name cannot be empty")] EmptyContainer,
    #[error("Store endpoint cannot be empty")] EmptyEndpoint,
    #[error("Shard depth must be between 1 and 8")] InvalidShardDepth,
    #[error("Freshness window must be positive")] InvalidFreshnessWindow,
    #[error("Browser max-age must be > 0")] InvalidMaxAge,
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cached_container.trim().is_empty() { return Err(ConfigError::EmptyContainer); }
        if self.store_endpoint.trim().is_empty() { return Err(ConfigError::EmptyEndpoint); }
        if self.shard_depth == 0 || self.shard_depth > 8 { return Err(ConfigError::InvalidShardDepth); }
        if !self.freshness_window.is_positive() { return Err(ConfigError::InvalidFreshnessWindow); }
        if self.browser_max_age_days == 0 { return Err(ConfigError::InvalidMaxAge); }
        Ok(())
    }

    pub fn browser_max_age_secs(&self) -> u64 {
        self.browser_max_age_days as u64 * 24 * 60 * 60
    }
}
