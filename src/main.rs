use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use imgcache::cache::SledIndex;
use imgcache::config::{CacheConfig, ServeMode};
use imgcache::process::FetchProcessor;
use imgcache::router;
use imgcache::store::FsStore;

/// imgcache standalone server entry point.
///
/// Serves the cache lifecycle engine over a filesystem-backed object store
/// and a sled-backed local index. Designed for environment-based
/// configuration.
///
/// # Configuration
/// Environment variables:
/// - `IMGCACHE_STORE_ROOT`: directory backing the object store (default: ./store)
/// - `IMGCACHE_CONTAINER`: cached container name (default: cache)
/// - `IMGCACHE_SOURCE_CONTAINER`: optional source container for store:// locators
/// - `IMGCACHE_ENDPOINT`: store root URL used in raw storage URLs
/// - `IMGCACHE_PUBLIC_ROOT`: public root override for rewritten URLs
/// - `IMGCACHE_INCLUDE_CONTAINER`: include the container segment in public URLs (default: true)
/// - `IMGCACHE_MODE`: "redirect" or "stream" (default: redirect)
/// - `IMGCACHE_MAX_AGE_DAYS`: browser cache max-age in days
/// - `IMGCACHE_FRESHNESS_DAYS`: freshness window in days
/// - `IMGCACHE_INDEX_DIR`: sled index directory (default: ./index)
/// - `PORT`: HTTP listen port (default: 8080)
/// - `RUST_LOG`: logging verbosity
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with environment-based filtering
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "imgcache=debug".into()),
        )
        .init();

    tracing::info!("Starting imgcache server");

    let store_root = env_or("IMGCACHE_STORE_ROOT", "./store");
    let defaults = CacheConfig::default();

    let cfg = CacheConfig {
        cached_container: env_or("IMGCACHE_CONTAINER", "cache"),
        source_container: std::env::var("IMGCACHE_SOURCE_CONTAINER").ok(),
        store_endpoint: env_or("IMGCACHE_ENDPOINT", "http://127.0.0.1:8080/store"),
        public_root: std::env::var("IMGCACHE_PUBLIC_ROOT").ok(),
        include_container_in_url: env_or("IMGCACHE_INCLUDE_CONTAINER", "true") != "false",
        serve_mode: match env_or("IMGCACHE_MODE", "redirect").as_str() {
            "stream" => ServeMode::Stream,
            _ => ServeMode::Redirect,
        },
        browser_max_age_days: env_parse("IMGCACHE_MAX_AGE_DAYS", defaults.browser_max_age_days),
        freshness_window: time::Duration::days(env_parse(
            "IMGCACHE_FRESHNESS_DAYS",
            defaults.freshness_window.whole_days(),
        )),
        local_root: Some(PathBuf::from(&store_root)),
        ..defaults
    };
    cfg.validate()?;

    let store = Arc::new(FsStore::new(&store_root, cfg.cached_container.clone()));
    let index = Arc::new(SledIndex::new(env_or("IMGCACHE_INDEX_DIR", "./index"))?);
    let client = reqwest::Client::new();
    let processor = Arc::new(FetchProcessor::new(client, cfg.max_source_size));

    let app = router(cfg, store, index, processor);

    // Cloud platforms inject PORT environment variable
    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
