use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use thiserror::Error;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

pub mod cache;
pub mod config;
pub mod fingerprint;
pub mod layout;
pub mod process;
pub mod retry;
pub mod rewrite;
pub mod store;

use crate::cache::{CacheIndex, ImageCache};
use crate::config::CacheConfig;
use crate::process::Processor;
use crate::store::ObjectStore;

#[derive(Error, Debug)]
pub enum ImgCacheError {
    #[error("Store error: {0}")]
    StoreError(String),
    #[error("Index error: {0}")]
    IndexError(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Rewrite error: {0}")]
    RewriteError(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Internal server error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, ImgCacheError>;

impl ImgCacheError {
    fn status(&self) -> StatusCode {
        match self {
            ImgCacheError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ImgCacheError::NotFound(_) => StatusCode::NOT_FOUND,
            ImgCacheError::NetworkError(_) | ImgCacheError::RewriteError(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Shared request state: the engine plus the pipeline that produces bytes
/// on a cache miss.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<ImageCache>,
    pub processor: Arc<dyn Processor>,
}

async fn image_handler(
    Query(params): Query<BTreeMap<String, String>>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let Some(src) = params.get("src").cloned() else {
        return (StatusCode::BAD_REQUEST, "Missing src parameter").into_response();
    };
    tracing::debug!(src, "Processing image request");

    let session = state.cache.session(&src, &params).await;

    if session.is_stale_or_missing().await {
        tracing::info!(key = session.cache_key(), "Cache miss, regenerating");
        METRICS.cache_misses.fetch_add(1, Ordering::Relaxed);

        let (bytes, content_type) = match state.processor.process(&src, &params).await {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(src, error = %e, "Pipeline failed");
                return (e.status(), e.to_string()).into_response();
            }
        };
        if let Err(e) = session.persist(bytes, &content_type).await {
            tracing::error!(key = session.cache_key(), error = %e, "Persist failed");
            return (e.status(), e.to_string()).into_response();
        }

        // Sweep this entry's shard root off the request path.
        let trim_session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = trim_session.trim_expired().await {
                tracing::warn!(error = %e, "Trim sweep failed");
            }
        });
    } else {
        tracing::info!(key = session.cache_key(), "Cache hit");
        METRICS.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    match session.complete_response(&headers).await {
        Ok(response) => response,
        Err(e) => (e.status(), e.to_string()).into_response(),
    }
}

// ====================================================================================
// OBSERVABILITY
// ====================================================================================

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics tracking
pub struct Metrics {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub trims: AtomicU64,
    pub rewrite_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            trims: AtomicU64::new(0),
            rewrite_failures: AtomicU64::new(0),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    pub(crate) static ref METRICS: Metrics = Metrics::new();
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    use serde_json::json;

    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "imgcache"
    }))
}

/// Cache statistics endpoint
async fn cache_stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    use serde_json::json;

    let indexed = match state.cache.index_len().await {
        Ok(n) => n,
        Err(e) => {
            return (StatusCode::INTERNAL_SERVER_ERROR, format!("Index error: {e}"))
                .into_response()
        }
    };

    let hits = METRICS.cache_hits.load(Ordering::Relaxed);
    let misses = METRICS.cache_misses.load(Ordering::Relaxed);
    let total_requests = hits + misses;
    let hit_rate = if total_requests > 0 {
        (hits as f64 / total_requests as f64) * 100.0
    } else {
        0.0
    };

    Json(json!({
        "index": {
            "entry_count": indexed,
        },
        "requests": {
            "cache_hits": hits,
            "cache_misses": misses,
            "total": total_requests,
            "hit_rate_percent": hit_rate,
        },
        "maintenance": {
            "trimmed_objects": METRICS.trims.load(Ordering::Relaxed),
            "rewrite_failures": METRICS.rewrite_failures.load(Ordering::Relaxed),
        }
    }))
    .into_response()
}

/// Metrics endpoint (Prometheus-compatible plain text)
async fn metrics_handler() -> impl IntoResponse {
    let hits = METRICS.cache_hits.load(Ordering::Relaxed);
    let misses = METRICS.cache_misses.load(Ordering::Relaxed);
    let trims = METRICS.trims.load(Ordering::Relaxed);
    let rewrite_failures = METRICS.rewrite_failures.load(Ordering::Relaxed);

    let metrics = format!(
        "# HELP imgcache_cache_hits_total Total number of cache hits\n\
         # TYPE imgcache_cache_hits_total counter\n\
         imgcache_cache_hits_total {}\n\
         # HELP imgcache_cache_misses_total Total number of cache misses\n\
         # TYPE imgcache_cache_misses_total counter\n\
         imgcache_cache_misses_total {}\n\
         # HELP imgcache_trimmed_objects_total Total number of expired objects deleted\n\
         # TYPE imgcache_trimmed_objects_total counter\n\
         imgcache_trimmed_objects_total {}\n\
         # HELP imgcache_rewrite_failures_total Total number of exhausted rewrite retries\n\
         # TYPE imgcache_rewrite_failures_total counter\n\
         imgcache_rewrite_failures_total {}\n",
        hits, misses, trims, rewrite_failures
    );

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        metrics,
    )
}

/// Build the service router around a store, an index and a processor.
pub fn router(
    config: CacheConfig,
    store: Arc<dyn ObjectStore>,
    index: Arc<dyn CacheIndex>,
    processor: Arc<dyn Processor>,
) -> Router {
    let state = AppState {
        cache: Arc::new(ImageCache::new(config, store, index)),
        processor,
    };

    // Observability endpoints - NO rate limiting
    let observability_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/stats/cache", get(cache_stats_handler).with_state(state.clone()))
        .route("/metrics", get(metrics_handler));

    // Image endpoint - WITH rate limiting
    let mut image_routes = Router::new().route("/img", get(image_handler).with_state(state));

    if std::env::var("DISABLE_RATE_LIMIT").is_err() {
        // 10 req/sec per IP, burst of 30
        let governor_conf = Box::new(
            GovernorConfigBuilder::default()
                .per_second(10)
                .burst_size(30)
                .finish()
                .unwrap(),
        );

        tracing::info!("Router configured with rate limiting: 10/sec, burst 30");

        image_routes = image_routes.layer(GovernorLayer {
            config: Box::leak(governor_conf),
        });
    } else {
        tracing::info!("Rate limiting disabled");
    }

    Router::new().merge(observability_routes).merge(image_routes)
}
