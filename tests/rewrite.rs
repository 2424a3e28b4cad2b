use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use imgcache::config::{CacheConfig, ServeMode};
use imgcache::rewrite::{PathRewriter, RewriteTarget};

const ETAG: &str = "\"abc123\"";
const LAST_MODIFIED: &str = "Tue, 15 Nov 1994 08:12:31 GMT";
const BODY: &str = "cached image bytes";

async fn ok_handler(headers: HeaderMap) -> Response {
    let mut out = HeaderMap::new();
    out.insert(header::ETAG, ETAG.parse().unwrap());
    out.insert(header::LAST_MODIFIED, LAST_MODIFIED.parse().unwrap());
    let revalidated = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        == Some(ETAG);
    if revalidated {
        (StatusCode::NOT_MODIFIED, out).into_response()
    } else {
        (StatusCode::OK, out, BODY).into_response()
    }
}

async fn flaky_handler(State(count): State<Arc<AtomicU32>>) -> Response {
    let n = count.fetch_add(1, Ordering::SeqCst) + 1;
    if n < 5 {
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    } else {
        "finally".into_response()
    }
}

/// Local HTTP server standing in for the store's public surface.
async fn spawn_store_fixture() -> (SocketAddr, Arc<AtomicU32>) {
    let count = Arc::new(AtomicU32::new(0));
    let app = Router::new()
        .route("/store/ok.jpg", get(ok_handler))
        .route("/store/flaky.jpg", get(flaky_handler).with_state(count.clone()))
        .route("/store/broken.jpg", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route("/raw/cache/ok.jpg", get(|| async { BODY }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, count)
}

fn rewriter(mode: ServeMode) -> PathRewriter {
    let config = CacheConfig {
        serve_mode: mode,
        cors_origin: Some("https://app.example.com".to_string()),
        ..CacheConfig::default()
    };
    PathRewriter::new(reqwest::Client::new(), &config)
}

fn target(addr: SocketAddr, public: &str) -> RewriteTarget {
    RewriteTarget {
        public_url: format!("http://{addr}{public}"),
        raw_url: format!("http://{addr}/raw/cache/ok.jpg"),
        content_type: "image/jpeg".to_string(),
    }
}

#[tokio::test]
async fn redirect_points_at_public_url() {
    let (addr, _) = spawn_store_fixture().await;
    let rw = rewriter(ServeMode::Redirect);
    let target = target(addr, "/store/ok.jpg");

    let response = rw.complete_response(&HeaderMap::new(), &target).await.unwrap();
    assert!(response.status().is_redirection());
    assert_ne!(response.status(), StatusCode::PERMANENT_REDIRECT);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap().to_str().unwrap(),
        target.public_url
    );
    assert_eq!(
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "https://app.example.com"
    );
}

#[tokio::test]
async fn redirect_falls_back_to_raw_path_when_public_url_missing() {
    let (addr, _) = spawn_store_fixture().await;
    let rw = rewriter(ServeMode::Redirect);
    let target = target(addr, "/store/missing.jpg");

    let response = rw.complete_response(&HeaderMap::new(), &target).await.unwrap();
    assert!(response.status().is_redirection());
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap().to_str().unwrap(),
        target.raw_url
    );
}

#[tokio::test]
async fn stream_copies_validators_and_body() {
    let (addr, _) = spawn_store_fixture().await;
    let rw = rewriter(ServeMode::Stream);
    let target = target(addr, "/store/ok.jpg");

    let response = rw.complete_response(&HeaderMap::new(), &target).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::ETAG).unwrap(), ETAG);
    assert_eq!(response.headers().get(header::LAST_MODIFIED).unwrap(), LAST_MODIFIED);
    assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "image/jpeg");
    let cache_control = response
        .headers()
        .get(header::CACHE_CONTROL)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(cache_control.contains("max-age="));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.as_ref(), BODY.as_bytes());
}

#[tokio::test]
async fn stream_forwards_not_modified_as_is() {
    let (addr, _) = spawn_store_fixture().await;
    let rw = rewriter(ServeMode::Stream);
    let target = target(addr, "/store/ok.jpg");

    let mut inbound = HeaderMap::new();
    inbound.insert(header::IF_NONE_MATCH, ETAG.parse().unwrap());

    let response = rw.complete_response(&inbound, &target).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn stream_falls_back_to_raw_path_when_public_url_missing() {
    let (addr, _) = spawn_store_fixture().await;
    let rw = rewriter(ServeMode::Stream);
    let target = target(addr, "/store/missing.jpg");

    let response = rw.complete_response(&HeaderMap::new(), &target).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.as_ref(), BODY.as_bytes());
}

#[tokio::test]
async fn four_failures_then_success_completes_cleanly() {
    let (addr, count) = spawn_store_fixture().await;
    let rw = rewriter(ServeMode::Stream);
    let target = target(addr, "/store/flaky.jpg");

    let response = rw.complete_response(&HeaderMap::new(), &target).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(count.load(Ordering::SeqCst), 5);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.as_ref(), b"finally");
}

#[tokio::test]
async fn exhausted_retries_surface_one_error() {
    let (addr, _) = spawn_store_fixture().await;
    let rw = rewriter(ServeMode::Stream);
    let target = target(addr, "/store/broken.jpg");

    let result = rw.complete_response(&HeaderMap::new(), &target).await;
    assert!(result.is_err());
}
