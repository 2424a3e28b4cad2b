use std::sync::atomic::Ordering;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use reqwest::Client;

use crate::config::{CacheConfig, ServeMode};
use crate::retry::{with_retries, REWRITE_ATTEMPTS};
use crate::{ImgCacheError, Result, METRICS};

/// Conditional headers forwarded from the inbound request to the store.
const FORWARDED_HEADERS: [header::HeaderName; 3] = [
    header::IF_MODIFIED_SINCE,
    header::IF_NONE_MATCH,
    header::CACHE_CONTROL,
];

/// A resolved cache entry, ready to be served.
#[derive(Debug, Clone)]
pub struct RewriteTarget {
    pub public_url: String,
    /// Direct store URL, the fallback when the public URL does not resolve.
    pub raw_url: String,
    pub content_type: String,
}

/// Completes the client response for a resolved entry, by redirect or by
/// streaming proxy, under a bounded retry policy.
pub struct PathRewriter {
    client: Client,
    mode: ServeMode,
    browser_max_age_secs: u64,
    cors_origin: Option<String>,
}

impl PathRewriter {
    pub fn new(client: Client, config: &CacheConfig) -> Self {
        Self {
            client,
            mode: config.serve_mode,
            browser_max_age_secs: config.browser_max_age_secs(),
            cors_origin: config.cors_origin.clone(),
        }
    }

    /// Retries up to [`REWRITE_ATTEMPTS`] times; on exhaustion the failure
    /// is reported once (error log + counter) and returned to the host,
    /// which owns the user-visible error response.
    pub async fn complete_response(
        &self,
        inbound: &HeaderMap,
        target: &RewriteTarget,
    ) -> Result<Response> {
        let result = match self.mode {
            ServeMode::Redirect => with_retries(REWRITE_ATTEMPTS, || self.redirect(target)).await,
            ServeMode::Stream => {
                with_retries(REWRITE_ATTEMPTS, || self.stream(inbound, target)).await
            }
        };
        result.map_err(|e| {
            METRICS.rewrite_failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(url = %target.public_url, error = %e, "Rewrite attempts exhausted");
            e
        })
    }

    async fn redirect(&self, target: &RewriteTarget) -> Result<Response> {
        let probe = self
            .client
            .head(&target.public_url)
            .send()
            .await
            .map_err(|e| ImgCacheError::NetworkError(e.to_string()))?;

        // Self-healing: a missing public URL redirects to the raw storage
        // path instead of surfacing the mismatch to the client.
        let location = if probe.status() == StatusCode::NOT_FOUND {
            tracing::warn!(url = %target.public_url, "Rewritten URL not found, redirecting to raw path");
            &target.raw_url
        } else {
            &target.public_url
        };

        let mut response = Redirect::temporary(location).into_response();
        self.apply_cors(response.headers_mut());
        Ok(response)
    }

    async fn stream(&self, inbound: &HeaderMap, target: &RewriteTarget) -> Result<Response> {
        let mut resp = self.conditional_get(inbound, &target.public_url).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            tracing::warn!(url = %target.public_url, "Rewritten URL not found, streaming from raw path");
            resp = self.conditional_get(inbound, &target.raw_url).await?;
        }

        // A not-modified answer is a valid outcome of the forwarded
        // conditional headers, not an error: pass it through empty.
        if resp.status() == StatusCode::NOT_MODIFIED {
            let mut response = StatusCode::NOT_MODIFIED.into_response();
            copy_validators(resp.headers(), response.headers_mut());
            return Ok(response);
        }

        if !resp.status().is_success() {
            return Err(ImgCacheError::RewriteError(format!(
                "Store answered {} for {}",
                resp.status(),
                target.public_url
            )));
        }

        let mut headers = HeaderMap::new();
        copy_validators(resp.headers(), &mut headers);
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(&target.content_type)
                .unwrap_or(HeaderValue::from_static("application/octet-stream")),
        );
        let cache_control = format!("public, max-age={}", self.browser_max_age_secs);
        if let Ok(value) = HeaderValue::from_str(&cache_control) {
            headers.insert(header::CACHE_CONTROL, value);
        }
        self.apply_cors(&mut headers);

        let body = Body::from_stream(resp.bytes_stream());
        Ok((StatusCode::OK, headers, body).into_response())
    }

    async fn conditional_get(&self, inbound: &HeaderMap, url: &str) -> Result<reqwest::Response> {
        let mut request = self.client.get(url);
        for name in FORWARDED_HEADERS {
            if let Some(value) = inbound.get(&name) {
                request = request.header(name, value.clone());
            }
        }
        request
            .send()
            .await
            .map_err(|e| ImgCacheError::NetworkError(e.to_string()))
    }

    fn apply_cors(&self, headers: &mut HeaderMap) {
        if let Some(origin) = &self.cors_origin {
            if let Ok(value) = HeaderValue::from_str(origin) {
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
            }
        }
    }
}

fn copy_validators(from: &HeaderMap, to: &mut HeaderMap) {
    for name in [header::ETAG, header::LAST_MODIFIED] {
        if let Some(value) = from.get(&name) {
            to.insert(name, value.clone());
        }
    }
}
