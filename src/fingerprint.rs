use std::collections::BTreeMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::store::ObjectStore;

/// Scheme prefix addressing an object in the configured source container.
pub const STORE_SCHEME: &str = "store://";

const DEFAULT_EXTENSION: &str = "jpg";

/// Where a source image lives, decided by locator shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Plain filesystem path.
    Local,
    /// `store://` object in the source container.
    Stored,
    /// Arbitrary http(s) URL.
    Remote,
}

pub fn source_kind(locator: &str) -> SourceKind {
    if locator.starts_with("http://") || locator.starts_with("https://") {
        SourceKind::Remote
    } else if locator.starts_with(STORE_SCHEME) {
        SourceKind::Stored
    } else {
        SourceKind::Local
    }
}

/// Derives deterministic cache keys from a source identity, a best-effort
/// change signal, and the canonical request path.
pub struct Fingerprinter {
    store: Arc<dyn ObjectStore>,
    client: reqwest::Client,
    source_container: Option<String>,
}

impl Fingerprinter {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        client: reqwest::Client,
        source_container: Option<String>,
    ) -> Self {
        Self { store, client, source_container }
    }

    /// Compute `"{hash}.{ext}"` for a source locator and its canonical full
    /// path (path plus transformation instructions). Never fails: a signal
    /// that cannot be obtained degrades to empty, which only loosens
    /// change detection, never the stored bytes.
    pub async fn cache_key(
        &self,
        locator: &str,
        full_path: &str,
        params: &BTreeMap<String, String>,
    ) -> String {
        let signal = self.change_signal(locator).await;
        let mut hasher = Sha256::new();
        hasher.update(signal.as_bytes());
        hasher.update(full_path.as_bytes());
        let hash = hex::encode(hasher.finalize());
        format!("{}.{}", hash, resolve_extension(locator, params))
    }

    /// Best-effort proxy for "has the source changed": modification time
    /// plus size. Every acquisition failure collapses to the empty signal.
    pub async fn change_signal(&self, locator: &str) -> String {
        let signal = match source_kind(locator) {
            SourceKind::Local => self.local_signal(locator).await,
            SourceKind::Stored => self.stored_signal(locator).await,
            SourceKind::Remote => self.remote_signal(locator).await,
        };
        match signal {
            Some(s) => s,
            None => {
                tracing::debug!("No change signal for {locator}; key will not track source changes");
                String::new()
            }
        }
    }

    async fn local_signal(&self, locator: &str) -> Option<String> {
        let meta = tokio::fs::metadata(locator).await.ok()?;
        let stamp = meta.created().or_else(|_| meta.modified()).ok()?;
        let secs = OffsetDateTime::from(stamp).unix_timestamp();
        Some(format!("{}{}", secs, meta.len()))
    }

    async fn stored_signal(&self, locator: &str) -> Option<String> {
        let rest = locator.strip_prefix(STORE_SCHEME)?;
        let path = match &self.source_container {
            Some(container) => format!("{container}/{rest}"),
            None => rest.to_string(),
        };
        let attrs = self.store.get_attributes(&path).await.ok()??;
        Some(format!("{}{}", attrs.last_modified.unix_timestamp(), attrs.length))
    }

    async fn remote_signal(&self, locator: &str) -> Option<String> {
        let resp = self.client.head(locator).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let last_modified = resp
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let length = resp
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if last_modified.is_empty() && length.is_empty() {
            return None;
        }
        Some(format!("{last_modified}{length}"))
    }
}

/// Output extension: explicit format instruction beats the source's own
/// extension, which beats the jpg default.
pub fn resolve_extension(locator: &str, params: &BTreeMap<String, String>) -> String {
    if let Some(fmt) = params.get("f").or_else(|| params.get("format")) {
        let fmt = fmt.trim().to_ascii_lowercase();
        if is_extension(&fmt) {
            return fmt;
        }
    }
    let path = locator
        .split(['?', '#'])
        .next()
        .unwrap_or(locator);
    if let Some((_, ext)) = path.rsplit_once('.') {
        let ext = ext.to_ascii_lowercase();
        if is_extension(&ext) {
            return ext;
        }
    }
    DEFAULT_EXTENSION.to_string()
}

fn is_extension(s: &str) -> bool {
    !s.is_empty() && s.len() <= 5 && s.chars().all(|c| c.is_ascii_alphanumeric())
}
