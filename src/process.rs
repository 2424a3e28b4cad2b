use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use mime::Mime;
use reqwest::Client;

use crate::cache::content_type_for_extension;
use crate::fingerprint::{resolve_extension, source_kind, SourceKind};
use crate::{ImgCacheError, Result};

/// The image-processing pipeline as seen by the cache. Given a source
/// locator and its transformation instructions, produce the processed bytes
/// and their content type.
#[async_trait::async_trait]
pub trait Processor: Send + Sync {
    async fn process(
        &self,
        locator: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<(Bytes, String)>;
}

/// Pass-through processor that fetches source bytes unmodified. Stands in
/// for a real pipeline in the standalone binary and in tests.
///
/// Remote fetches enforce the size limit twice: a Content-Length pre-check,
/// then streaming accumulation, so a spoofed header cannot exhaust memory.
pub struct FetchProcessor {
    client: Client,
    max_size: usize,
}

impl FetchProcessor {
    pub fn new(client: Client, max_size: usize) -> Self {
        Self { client, max_size }
    }

    async fn fetch_remote(&self, url: &str) -> Result<(Bytes, String)> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ImgCacheError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ImgCacheError::NetworkError(format!(
                "Upstream status: {}",
                resp.status()
            )));
        }

        let ct = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if let Ok(m) = ct.parse::<Mime>() {
            if m.type_().as_str() != "image" {
                return Err(ImgCacheError::InvalidArgument("Source is not an image".into()));
            }
        }
        // Unknown MIME types continue; the pipeline owns deeper validation.

        if let Some(len) = resp.content_length() {
            if len as usize > self.max_size {
                return Err(ImgCacheError::InvalidArgument("Input exceeds size limit".into()));
            }
        }

        let mut buf = BytesMut::with_capacity(8192);
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream
            .next()
            .await
            .transpose()
            .map_err(|e| ImgCacheError::NetworkError(e.to_string()))?
        {
            if buf.len() + chunk.len() > self.max_size {
                return Err(ImgCacheError::InvalidArgument("Input exceeds size limit".into()));
            }
            buf.extend_from_slice(&chunk);
        }

        Ok((buf.freeze(), ct))
    }

    async fn read_local(&self, path: &str) -> Result<(Bytes, String)> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| ImgCacheError::NotFound(format!("{path}: {e}")))?;
        if meta.len() as usize > self.max_size {
            return Err(ImgCacheError::InvalidArgument("Input exceeds size limit".into()));
        }
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ImgCacheError::InternalError(e.to_string()))?;
        Ok((Bytes::from(bytes), String::new()))
    }
}

#[async_trait::async_trait]
impl Processor for FetchProcessor {
    async fn process(
        &self,
        locator: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<(Bytes, String)> {
        let (bytes, ct) = match source_kind(locator) {
            SourceKind::Remote => self.fetch_remote(locator).await?,
            SourceKind::Local => self.read_local(locator).await?,
            SourceKind::Stored => {
                return Err(ImgCacheError::InvalidArgument(
                    "store-hosted sources require a pipeline-backed processor".into(),
                ))
            }
        };
        let content_type = if ct.starts_with("image/") {
            ct
        } else {
            content_type_for_extension(&resolve_extension(locator, params)).to_string()
        };
        Ok((bytes, content_type))
    }
}
