use std::path::{Path, PathBuf};

use bytes::Bytes;
use time::OffsetDateTime;
use tokio::fs;

use crate::store::{ObjectAttributes, ObjectItem, ObjectMetadata, ObjectPage, ObjectStore};
use crate::{ImgCacheError, Result};

/// Sidecar file suffix holding JSON-encoded [`ObjectMetadata`].
const META_SUFFIX: &str = ".meta";

/// Filesystem-backed object store for standalone deployments, where the
/// "remote" store is a mounted directory. Object metadata lives in a
/// `.meta` sidecar next to each object; listings never return sidecars.
pub struct FsStore {
    root: PathBuf,
    container: String,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self { root: root.into(), container: container.into() }
    }

    fn path_for(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn store_path(&self, fs_path: &Path) -> Option<String> {
        let rel = fs_path.strip_prefix(&self.root).ok()?;
        let mut out = String::new();
        for part in rel.components() {
            if !out.is_empty() {
                out.push('/');
            }
            out.push_str(&part.as_os_str().to_string_lossy());
        }
        Some(out)
    }

    fn io_err(e: std::io::Error) -> ImgCacheError {
        ImgCacheError::StoreError(e.to_string())
    }
}

#[async_trait::async_trait]
impl ObjectStore for FsStore {
    async fn create_container(&self) -> Result<()> {
        // create_dir_all is a no-op when the directory already exists, so
        // concurrent first requests cannot race to a failure here.
        fs::create_dir_all(self.root.join(&self.container))
            .await
            .map_err(Self::io_err)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        match fs::metadata(self.path_for(path)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::io_err(e)),
        }
    }

    async fn get_attributes(&self, path: &str) -> Result<Option<ObjectAttributes>> {
        match fs::metadata(self.path_for(path)).await {
            Ok(meta) if meta.is_file() => {
                let modified = meta.modified().map_err(Self::io_err)?;
                Ok(Some(ObjectAttributes {
                    last_modified: OffsetDateTime::from(modified),
                    length: meta.len(),
                }))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_err(e)),
        }
    }

    async fn upload(&self, path: &str, bytes: Bytes) -> Result<()> {
        let target = self.path_for(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(Self::io_err)?;
        }
        fs::write(&target, &bytes).await.map_err(Self::io_err)
    }

    async fn set_metadata(&self, path: &str, metadata: ObjectMetadata) -> Result<()> {
        if !self.exists(path).await? {
            return Err(ImgCacheError::NotFound(path.to_string()));
        }
        let sidecar = self.path_for(&format!("{path}{META_SUFFIX}"));
        let json = serde_json::to_vec(&metadata)
            .map_err(|e| ImgCacheError::StoreError(e.to_string()))?;
        fs::write(&sidecar, json).await.map_err(Self::io_err)
    }

    async fn list_segmented(&self, prefix: &str, _token: Option<String>) -> Result<ObjectPage> {
        // A directory walk is not segmented; everything comes back in one
        // page and the continuation token stays None.
        let root = self.path_for(prefix);
        let mut pending = vec![root];
        let mut items = Vec::new();
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Self::io_err(e)),
            };
            while let Some(entry) = entries.next_entry().await.map_err(Self::io_err)? {
                let path = entry.path();
                let meta = entry.metadata().await.map_err(Self::io_err)?;
                if meta.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.to_string_lossy().ends_with(META_SUFFIX) {
                    continue;
                }
                if let Some(store_path) = self.store_path(&path) {
                    items.push(ObjectItem {
                        path: store_path,
                        last_modified: meta.modified().ok().map(OffsetDateTime::from),
                    });
                }
            }
        }
        items.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(ObjectPage { items, next_token: None })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match fs::remove_file(self.path_for(path)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Self::io_err(e)),
        }
        // Sidecar removal is best-effort.
        let _ = fs::remove_file(self.path_for(&format!("{path}{META_SUFFIX}"))).await;
        Ok(())
    }
}
