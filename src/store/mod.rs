// Re-export modules
pub mod fs;
pub mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

use bytes::Bytes;
use time::OffsetDateTime;

use crate::Result;

/// Metadata-only view of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectAttributes {
    pub last_modified: OffsetDateTime,
    pub length: u64,
}

/// Metadata written alongside cached artifacts.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ObjectMetadata {
    pub content_type: String,
    pub cache_control: String,
    /// Provenance tags, e.g. the writing system and its version.
    pub tags: Vec<(String, String)>,
}

/// One object in a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectItem {
    pub path: String,
    /// Absent when the store could not report a timestamp.
    pub last_modified: Option<OffsetDateTime>,
}

/// A single page of a segmented listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub items: Vec<ObjectItem>,
    /// Continuation token for the next page, `None` when exhausted.
    pub next_token: Option<String>,
}

/// Narrow interface over the remote object store.
///
/// Paths are container-qualified, slash-separated keys
/// (`cache/a/b/c/1/2/3/<key>.jpg`). All operations may fail with a
/// transport-level error; callers decide how much failure to tolerate.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create the cached container if it does not exist. Must be safe to
    /// invoke redundantly from concurrent first requests.
    async fn create_container(&self) -> Result<()>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Metadata-only fetch; `Ok(None)` means the object is absent.
    async fn get_attributes(&self, path: &str) -> Result<Option<ObjectAttributes>>;

    async fn upload(&self, path: &str, bytes: Bytes) -> Result<()>;

    async fn set_metadata(&self, path: &str, metadata: ObjectMetadata) -> Result<()>;

    /// List objects under `prefix`, one page at a time.
    async fn list_segmented(&self, prefix: &str, token: Option<String>) -> Result<ObjectPage>;

    async fn delete(&self, path: &str) -> Result<()>;
}
