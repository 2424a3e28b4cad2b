// Re-export modules
pub mod engine;
pub mod memory;
pub mod sled_index;

pub use engine::{CacheSession, ImageCache};
pub use memory::MemoryIndex;
pub use sled_index::SledIndex;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::Result;

/// One stored artifact, as tracked by the local index.
///
/// Entries are never mutated: a changed source produces a new key and a new
/// entry, and orphaned entries are reclaimed by the trimmer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    /// Filename stem, without extension.
    pub key: String,
    /// Fully qualified location in the store.
    pub storage_path: String,
    /// Creation time, unix seconds UTC.
    pub created_at: i64,
}

impl CachedEntry {
    pub fn new(key: impl Into<String>, storage_path: impl Into<String>, created_at: OffsetDateTime) -> Self {
        Self {
            key: key.into(),
            storage_path: storage_path.into(),
            created_at: created_at.unix_timestamp(),
        }
    }

    pub fn is_expired(&self, window: time::Duration, now: OffsetDateTime) -> bool {
        now.unix_timestamp() - self.created_at > window.whole_seconds()
    }
}

/// Fast-path metadata cache, keyed by storage path.
///
/// The index is advisory: the store is authoritative, and every miss is
/// reconciled by re-querying the store. Implementations must be safe under
/// concurrent access from in-flight requests and the trimmer.
#[async_trait::async_trait]
pub trait CacheIndex: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<CachedEntry>>;

    async fn add(&self, entry: CachedEntry) -> Result<()>;

    async fn remove(&self, path: &str) -> Result<()>;

    /// Number of indexed entries, for the stats endpoint.
    async fn len(&self) -> Result<usize>;
}

/// Generate content type from a normalized file extension.
pub fn content_type_for_extension(ext: &str) -> &'static str {
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}
