//! Blob storage for cache entries, wrapping `object_store`.

use std::path::Path;
use std::sync::Arc;

use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use tracing::info;

use crate::error::CacheError;
use crate::fingerprint::CacheKey;

/// Prefix every entry lives under.
pub const RESULTS_PREFIX: &str = "results";

const ENTRY_SUFFIX: &str = ".json";

/// Filesystem-backed store rooted at `dir` (created if missing).
pub fn local_store(dir: &Path) -> Result<Arc<dyn ObjectStore>, CacheError> {
    std::fs::create_dir_all(dir)?;
    let canonical = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
    let store = LocalFileSystem::new_with_prefix(&canonical)?;
    info!("Result cache: local store at {}", canonical.display());
    Ok(Arc::new(store))
}

/// Process-local store; contents vanish with the process.
pub fn in_memory_store() -> Arc<dyn ObjectStore> {
    Arc::new(InMemory::new())
}

/// Storage location of the entry for `key`.
pub fn entry_path(key: &CacheKey) -> ObjectPath {
    ObjectPath::from(format!("{}/{}{}", RESULTS_PREFIX, key, ENTRY_SUFFIX))
}

/// Recover the key from an entry location, ignoring foreign objects.
pub fn key_from_path(path: &ObjectPath) -> Option<CacheKey> {
    let name = path.filename()?;
    name.strip_suffix(ENTRY_SUFFIX)?.parse().ok()
}
