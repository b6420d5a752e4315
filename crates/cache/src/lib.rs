//! Content-addressed result cache.
//!
//! Results are looked up by a [`CacheKey`] fingerprint of model content,
//! canonical parameters and engine version. Any change to one of those
//! produces a different key, so invalidation is implicit; TTL and size
//! limits are applied lazily on `get`/`put`.

pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod model;
pub mod store;

pub use cache::{CacheEntry, CacheStats, EntryMetadata, ResultCache};
pub use config::CacheConfig;
pub use error::CacheError;
pub use fingerprint::{CacheKey, KeyOptions};
pub use model::{DirectoryModelSource, InMemoryModelSource, ModelSource};
pub use store::{in_memory_store, local_store};
