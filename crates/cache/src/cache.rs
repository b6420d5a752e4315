use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use batchsim_core::{Parameters, ResultPayload};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lru::LruCache;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::fingerprint::{CacheKey, KeyOptions};
use crate::store::{self, entry_path, key_from_path, RESULTS_PREFIX};

/// Metadata kept alongside each cached payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub engine_version: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// A cached result, as returned by [`ResultCache::get`].
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: ResultPayload,
    pub metadata: EntryMetadata,
}

/// Counters exposed for dashboards and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

/// On-storage envelope.
#[derive(Serialize, Deserialize)]
struct StoredEntry {
    engine_version: String,
    created_at: DateTime<Utc>,
    payload: ResultPayload,
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    size_bytes: u64,
    created_at: DateTime<Utc>,
}

struct CacheIndex {
    entries: LruCache<CacheKey, IndexEntry>,
    current_bytes: u64,
}

impl CacheIndex {
    /// Insert (or replace) an entry, returning anything pushed out by the
    /// entry-count bound.
    fn insert(&mut self, key: CacheKey, entry: IndexEntry) -> Option<CacheKey> {
        self.current_bytes += entry.size_bytes;
        match self.entries.push(key, entry) {
            Some((old_key, old)) => {
                self.current_bytes = self.current_bytes.saturating_sub(old.size_bytes);
                (old_key != key).then_some(old_key)
            }
            None => None,
        }
    }

    fn remove(&mut self, key: &CacheKey) -> Option<IndexEntry> {
        let removed = self.entries.pop(key)?;
        self.current_bytes = self.current_bytes.saturating_sub(removed.size_bytes);
        Some(removed)
    }

    /// Pop least-recently-used entries until the byte budget holds.
    fn shrink_to(&mut self, max_bytes: u64) -> Vec<CacheKey> {
        let mut evicted = Vec::new();
        while self.current_bytes > max_bytes {
            match self.entries.pop_lru() {
                Some((key, entry)) => {
                    self.current_bytes = self.current_bytes.saturating_sub(entry.size_bytes);
                    evicted.push(key);
                }
                None => break,
            }
        }
        evicted
    }
}

/// Content-addressed result cache over a blob store.
///
/// An in-memory LRU index answers misses without touching storage and
/// drives size-based eviction. Expiry is checked lazily on `get`.
pub struct ResultCache {
    store: Arc<dyn ObjectStore>,
    index: Mutex<CacheIndex>,
    key_options: KeyOptions,
    max_bytes: u64,
    ttl: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl ResultCache {
    /// Create an empty cache over `store`. Existing objects are ignored;
    /// use [`ResultCache::open`] to adopt them.
    pub fn new(store: Arc<dyn ObjectStore>, config: &CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;
        let capacity = NonZeroUsize::new(config.index_capacity)
            .ok_or_else(|| CacheError::Config("index_capacity must be > 0".into()))?;
        Ok(Self {
            store,
            index: Mutex::new(CacheIndex {
                entries: LruCache::new(capacity),
                current_bytes: 0,
            }),
            key_options: config.key_options(),
            max_bytes: config.max_bytes,
            ttl: config.ttl(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        })
    }

    /// Create a cache and rebuild its index from entries already in `store`,
    /// oldest first so the newest end up most-recently-used.
    pub async fn open(store: Arc<dyn ObjectStore>, config: &CacheConfig) -> Result<Self, CacheError> {
        let cache = Self::new(store, config)?;

        let prefix = ObjectPath::from(RESULTS_PREFIX);
        let mut metas: Vec<_> = cache.store.list(Some(&prefix)).try_collect().await?;
        metas.sort_by_key(|m| m.last_modified);

        let mut expired = Vec::new();
        let mut evicted = Vec::new();
        {
            let mut index = cache.lock_index();
            for meta in metas {
                let Some(key) = key_from_path(&meta.location) else {
                    continue;
                };
                if cache.is_expired(meta.last_modified) {
                    expired.push(key);
                    continue;
                }
                let entry = IndexEntry {
                    size_bytes: meta.size as u64,
                    created_at: meta.last_modified,
                };
                evicted.extend(index.insert(key, entry));
            }
            evicted.extend(index.shrink_to(cache.max_bytes));
        }

        cache.expirations.fetch_add(expired.len() as u64, Ordering::Relaxed);
        cache.evictions.fetch_add(evicted.len() as u64, Ordering::Relaxed);
        for key in expired.iter().chain(&evicted) {
            cache.delete_blob(key).await;
        }

        let stats = cache.stats();
        info!(
            "Result cache opened: {} entries ({:.1} MB), {} expired, {} evicted",
            stats.entries,
            stats.bytes as f64 / 1_048_576.0,
            expired.len(),
            evicted.len()
        );
        Ok(cache)
    }

    /// Build the cache described by `config`: a local store when `dir` is
    /// set, otherwise in memory.
    pub async fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        let store = match &config.dir {
            Some(dir) => store::local_store(dir)?,
            None => store::in_memory_store(),
        };
        Self::open(store, config).await
    }

    /// Override the entry lifetime (`None` disables expiry).
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Fingerprint a request with this cache's canonicalisation settings.
    pub fn key_for(
        &self,
        model_content: &[u8],
        parameters: &Parameters,
        engine_version: &str,
    ) -> CacheKey {
        CacheKey::compute(model_content, parameters, engine_version, &self.key_options)
    }

    pub fn key_options(&self) -> &KeyOptions {
        &self.key_options
    }

    /// Look up a result. Storage is only read when the index knows the key;
    /// read failures degrade to a miss.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let indexed = self.lock_index().entries.get(key).copied();
        let Some(indexed) = indexed else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if self.is_expired(indexed.created_at) {
            self.lock_index().remove(key);
            self.delete_blob(key).await;
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "cache entry expired");
            return None;
        }

        match self.read_entry(key).await {
            Ok(stored) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(CacheEntry {
                    key: *key,
                    payload: stored.payload,
                    metadata: EntryMetadata {
                        engine_version: stored.engine_version,
                        created_at: stored.created_at,
                        size_bytes: indexed.size_bytes,
                    },
                })
            }
            Err(e) => {
                warn!(key = %key, error = %e, "dropping unreadable cache entry");
                self.lock_index().remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a result, replacing any entry with the same key, then evict
    /// least-recently-used entries over the byte budget.
    pub async fn put(
        &self,
        key: CacheKey,
        payload: ResultPayload,
        engine_version: &str,
    ) -> Result<EntryMetadata, CacheError> {
        let created_at = Utc::now();
        let stored = StoredEntry {
            engine_version: engine_version.to_string(),
            created_at,
            payload,
        };
        let body = serde_json::to_vec(&stored)?;
        let size_bytes = body.len() as u64;
        if size_bytes > self.max_bytes {
            return Err(CacheError::TooLarge {
                size: size_bytes,
                max_bytes: self.max_bytes,
            });
        }

        self.store
            .put(&entry_path(&key), PutPayload::from(Bytes::from(body)))
            .await?;

        let evicted = {
            let mut index = self.lock_index();
            let mut evicted: Vec<CacheKey> = index
                .insert(key, IndexEntry { size_bytes, created_at })
                .into_iter()
                .collect();
            evicted.extend(index.shrink_to(self.max_bytes));
            evicted
        };

        if !evicted.is_empty() {
            self.evictions.fetch_add(evicted.len() as u64, Ordering::Relaxed);
            for old in &evicted {
                debug!(key = %old, "evicting cache entry");
                self.delete_blob(old).await;
            }
        }

        Ok(EntryMetadata {
            engine_version: engine_version.to_string(),
            created_at,
            size_bytes,
        })
    }

    /// Drop one entry. Returns whether it was indexed.
    pub async fn remove(&self, key: &CacheKey) -> bool {
        let removed = self.lock_index().remove(key).is_some();
        if removed {
            self.delete_blob(key).await;
        }
        removed
    }

    /// Drop every indexed entry.
    pub async fn clear(&self) {
        let keys: Vec<CacheKey> = {
            let mut index = self.lock_index();
            let keys = index.entries.iter().map(|(k, _)| *k).collect();
            index.entries.clear();
            index.current_bytes = 0;
            keys
        };
        for key in &keys {
            self.delete_blob(key).await;
        }
        info!("Result cache cleared ({} entries)", keys.len());
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock_index().entries.contains(key)
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, bytes) = {
            let index = self.lock_index();
            (index.entries.len(), index.current_bytes)
        };
        CacheStats {
            entries,
            bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    fn lock_index(&self) -> MutexGuard<'_, CacheIndex> {
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_expired(&self, created_at: DateTime<Utc>) -> bool {
        match self.ttl {
            Some(ttl) => {
                let age = Utc::now().signed_duration_since(created_at);
                age.to_std().unwrap_or_default() > ttl
            }
            None => false,
        }
    }

    async fn read_entry(&self, key: &CacheKey) -> Result<StoredEntry, CacheError> {
        let data = self.store.get(&entry_path(key)).await?.bytes().await?;
        Ok(serde_json::from_slice(&data)?)
    }

    async fn delete_blob(&self, key: &CacheKey) {
        match self.store.delete(&entry_path(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => warn!(key = %key, error = %e, "failed to delete cache blob"),
        }
    }
}
