use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::fingerprint::KeyOptions;

/// Result cache configuration, typically parsed from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory for the local blob store. `None` keeps entries in memory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Total payload bytes kept before LRU eviction.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    /// Entry lifetime in seconds. 0 = never expires.
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
    /// Decimal places parameter values are rounded to before hashing.
    #[serde(default = "default_precision")]
    pub key_precision: u32,
    /// Parameter names ignored when fingerprinting (request metadata).
    #[serde(default = "default_exclude_keys")]
    pub exclude_keys: Vec<String>,
    /// Maximum number of entries tracked by the in-memory index.
    #[serde(default = "default_index_capacity")]
    pub index_capacity: usize,
}

fn default_max_bytes() -> u64 { 512 * 1_048_576 }
fn default_ttl() -> u64 { 7 * 24 * 3600 }
fn default_precision() -> u32 { 10 }
fn default_exclude_keys() -> Vec<String> { vec!["timestamp".into(), "request_id".into()] }
fn default_index_capacity() -> usize { 100_000 }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_bytes: default_max_bytes(),
            ttl_seconds: default_ttl(),
            key_precision: default_precision(),
            exclude_keys: default_exclude_keys(),
            index_capacity: default_index_capacity(),
        }
    }
}

impl CacheConfig {
    /// Entry lifetime, `None` when expiry is disabled.
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_seconds > 0).then(|| Duration::from_secs(self.ttl_seconds))
    }

    pub fn key_options(&self) -> KeyOptions {
        KeyOptions {
            precision: self.key_precision,
            exclude_keys: self.exclude_keys.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        if self.max_bytes == 0 {
            return Err(CacheError::Config("max_bytes must be > 0".into()));
        }
        if self.index_capacity == 0 {
            return Err(CacheError::Config("index_capacity must be > 0".into()));
        }
        if self.key_precision > 17 {
            return Err(CacheError::Config(format!(
                "key_precision {} exceeds f64 precision (max 17)",
                self.key_precision
            )));
        }
        Ok(())
    }
}
