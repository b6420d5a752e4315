//! Orchestrator configuration.
//!
//! Loaded either from a TOML document or from `BATCHSIM_*` environment
//! variables (with `.env` support). Profiles work as in
//! [`batchsim_core::config`]: with `BATCHSIM_PROFILE=PROD` every key is
//! looked up as `PROD_BATCHSIM_{KEY}` before `BATCHSIM_{KEY}`.

use std::path::PathBuf;

use batchsim_cache::CacheConfig;
use batchsim_core::config::{
    active_profile, load_dotenv, profiled_env_list, profiled_env_opt, profiled_env_parse,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::SchedulerError;
use crate::scheduler::SchedulerConfig;

const BYTES_PER_MB: u64 = 1_048_576;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Active profile name (empty = default).
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl OrchestratorConfig {
    /// Load `.env`, then build config for the profile named by
    /// `BATCHSIM_PROFILE`.
    pub fn from_env() -> Self {
        load_dotenv();
        Self::for_profile(&active_profile())
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            scheduler: scheduler_from_env(p),
            cache: cache_from_env(p),
        }
    }

    /// Parse a TOML document; missing sections and fields take defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, SchedulerError> {
        let config: Self =
            toml::from_str(s).map_err(|e| SchedulerError::Config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        self.scheduler.validate()?;
        self.cache
            .validate()
            .map_err(|e| SchedulerError::Config(e.to_string()))
    }

    fn profile_label(&self) -> &str {
        if self.profile.is_empty() {
            "default"
        } else {
            &self.profile
        }
    }

    /// Log the effective configuration at startup.
    pub fn log_summary(&self) {
        let s = &self.scheduler;
        let c = &self.cache;
        info!("Config loaded (profile: {}):", self.profile_label());
        info!(
            "  scheduler:   batch={}, retries={}, base_delay={}ms, in_flight={}, poll={}ms",
            s.max_batch_size, s.max_retries, s.retry_base_delay_ms, s.max_in_flight, s.poll_interval_ms
        );
        info!(
            "  cache:       dir={}, max={}MB, ttl={}s, precision={}, exclude=[{}]",
            c.dir
                .as_ref()
                .map(|d| d.display().to_string())
                .unwrap_or_else(|| "(memory)".into()),
            c.max_bytes / BYTES_PER_MB,
            c.ttl_seconds,
            c.key_precision,
            c.exclude_keys.join(",")
        );
    }
}

fn scheduler_from_env(p: &str) -> SchedulerConfig {
    let d = SchedulerConfig::default();
    SchedulerConfig {
        max_batch_size: profiled_env_parse(p, "MAX_BATCH_SIZE", d.max_batch_size),
        max_retries: profiled_env_parse(p, "MAX_RETRIES", d.max_retries),
        retry_base_delay_ms: profiled_env_parse(p, "RETRY_BASE_DELAY_MS", d.retry_base_delay_ms),
        max_in_flight: profiled_env_parse(p, "MAX_IN_FLIGHT", d.max_in_flight),
        poll_interval_ms: profiled_env_parse(p, "POLL_INTERVAL_MS", d.poll_interval_ms),
        event_capacity: profiled_env_parse(p, "EVENT_CAPACITY", d.event_capacity),
    }
}

fn cache_from_env(p: &str) -> CacheConfig {
    let d = CacheConfig::default();
    CacheConfig {
        dir: profiled_env_opt(p, "CACHE_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from),
        max_bytes: profiled_env_parse(p, "CACHE_MAX_MB", d.max_bytes / BYTES_PER_MB)
            .saturating_mul(BYTES_PER_MB),
        ttl_seconds: profiled_env_parse(p, "CACHE_TTL_SECS", d.ttl_seconds),
        key_precision: profiled_env_parse(p, "CACHE_KEY_PRECISION", d.key_precision),
        exclude_keys: profiled_env_list(p, "CACHE_EXCLUDE_KEYS").unwrap_or(d.exclude_keys),
        index_capacity: profiled_env_parse(p, "CACHE_INDEX_CAPACITY", d.index_capacity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.scheduler.max_batch_size, 4);
        assert_eq!(config.scheduler.max_retries, 3);
        assert_eq!(config.scheduler.retry_base_delay_ms, 500);
        assert_eq!(config.scheduler.max_in_flight, 2);
        assert_eq!(config.cache.max_bytes, 512 * BYTES_PER_MB);
        assert_eq!(config.cache.ttl_seconds, 7 * 24 * 3600);
        assert_eq!(config.cache.exclude_keys, vec!["timestamp", "request_id"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_partial_toml() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
            [scheduler]
            max_batch_size = 8
            retry_base_delay_ms = 50

            [cache]
            dir = "/var/cache/batchsim"
            ttl_seconds = 0
            exclude_keys = ["seed"]
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.max_batch_size, 8);
        assert_eq!(config.scheduler.retry_base_delay_ms, 50);
        assert_eq!(config.scheduler.max_retries, 3);
        assert_eq!(config.cache.dir, Some(PathBuf::from("/var/cache/batchsim")));
        assert!(config.cache.ttl().is_none());
        assert_eq!(config.cache.exclude_keys, vec!["seed"]);
        assert_eq!(config.cache.key_precision, 10);
    }

    #[test]
    fn empty_toml_is_default() {
        let config = OrchestratorConfig::from_toml_str("").unwrap();
        assert_eq!(config.scheduler.max_in_flight, 2);
        assert!(config.cache.dir.is_none());
    }

    #[test]
    fn toml_rejects_invalid_values() {
        let err = OrchestratorConfig::from_toml_str("[scheduler]\nmax_batch_size = 0\n").unwrap_err();
        assert!(matches!(err, SchedulerError::Config(_)));

        let err = OrchestratorConfig::from_toml_str("[cache]\nkey_precision = 40\n").unwrap_err();
        assert!(matches!(err, SchedulerError::Config(_)));

        let err = OrchestratorConfig::from_toml_str("[scheduler\n").unwrap_err();
        assert!(err.to_string().contains("invalid TOML"));
    }

    #[test]
    fn profiled_env_overrides() {
        std::env::set_var("ORCHTEST_BATCHSIM_MAX_BATCH_SIZE", "16");
        std::env::set_var("ORCHTEST_BATCHSIM_CACHE_MAX_MB", "64");
        std::env::set_var("ORCHTEST_BATCHSIM_CACHE_EXCLUDE_KEYS", "seed, run_id");
        std::env::set_var("ORCHTEST_BATCHSIM_CACHE_DIR", "/tmp/batchsim-orchtest");

        let config = OrchestratorConfig::for_profile("orchtest");
        assert_eq!(config.profile, "ORCHTEST");
        assert_eq!(config.scheduler.max_batch_size, 16);
        assert_eq!(config.cache.max_bytes, 64 * BYTES_PER_MB);
        assert_eq!(config.cache.exclude_keys, vec!["seed", "run_id"]);
        assert_eq!(config.cache.dir, Some(PathBuf::from("/tmp/batchsim-orchtest")));
        // Unset keys keep their defaults.
        assert_eq!(config.scheduler.max_retries, 3);
    }
}
