//! Environment-driven configuration helpers.
//!
//! Every key is read with the `BATCHSIM_` prefix. When a profile is active
//! (`BATCHSIM_PROFILE=PROD`), `PROD_BATCHSIM_{KEY}` is tried before
//! `BATCHSIM_{KEY}`.

use std::env;
use std::str::FromStr;

/// Prefix applied to every configuration key.
pub const ENV_PREFIX: &str = "BATCHSIM";

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

/// Active profile from `BATCHSIM_PROFILE`, uppercased (empty = default).
pub fn active_profile() -> String {
    env_opt(&format!("{}_PROFILE", ENV_PREFIX))
        .unwrap_or_default()
        .to_uppercase()
}

/// Read a profiled env var: tries `{PROFILE}_BATCHSIM_{KEY}` first, falls
/// back to `BATCHSIM_{KEY}`.
pub fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}_{}", profile, ENV_PREFIX, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(&format!("{}_{}", ENV_PREFIX, key))
}

pub fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

/// Parse a profiled env var, falling back to `default` when unset or
/// unparseable.
pub fn profiled_env_parse<T: FromStr>(profile: &str, key: &str, default: T) -> T {
    match profiled_env_opt(profile, key) {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable config value");
                default
            }
        },
        None => default,
    }
}

/// Comma-separated list, trimmed, empty items dropped.
pub fn profiled_env_list(profile: &str, key: &str) -> Option<Vec<String>> {
    profiled_env_opt(profile, key).map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
}
