//! Deterministic cache keys.
//!
//! A key is the SHA-256 of, in order: a format tag, the engine version, the
//! SHA-256 of the model content, and the canonical parameter lines. The
//! fixed fields are NUL-separated and every parameter name carries its byte
//! length, so no two parameter sets render to the same text.

use std::fmt::{self, Write as _};
use std::str::FromStr;

use batchsim_core::Parameters;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Bumped whenever the hash input layout changes.
const KEY_FORMAT: &[u8] = b"batchsim-key-v2";

/// Canonicalisation settings for parameter fingerprinting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOptions {
    /// Decimal places values are rounded to.
    pub precision: u32,
    /// Names dropped before hashing.
    pub exclude_keys: Vec<String>,
}

impl Default for KeyOptions {
    fn default() -> Self {
        Self {
            precision: 10,
            exclude_keys: Vec::new(),
        }
    }
}

/// Fixed-length fingerprint of (model content, parameters, engine version).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Compute the key for one parameter set. Pure: the caller supplies the
    /// model bytes.
    pub fn compute(
        model_content: &[u8],
        parameters: &Parameters,
        engine_version: &str,
        options: &KeyOptions,
    ) -> Self {
        let model_digest = Sha256::digest(model_content);

        let mut hasher = Sha256::new();
        hasher.update(KEY_FORMAT);
        hasher.update([0u8]);
        hasher.update(engine_version.as_bytes());
        hasher.update([0u8]);
        hasher.update(model_digest);
        hasher.update([0u8]);
        hasher.update(canonical_parameters(parameters, options).as_bytes());

        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering (64 chars).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid cache key: {0}")]
pub struct InvalidKey(pub String);

impl FromStr for CacheKey {
    type Err = InvalidKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out).map_err(|_| InvalidKey(s.to_string()))?;
        Ok(Self(out))
    }
}

/// Render parameters as `len:name=value\n` lines in key order, excluded
/// names dropped, values rounded to `options.precision` decimals. `len` is
/// the name's byte length.
pub fn canonical_parameters(parameters: &Parameters, options: &KeyOptions) -> String {
    let mut out = String::new();
    for (name, value) in parameters.iter() {
        if options.exclude_keys.iter().any(|k| k == name) {
            continue;
        }
        let _ = writeln!(
            out,
            "{}:{}={}",
            name.len(),
            name,
            canonical_value(value, options.precision)
        );
    }
    out
}

fn canonical_value(value: f64, precision: u32) -> String {
    let formatted = format!("{:.*}", precision as usize, value);
    // -0.0 and tiny negatives that round to zero must match +0.
    match formatted.strip_prefix('-') {
        Some(rest) if rest.chars().all(|c| c == '0' || c == '.') => rest.to_string(),
        _ => formatted,
    }
}
