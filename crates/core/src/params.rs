use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Characters the canonical `name=value` form reserves.
const RESERVED_NAME_CHARS: [char; 3] = ['=', '\n', '\0'];

/// Named numeric inputs for one simulation run.
///
/// Backed by a `BTreeMap` so iteration is always in key order, independent
/// of how the caller built the set. Cache fingerprints rely on this.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, f64>);

impl Parameters {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Insert a value, returning the previous one for that name.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) -> Option<f64> {
        self.0.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Check the set is usable as a submission: non-empty, named, finite.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.0.is_empty() {
            return Err(CoreError::EmptyParameters);
        }
        for (name, value) in &self.0 {
            if name.trim().is_empty() {
                return Err(CoreError::EmptyParameterName);
            }
            if name.contains(RESERVED_NAME_CHARS) {
                return Err(CoreError::InvalidParameterName(name.clone()));
            }
            if !value.is_finite() {
                return Err(CoreError::NonFiniteParameter {
                    name: name.clone(),
                    value: *value,
                });
            }
        }
        Ok(())
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl<K: Into<String>, const N: usize> From<[(K, f64); N]> for Parameters {
    fn from(pairs: [(K, f64); N]) -> Self {
        pairs.into_iter().collect()
    }
}
