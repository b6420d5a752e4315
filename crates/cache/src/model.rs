//! Model content sources.
//!
//! Keys hash the model's bytes, not its name, so editing a model file
//! invalidates every cached result computed from it.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;

use crate::error::CacheError;

/// Resolves a model identifier to its canonical bytes.
pub trait ModelSource: Send + Sync {
    /// Whether the identifier names a model this source can read.
    fn contains(&self, model_id: &str) -> bool;

    /// Read the model's content.
    fn read(&self, model_id: &str) -> Result<Vec<u8>, CacheError>;
}

/// Models stored as files under a root directory, one file per identifier.
pub struct DirectoryModelSource {
    root: PathBuf,
}

impl DirectoryModelSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map an identifier to a path, refusing anything that would escape the
    /// root.
    fn path_for(&self, model_id: &str) -> Option<PathBuf> {
        if model_id.is_empty() {
            return None;
        }
        let rel = Path::new(model_id);
        let mut components = rel.components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Some(self.root.join(rel)),
            _ => None,
        }
    }
}

impl ModelSource for DirectoryModelSource {
    fn contains(&self, model_id: &str) -> bool {
        self.path_for(model_id).map(|p| p.is_file()).unwrap_or(false)
    }

    fn read(&self, model_id: &str) -> Result<Vec<u8>, CacheError> {
        let path = self
            .path_for(model_id)
            .ok_or_else(|| CacheError::ModelNotFound(model_id.to_string()))?;
        match std::fs::read(&path) {
            Ok(bytes) => {
                debug!(model_id, bytes = bytes.len(), "read model content");
                Ok(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CacheError::ModelNotFound(model_id.to_string()))
            }
            Err(e) => Err(CacheError::Io(e)),
        }
    }
}

/// Models held in memory, for embedding and tests.
#[derive(Default)]
pub struct InMemoryModelSource {
    models: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryModelSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a model.
    pub fn insert(&self, model_id: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.models
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(model_id.into(), content.into());
    }

    pub fn with_model(self, model_id: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.insert(model_id, content);
        self
    }
}

impl ModelSource for InMemoryModelSource {
    fn contains(&self, model_id: &str) -> bool {
        self.models
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(model_id)
    }

    fn read(&self, model_id: &str) -> Result<Vec<u8>, CacheError> {
        self.models
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(model_id)
            .cloned()
            .ok_or_else(|| CacheError::ModelNotFound(model_id.to_string()))
    }
}
