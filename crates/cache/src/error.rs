use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("entry of {size} bytes exceeds cache capacity of {max_bytes} bytes")]
    TooLarge { size: u64, max_bytes: u64 },

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("invalid cache config: {0}")]
    Config(String),
}
