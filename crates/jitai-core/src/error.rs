use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store backend failure: {0}")]
    Backend(String),
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Unsupported state version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
}

pub type Result<T> = std::result::Result<T, StoreError>;
