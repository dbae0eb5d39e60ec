use jitai_core::{Horizon, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("Store access failed: {0}")]
    Store(#[from] StoreError),
    #[error("No intervention recorded with id {0}")]
    MissingIntervention(String),
    #[error("Horizon {horizon:?} of {id} requested before its predecessor was collected")]
    OutOfOrder { id: String, horizon: Horizon },
}

pub type Result<T> = std::result::Result<T, CollectError>;
