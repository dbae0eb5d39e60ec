use thiserror::Error;

#[derive(Debug, Error)]
pub enum BanditError {
    #[error("Invalid bandit parameter: {0}")]
    InvalidParameter(&'static str),
}

pub type Result<T> = std::result::Result<T, BanditError>;
