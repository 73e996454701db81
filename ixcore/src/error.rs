//! Error types for entity fetching

use ixcore_cache::GateError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    /// The backing store has no entity for the reference
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// The backing store failed
    #[error("Store error: {0}")]
    Store(String),

    /// The cache gate failed to generate the value
    #[error(transparent)]
    Generation(#[from] GateError),

    /// A backup record could not be turned back into an entity
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl FetchError {
    pub fn store(err: anyhow::Error) -> Self {
        FetchError::Store(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
