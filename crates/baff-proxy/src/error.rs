//! Error types for proxy fetch operations.

use thiserror::Error;

/// Errors that can occur while answering a fetch.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// The requested entity type has no data set.
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    /// The entity type was marked unavailable.
    #[error("Service unavailable for {0}")]
    Unavailable(String),

    /// A record in the data set could not be decoded.
    #[error("Invalid record: {0}")]
    Record(#[from] baff_core::CoreError),

    /// Failed to acquire the data set lock.
    #[error("Data set lock error")]
    LockError,

    /// Other unclassified error.
    #[error("Other error: {0}")]
    Other(String),
}

impl From<anyhow::Error> for ProxyError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
