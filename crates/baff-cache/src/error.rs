//! Error types for cache operations.

use baff_core::CoreError;
use thiserror::Error;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors surfaced by the store registry, stores and version manager.
///
/// Expected misses (no cached master, record not held by a store) are not
/// errors; they surface as `None`.
#[derive(Error, Debug)]
pub enum CacheError {
    /// No store type with this name is registered; the cache is unavailable for it.
    #[error("Unknown store type: {0}")]
    UnknownStoreType(String),

    /// No entity type with this name is registered.
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    /// A master record without an entity id cannot be cached.
    #[error("Record of type {0} has no entity id")]
    MissingEntityId(String),

    /// The store was destroyed and can no longer load.
    #[error("Store {0} has been destroyed")]
    StoreDestroyed(String),

    /// The data-access layer returned no record for a master.
    #[error("Master {entity_type} {entity_id} not found")]
    MasterNotFound {
        /// Master entity type.
        entity_type: String,
        /// Master entity id.
        entity_id: String,
    },

    /// The data-access layer failed a fetch.
    #[error("Fetch failed for {target}: {message}")]
    Fetch {
        /// What was being fetched.
        target: String,
        /// Rendered error chain from the data-access layer.
        message: String,
    },

    /// Domain model error (registry assembly, record encoding).
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl CacheError {
    pub(crate) fn fetch(target: impl Into<String>, err: impl Into<anyhow::Error>) -> Self {
        Self::Fetch {
            target: target.into(),
            message: format!("{:#}", err.into()),
        }
    }
}
