//! Error types for domain model construction.

use thiserror::Error;

/// Result type for domain model operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while decoding records or assembling the type registry.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Record payload was not a JSON object.
    #[error("record of type {entity_type} is not a JSON object")]
    NotAnObject {
        /// Entity type the payload was decoded as.
        entity_type: String,
    },

    /// An entity type was registered twice.
    #[error("duplicate entity type: {0}")]
    DuplicateEntityType(String),

    /// A store type was registered twice.
    #[error("duplicate store type: {0}")]
    DuplicateStoreType(String),

    /// A descriptor references an entity type that is not registered.
    #[error("{referenced_by} references unknown entity type {entity}")]
    UnknownEntity {
        /// Descriptor holding the dangling reference.
        referenced_by: String,
        /// Missing entity type.
        entity: String,
    },

    /// A descriptor references a store type that is not registered.
    #[error("{referenced_by} references unknown store type {store}")]
    UnknownStore {
        /// Descriptor holding the dangling reference.
        referenced_by: String,
        /// Missing store type.
        store: String,
    },

    /// A primary store holds a different entity than the master it serves.
    #[error("primary store {store} of {entity} holds {holds}")]
    PrimaryStoreMismatch {
        /// Master entity type.
        entity: String,
        /// Declared primary store type.
        store: String,
        /// Entity type the store actually holds.
        holds: String,
    },

    /// A store type declares a zero page size.
    #[error("store type {0} must have a page size of at least 1")]
    InvalidPageSize(String),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
