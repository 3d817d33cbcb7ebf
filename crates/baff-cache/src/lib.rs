//! Client-side entity cache with master/dependent version coherence.
//!
//! Stores of records are shared between view consumers through the
//! [`EntityStoreManager`]; the [`VersionManager`] resolves master records and
//! their versions and flushes dependent stores when a master changes.

/// Configuration loading.
pub mod config;
/// Async data-access boundary.
pub mod data_access;
/// Cached record collections.
pub mod entity_store;
/// Error types.
pub mod error;
/// Cache notifications.
pub mod events;
/// Master record cache.
pub mod master_store;
/// Service façade.
pub mod service;
/// Store registry.
pub mod store_manager;
/// Master resolution and invalidation.
pub mod version_manager;

#[cfg(test)]
mod test_support;

// Re-exports for convenience
pub use config::{CacheConfig, CacheSettings, SessionConfig};
pub use data_access::DataAccess;
pub use entity_store::EntityStore;
pub use error::{CacheError, Result};
pub use events::{CacheEvent, EventBus, EventReceiver};
pub use master_store::{MasterEntry, MasterStore};
pub use service::CacheServices;
pub use store_manager::EntityStoreManager;
pub use version_manager::VersionManager;
