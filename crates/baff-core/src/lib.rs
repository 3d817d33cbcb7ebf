//! Domain types for the baff entity cache.
//!
//! Records, per-type metadata, filter descriptors and the request/response
//! shapes shared between the cache core and data-access backends.

/// Error types.
pub mod error;
/// Filter and sorter descriptors.
pub mod filter;
/// Identifier types.
pub mod id;
/// Data-access request and response shapes.
pub mod query;
/// Entity records.
pub mod record;
/// Type descriptors and registry.
pub mod types;

pub use error::CoreError;
pub use filter::{Filter, FilterOp, SortDirection, Sorter};
pub use id::{ConsumerId, OwnerId};
pub use query::{EntityRequest, FetchResponse, PageQuery};
pub use record::EntityRecord;
pub use types::{EntityTypeDescriptor, StoreTypeDescriptor, TypeRegistry};
