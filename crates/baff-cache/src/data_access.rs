//! Async boundary to the data-access layer.

use anyhow::Error;
use baff_core::{EntityRequest, FetchResponse, PageQuery};
use baff_proxy::{MemoryProxy, ProxyError};
use std::sync::Arc;

/// Network-facing fetch operations consumed by the cache.
///
/// Calls suspend until the backend answers; the cache never holds a lock
/// across them.
#[allow(async_fn_in_trait)]
pub trait DataAccess {
    /// Error type bubbled up from the backend.
    type Error: Into<Error>;

    /// Fetch a single entity by id. An empty response means "not found".
    ///
    /// # Errors
    /// Returns a backend-specific error when the fetch fails.
    async fn fetch_entity(&self, request: &EntityRequest) -> Result<FetchResponse, Self::Error>;

    /// Fetch one page of a store's records.
    ///
    /// # Errors
    /// Returns a backend-specific error when the fetch fails.
    async fn fetch_page(&self, query: &PageQuery) -> Result<FetchResponse, Self::Error>;
}

impl DataAccess for MemoryProxy {
    type Error = ProxyError;

    async fn fetch_entity(&self, request: &EntityRequest) -> Result<FetchResponse, Self::Error> {
        Self::fetch_entity(self, request)
    }

    async fn fetch_page(&self, query: &PageQuery) -> Result<FetchResponse, Self::Error> {
        Self::fetch_page(self, query)
    }
}

impl<T: DataAccess> DataAccess for Arc<T> {
    type Error = T::Error;

    async fn fetch_entity(&self, request: &EntityRequest) -> Result<FetchResponse, Self::Error> {
        T::fetch_entity(self, request).await
    }

    async fn fetch_page(&self, query: &PageQuery) -> Result<FetchResponse, Self::Error> {
        T::fetch_page(self, query).await
    }
}
