use std::sync::Arc;

use baff_core::{ConsumerId, OwnerId, TypeRegistry};

use crate::config::{CacheConfig, CacheSettings};
use crate::data_access::DataAccess;
use crate::entity_store::EntityStore;
use crate::error::Result;
use crate::events::{EventBus, EventReceiver};
use crate::store_manager::EntityStoreManager;
use crate::version_manager::VersionManager;

/// Service façade wiring the registry, store manager and version manager over
/// one data-access backend and one event bus.
pub struct CacheServices<D> {
    types: Arc<TypeRegistry>,
    events: EventBus,
    stores: Arc<EntityStoreManager>,
    versions: VersionManager<D>,
}

impl<D: DataAccess> CacheServices<D> {
    /// Build services from a validated configuration.
    ///
    /// # Errors
    /// Returns an error if the declared types do not form a consistent registry.
    pub fn from_config(config: &CacheConfig, data: Arc<D>) -> anyhow::Result<Self> {
        let types = config.registry()?;
        Ok(Self::new(types, &config.cache, config.session.username.clone(), data))
    }

    /// Build services from an already assembled registry.
    #[must_use]
    pub fn new(types: TypeRegistry, settings: &CacheSettings, username: Option<String>, data: Arc<D>) -> Self {
        let types = Arc::new(types);
        let events = EventBus::new();
        let stores = Arc::new(
            EntityStoreManager::new(Arc::clone(&types), settings.size, events.clone())
                .with_username(username.clone()),
        );
        let versions = VersionManager::new(data, Arc::clone(&stores), Arc::clone(&types), events.clone())
            .with_username(username);
        Self {
            types,
            events,
            stores,
            versions,
        }
    }

    /// Registered type descriptors.
    #[must_use]
    pub const fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    /// Store registry.
    #[must_use]
    pub const fn stores(&self) -> &Arc<EntityStoreManager> {
        &self.stores
    }

    /// Master resolution and invalidation.
    #[must_use]
    pub const fn versions(&self) -> &VersionManager<D> {
        &self.versions
    }

    /// Data-access backend.
    #[must_use]
    pub const fn data(&self) -> &Arc<D> {
        self.versions.data()
    }

    /// Subscribe to cache notifications.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Attach a consumer to a store.
    ///
    /// # Errors
    /// Returns an error when the store type is not registered.
    pub fn get_store(
        &self,
        store_type: &str,
        owner_id: Option<&OwnerId>,
        master_entity_id: Option<&str>,
        consumer: &ConsumerId,
    ) -> Result<Arc<EntityStore>> {
        self.stores.get_store(store_type, owner_id, master_entity_id, consumer)
    }

    /// Load a store's first page through this backend.
    ///
    /// # Errors
    /// Returns an error when the store was destroyed or the fetch failed.
    pub async fn load(&self, store: &EntityStore) -> Result<usize> {
        store.load(self.data().as_ref()).await
    }

    /// Append a store's next page through this backend.
    ///
    /// # Errors
    /// Returns an error when the store was destroyed or the fetch failed.
    pub async fn load_next_page(&self, store: &EntityStore) -> Result<usize> {
        store.load_next_page(self.data().as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use crate::test_support::{MockAccess, customer, order, registry};

    fn services(username: Option<&str>) -> CacheServices<MockAccess> {
        CacheServices::new(
            registry(),
            &CacheSettings::default(),
            username.map(str::to_owned),
            Arc::new(MockAccess::default()),
        )
    }

    #[tokio::test]
    async fn username_reaches_pages_and_master_requests() {
        let services = services(Some("alice"));
        services.data().put_master(customer("42", "v1"));
        services.data().set_records("Order", vec![order("o-1", "42", 10)]);

        let store = services
            .get_store("OrderStore", None, Some("42"), &ConsumerId::from("c"))
            .expect("store");
        services.load(&store).await.expect("load");
        services.versions().get_version("Customer", "42").await;

        let page = &services.data().page_queries()[0];
        assert_eq!(page.params.get("username").map(String::as_str), Some("alice"));
        let request = &services.data().entity_requests()[0];
        assert_eq!(request.params.get("username").map(String::as_str), Some("alice"));
    }

    #[tokio::test]
    async fn missing_username_sends_empty_param_on_master_requests() {
        let services = services(None);
        services.versions().get_version("Customer", "42").await;
        let request = &services.data().entity_requests()[0];
        assert_eq!(request.params.get("username").map(String::as_str), Some(""));
    }

    #[test]
    fn from_config_uses_declared_types() {
        let config = CacheConfig::parse(
            r#"
[[entities]]
name = "Customer"

[[stores]]
name = "CustomerStore"
entity = "Customer"
"#,
        )
        .expect("config");
        let services = CacheServices::from_config(&config, Arc::new(MockAccess::default())).expect("services");
        assert!(services.types().store("CustomerStore").is_some());
        assert_eq!(services.stores().cache_size(), config.cache.size);
    }
}
