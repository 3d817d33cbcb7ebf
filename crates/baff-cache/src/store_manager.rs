//! Registry of shared store instances with consumer tracking and LRU eviction.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use baff_core::query::USERNAME_PARAM;
use baff_core::{ConsumerId, EntityRecord, OwnerId, TypeRegistry};
use lru::LruCache;
use tracing::{debug, error, info, warn};

use crate::entity_store::{self, EntityStore};
use crate::error::{CacheError, Result};
use crate::events::EventBus;

/// Default number of stores retained before idle ones are evicted.
pub const DEFAULT_CACHE_SIZE: usize = 25;

#[derive(Debug)]
struct StoreSlot {
    store: Arc<EntityStore>,
    consumers: Vec<ConsumerId>,
}

/// Hands out shared [`EntityStore`]s by key and evicts idle ones.
///
/// A store with at least one consumer is never evicted. Once more than
/// `cache_size` stores are held, the least-recently-touched store without
/// consumers is destroyed on the next registry operation.
#[derive(Debug)]
pub struct EntityStoreManager {
    types: Arc<TypeRegistry>,
    events: EventBus,
    cache_size: usize,
    username: Option<String>,
    stores: Mutex<LruCache<String, StoreSlot>>,
}

impl EntityStoreManager {
    /// Create an empty registry.
    #[must_use]
    pub fn new(types: Arc<TypeRegistry>, cache_size: usize, events: EventBus) -> Self {
        Self {
            types,
            events,
            cache_size,
            username: None,
            stores: Mutex::new(LruCache::unbounded()),
        }
    }

    /// Set the session user stamped on every new store as a request parameter.
    #[must_use]
    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, StoreSlot>> {
        self.stores.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registry key for a store instance.
    #[must_use]
    pub fn store_key(store_type: &str, owner_id: Option<&OwnerId>, master_entity_id: Option<&str>) -> String {
        entity_store::store_key(store_type, owner_id, master_entity_id)
    }

    /// Configured soft cap on retained stores.
    #[must_use]
    pub const fn cache_size(&self) -> usize {
        self.cache_size
    }

    /// Number of stores currently registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when no stores are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether a store with this key is registered.
    #[must_use]
    pub fn contains(&self, store_key: &str) -> bool {
        self.lock().contains(store_key)
    }

    /// Consumers currently attached to a store.
    #[must_use]
    pub fn consumers(&self, store_key: &str) -> Vec<ConsumerId> {
        self.lock()
            .peek(store_key)
            .map(|slot| slot.consumers.clone())
            .unwrap_or_default()
    }

    /// Return the shared store for this key, creating it on first use, and
    /// register `consumer` on it.
    ///
    /// # Errors
    /// Returns [`CacheError::UnknownStoreType`] when the store type is not
    /// registered; no store is created in that case.
    pub fn get_store(
        &self,
        store_type: &str,
        owner_id: Option<&OwnerId>,
        master_entity_id: Option<&str>,
        consumer: &ConsumerId,
    ) -> Result<Arc<EntityStore>> {
        let key = Self::store_key(store_type, owner_id, master_entity_id);
        let mut stores = self.lock();

        let store = if let Some(slot) = stores.get_mut(&key) {
            if !slot.consumers.contains(consumer) {
                slot.consumers.push(consumer.clone());
            }
            Arc::clone(&slot.store)
        } else {
            let Some(descriptor) = self.types.store(store_type) else {
                error!(store_type, "Store type not registered; cache unavailable");
                return Err(CacheError::UnknownStoreType(store_type.to_owned()));
            };
            let Some(entity) = self.types.entity(&descriptor.entity_type) else {
                error!(store_type, entity_type = %descriptor.entity_type, "Store entity type not registered");
                return Err(CacheError::UnknownEntityType(descriptor.entity_type.clone()));
            };
            let store = Arc::new(EntityStore::new(
                descriptor.clone(),
                entity,
                owner_id,
                master_entity_id,
                self.events.clone(),
            ));
            if let Some(username) = &self.username {
                store.set_param(USERNAME_PARAM, username);
            }
            debug!(store_key = %key, consumer = %consumer, "Created store");
            stores.put(
                key,
                StoreSlot {
                    store: Arc::clone(&store),
                    consumers: vec![consumer.clone()],
                },
            );
            store
        };

        Self::evict_idle(&mut stores, self.cache_size);
        Ok(store)
    }

    /// Detach `consumer` from `store`. Detaching an unknown consumer is a no-op.
    pub fn detach_store(&self, store: &EntityStore, consumer: &ConsumerId) {
        let mut stores = self.lock();
        if let Some(slot) = stores.peek_mut(store.store_key())
            && std::ptr::eq(Arc::as_ptr(&slot.store), store)
        {
            slot.consumers.retain(|held| held != consumer);
            debug!(
                store_key = %store.store_key(),
                consumer = %consumer,
                remaining = slot.consumers.len(),
                "Detached consumer"
            );
        }
        Self::evict_idle(&mut stores, self.cache_size);
    }

    /// Remove and destroy a store regardless of consumers. Returns true if one was registered.
    pub fn destroy_store(&self, store_type: &str, owner_id: Option<&OwnerId>, master_entity_id: Option<&str>) -> bool {
        let key = Self::store_key(store_type, owner_id, master_entity_id);
        let removed = self.lock().pop(&key);
        removed.is_some_and(|slot| {
            slot.store.destroy();
            true
        })
    }

    /// Evict at most one idle store if the registry is over capacity.
    ///
    /// Returns the key of the evicted store.
    pub fn manage_store_cache(&self) -> Option<String> {
        Self::evict_idle(&mut self.lock(), self.cache_size)
    }

    fn evict_idle(stores: &mut LruCache<String, StoreSlot>, cache_size: usize) -> Option<String> {
        if stores.len() <= cache_size {
            return None;
        }
        let key = stores
            .iter()
            .rev()
            .find(|(_, slot)| slot.consumers.is_empty())
            .map(|(key, _)| key.clone())?;
        let slot = stores.pop(&key)?;
        slot.store.destroy();
        debug!(store_key = %key, held = stores.len(), "Evicted idle store");
        Some(key)
    }

    fn select(&self, predicate: impl Fn(&EntityStore) -> bool) -> Vec<Arc<EntityStore>> {
        self.lock()
            .iter()
            .rev()
            .filter(|(_, slot)| predicate(slot.store.as_ref()))
            .map(|(_, slot)| Arc::clone(&slot.store))
            .collect()
    }

    /// Stores depending on a master.
    ///
    /// Without an id: the stores holding masters of the type. With an id: the
    /// stores scoped to exactly that master.
    #[must_use]
    pub fn get_mastering_stores(&self, master_entity_type: &str, master_entity_id: Option<&str>) -> Vec<Arc<EntityStore>> {
        match master_entity_id {
            None => self.select(|store| store.holds_masters_of(master_entity_type)),
            Some(id) => self.select(|store| store.is_mastered_by(master_entity_type, Some(id))),
        }
    }

    /// Look up a master record in its primary store without fetching.
    ///
    /// A master type without a primary store is searched in every unscoped
    /// store holding that entity type.
    #[must_use]
    pub fn find_master(&self, master_entity_type: &str, master_entity_id: &str) -> Option<EntityRecord> {
        let Some(entity) = self.types.entity(master_entity_type) else {
            warn!(master_entity_type, "Unknown master entity type");
            return None;
        };
        let primary = entity.primary_store_type.as_deref();
        self.get_mastering_stores(master_entity_type, None)
            .into_iter()
            .filter(|store| match primary {
                Some(name) => store.store_type() == name,
                None => store.entity_type() == master_entity_type,
            })
            .find_map(|store| store.find_by_id(master_entity_id))
    }

    /// Flush stores scoped to a master; `None` flushes every scoped store of the type.
    pub fn flush_mastered_stores(&self, master_entity_type: &str, master_entity_id: Option<&str>, invalid: bool) {
        let stores = self.select(|store| store.is_mastered_by(master_entity_type, master_entity_id));
        info!(master_entity_type, master_entity_id, count = stores.len(), invalid, "Flushing mastered stores");
        for store in stores {
            store.flush(invalid);
        }
    }

    /// Flush stores holding masters of the type.
    pub fn flush_master_stores(&self, master_entity_type: &str) {
        let stores = self.get_mastering_stores(master_entity_type, None);
        info!(master_entity_type, count = stores.len(), "Flushing master stores");
        for store in stores {
            store.flush(false);
        }
    }

    /// Flush master stores of the type, then the scoped stores.
    pub fn flush_mastering_stores(&self, master_entity_type: &str, master_entity_id: Option<&str>) {
        self.flush_master_stores(master_entity_type);
        self.flush_mastered_stores(master_entity_type, master_entity_id, false);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use crate::events::CacheEvent;
    use crate::test_support::{MockAccess, customer, drain, order, registry};
    use baff_core::{EntityTypeDescriptor, StoreTypeDescriptor};

    fn manager(cache_size: usize) -> (EntityStoreManager, EventBus) {
        let bus = EventBus::new();
        let manager = EntityStoreManager::new(Arc::new(registry()), cache_size, bus.clone())
            .with_username(Some("alice".into()));
        (manager, bus)
    }

    #[test]
    fn same_key_yields_same_instance() {
        let (manager, _) = manager(4);
        let a = ConsumerId::from("a");
        let b = ConsumerId::from("b");

        let first = manager.get_store("OrderStore", None, Some("42"), &a).expect("store");
        let second = manager.get_store("OrderStore", None, Some("42"), &b).expect("store");
        let third = manager.get_store("OrderStore", None, Some("42"), &a).expect("store");

        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &third));
        assert_eq!(manager.consumers("OrderStore|42"), vec![a, b]);
        assert_eq!(first.param("username").as_deref(), Some("alice"));
    }

    #[test]
    fn owner_partitions_instances() {
        let (manager, _) = manager(4);
        let c = ConsumerId::from("c");
        let view_1 = OwnerId::from("view-1");
        let view_2 = OwnerId::from("view-2");

        let a = manager.get_store("OrderStore", Some(&view_1), Some("42"), &c).expect("store");
        let b = manager.get_store("OrderStore", Some(&view_2), Some("42"), &c).expect("store");
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.store_key(), "OrderStore|42|view-1");
    }

    #[test]
    fn unknown_store_type_is_refused() {
        let (manager, _) = manager(4);
        let err = manager
            .get_store("Nope", None, None, &ConsumerId::from("c"))
            .expect_err("unknown");
        assert!(matches!(err, CacheError::UnknownStoreType(t) if t == "Nope"));
        assert!(manager.is_empty());
    }

    #[test]
    fn detach_is_idempotent() {
        let (manager, _) = manager(4);
        let c = ConsumerId::from("c");
        let store = manager.get_store("CustomerStore", None, None, &c).expect("store");

        manager.detach_store(&store, &c);
        manager.detach_store(&store, &c);
        manager.detach_store(&store, &ConsumerId::from("never-attached"));
        assert!(manager.consumers("CustomerStore").is_empty());
        assert!(manager.contains("CustomerStore"));
    }

    #[test]
    fn eviction_spares_consumed_stores() {
        let (manager, _) = manager(2);
        let c = ConsumerId::from("c");
        let a = manager.get_store("OrderStore", None, Some("a"), &c).expect("store");
        let b = manager.get_store("OrderStore", None, Some("b"), &c).expect("store");
        let _held = manager.get_store("OrderStore", None, Some("c"), &c).expect("store");
        assert_eq!(manager.len(), 3, "all stores have consumers");

        manager.detach_store(&b, &c);
        assert_eq!(manager.len(), 2);
        assert!(!manager.contains("OrderStore|b"));
        assert!(b.is_destroyed());
        assert!(manager.contains("OrderStore|a"));
        assert!(!a.is_destroyed());
    }

    #[test]
    fn eviction_picks_least_recently_touched() {
        let (manager, _) = manager(2);
        let c = ConsumerId::from("c");
        let a = manager.get_store("OrderStore", None, Some("a"), &c).expect("store");
        let b = manager.get_store("OrderStore", None, Some("b"), &c).expect("store");
        manager.detach_store(&a, &c);
        manager.detach_store(&b, &c);
        // Touch "a" so "b" becomes the oldest idle store.
        let a = manager.get_store("OrderStore", None, Some("a"), &c).expect("store");
        manager.detach_store(&a, &c);

        manager.get_store("OrderStore", None, Some("c"), &c).expect("store");
        assert!(!manager.contains("OrderStore|b"));
        assert!(manager.contains("OrderStore|a"));
        assert_eq!(manager.manage_store_cache(), None);
    }

    #[test]
    fn destroyed_store_is_recreated_fresh() {
        let (manager, _) = manager(4);
        let c = ConsumerId::from("c");
        let old = manager.get_store("OrderStore", None, Some("42"), &c).expect("store");
        assert!(manager.destroy_store("OrderStore", None, Some("42")));
        assert!(!manager.destroy_store("OrderStore", None, Some("42")));

        let fresh = manager.get_store("OrderStore", None, Some("42"), &c).expect("store");
        assert!(!Arc::ptr_eq(&old, &fresh));
        manager.detach_store(&old, &c);
        assert_eq!(manager.consumers("OrderStore|42"), vec![c]);
    }

    #[test]
    fn mastering_store_selection_is_exact() {
        let (manager, _) = manager(8);
        let c = ConsumerId::from("c");
        manager.get_store("CustomerStore", None, None, &c).expect("store");
        manager.get_store("OrderStore", None, Some("1"), &c).expect("store");
        manager.get_store("OrderStore", None, Some("12"), &c).expect("store");

        let keys = |stores: Vec<Arc<EntityStore>>| {
            stores.iter().map(|s| s.store_key().to_owned()).collect::<Vec<_>>()
        };
        assert_eq!(keys(manager.get_mastering_stores("Customer", None)), vec!["CustomerStore"]);
        assert_eq!(keys(manager.get_mastering_stores("Customer", Some("1"))), vec!["OrderStore|1"]);
    }

    #[tokio::test]
    async fn find_master_reads_primary_store_only() {
        let (manager, _) = manager(8);
        let data = MockAccess::default();
        data.set_records("Customer", vec![customer("42", "v3")]);
        let c = ConsumerId::from("c");

        assert!(manager.find_master("Customer", "42").is_none());
        let store = manager.get_store("CustomerStore", None, None, &c).expect("store");
        store.load(&data).await.expect("load");

        assert_eq!(manager.find_master("Customer", "42").expect("held").version(), Some("v3"));
        assert!(manager.find_master("Customer", "99").is_none());
        assert!(manager.find_master("Unknown", "42").is_none());
    }

    #[tokio::test]
    async fn find_master_without_primary_store_skips_mastered_entities() {
        let types = TypeRegistry::from_descriptors(
            [
                EntityTypeDescriptor::master("Customer"),
                EntityTypeDescriptor::mastered("Order", "Customer"),
            ],
            [
                StoreTypeDescriptor::new("CustomerStore", "Customer"),
                StoreTypeDescriptor::new("OrderStore", "Order"),
            ],
        )
        .expect("registry");
        let manager = EntityStoreManager::new(Arc::new(types), 8, EventBus::new());
        let data = MockAccess::default();
        data.set_records("Order", vec![order("42", "42", 10)]);
        data.set_records("Customer", vec![customer("42", "v1")]);
        let c = ConsumerId::from("c");

        let orders = manager.get_store("OrderStore", None, None, &c).expect("store");
        orders.load(&data).await.expect("load");
        assert!(manager.find_master("Customer", "42").is_none());

        let customers = manager.get_store("CustomerStore", None, None, &c).expect("store");
        customers.load(&data).await.expect("load");
        let found = manager.find_master("Customer", "42").expect("held");
        assert_eq!(found.entity_type(), "Customer");
        assert_eq!(found.version(), Some("v1"));
    }

    #[tokio::test]
    async fn flush_mastering_stores_flushes_masters_first() {
        let (manager, bus) = manager(8);
        let data = MockAccess::default();
        data.set_records("Customer", vec![customer("42", "v1")]);
        data.set_records("Order", vec![order("o-1", "42", 10)]);
        let c = ConsumerId::from("c");
        let master = manager.get_store("CustomerStore", None, None, &c).expect("store");
        let scoped = manager.get_store("OrderStore", None, Some("42"), &c).expect("store");
        let other = manager.get_store("OrderStore", None, Some("7"), &c).expect("store");
        for store in [&master, &scoped, &other] {
            store.load(&data).await.expect("load");
        }
        let mut rx = bus.subscribe();

        manager.flush_mastering_stores("Customer", Some("42"));

        let flushed: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|event| match event {
                CacheEvent::Flush { store_key, .. } => Some(store_key),
                _ => None,
            })
            .collect();
        assert_eq!(flushed, vec!["CustomerStore", "OrderStore|42"]);
        assert!(other.has_loaded());
        assert!(!scoped.has_loaded());
    }
}
