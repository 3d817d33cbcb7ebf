//! Static per-type metadata and the registry that resolves type names.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::filter::{Filter, Sorter};

/// Default number of records requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 250;

const fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

const fn default_buffered() -> bool {
    true
}

/// Metadata describing one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTypeDescriptor {
    /// Entity type name.
    pub name: String,
    /// Master entity type; absent when the entity is its own master.
    #[serde(default, rename = "master")]
    pub master_entity_type: Option<String>,
    /// Field holding the entity id in service payloads.
    #[serde(default)]
    pub entity_id_property: Option<String>,
    /// Field holding the master entity id in service payloads.
    #[serde(default, rename = "master_id_property")]
    pub master_entity_id_property: Option<String>,
    /// Canonical store searched for in-memory copies of this master.
    #[serde(default, rename = "primary_store")]
    pub primary_store_type: Option<String>,
}

impl EntityTypeDescriptor {
    /// Descriptor for an entity that is its own master.
    pub fn master(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            master_entity_type: None,
            entity_id_property: None,
            master_entity_id_property: None,
            primary_store_type: None,
        }
    }

    /// Descriptor for an entity mastered by another type.
    pub fn mastered(name: impl Into<String>, master: impl Into<String>) -> Self {
        Self {
            master_entity_type: Some(master.into()),
            ..Self::master(name)
        }
    }

    /// Set the canonical primary store type.
    #[must_use]
    pub fn with_primary_store(mut self, store_type: impl Into<String>) -> Self {
        self.primary_store_type = Some(store_type.into());
        self
    }

    /// Set the payload field holding the entity id.
    #[must_use]
    pub fn with_id_property(mut self, property: impl Into<String>) -> Self {
        self.entity_id_property = Some(property.into());
        self
    }

    /// Set the payload field holding the master entity id.
    #[must_use]
    pub fn with_master_id_property(mut self, property: impl Into<String>) -> Self {
        self.master_entity_id_property = Some(property.into());
        self
    }

    /// Whether this type is a master entity type.
    #[must_use]
    pub fn is_master_entity(&self) -> bool {
        self.master_entity_type
            .as_deref()
            .is_none_or(|master| master == self.name)
    }

    /// The master entity type, which may be this type itself.
    #[must_use]
    pub fn master_entity_type(&self) -> &str {
        self.master_entity_type.as_deref().unwrap_or(&self.name)
    }
}

/// Metadata describing one store type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreTypeDescriptor {
    /// Store type name.
    pub name: String,
    /// Entity type held by the store.
    #[serde(rename = "entity")]
    pub entity_type: String,
    /// Records requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Buffered stores page; unbuffered stores fetch everything at once.
    #[serde(default = "default_buffered")]
    pub buffered: bool,
    /// Default sort order.
    #[serde(default)]
    pub sorters: Vec<Sorter>,
    /// Filters always applied to this store.
    #[serde(default)]
    pub filters: Vec<Filter>,
}

impl StoreTypeDescriptor {
    /// Buffered store with default paging and no sorters or filters.
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            page_size: DEFAULT_PAGE_SIZE,
            buffered: true,
            sorters: Vec::new(),
            filters: Vec::new(),
        }
    }

    /// Set the page size.
    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Fetch everything in a single request.
    #[must_use]
    pub const fn unbuffered(mut self) -> Self {
        self.buffered = false;
        self
    }

    /// Append a default sorter.
    #[must_use]
    pub fn with_sorter(mut self, sorter: Sorter) -> Self {
        self.sorters.push(sorter);
        self
    }

    /// Append a base filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Page limit to request, `None` for unbuffered stores.
    #[must_use]
    pub const fn page_limit(&self) -> Option<usize> {
        if self.buffered { Some(self.page_size) } else { None }
    }
}

/// Registry resolving entity and store type names to their descriptors.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    entities: HashMap<String, EntityTypeDescriptor>,
    stores: HashMap<String, StoreTypeDescriptor>,
}

impl TypeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from descriptor lists and validate it.
    ///
    /// # Errors
    /// Returns an error on duplicate names or dangling references.
    pub fn from_descriptors(
        entities: impl IntoIterator<Item = EntityTypeDescriptor>,
        stores: impl IntoIterator<Item = StoreTypeDescriptor>,
    ) -> Result<Self> {
        let mut registry = Self::new();
        for entity in entities {
            registry.register_entity(entity)?;
        }
        for store in stores {
            registry.register_store(store)?;
        }
        registry.validate()?;
        Ok(registry)
    }

    /// Register an entity type.
    ///
    /// # Errors
    /// Returns [`CoreError::DuplicateEntityType`] when the name is taken.
    pub fn register_entity(&mut self, descriptor: EntityTypeDescriptor) -> Result<()> {
        if self.entities.contains_key(&descriptor.name) {
            return Err(CoreError::DuplicateEntityType(descriptor.name));
        }
        self.entities.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Register a store type.
    ///
    /// # Errors
    /// Returns [`CoreError::DuplicateStoreType`] when the name is taken.
    pub fn register_store(&mut self, descriptor: StoreTypeDescriptor) -> Result<()> {
        if self.stores.contains_key(&descriptor.name) {
            return Err(CoreError::DuplicateStoreType(descriptor.name));
        }
        self.stores.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Check that every cross-reference resolves.
    ///
    /// # Errors
    /// Returns the first dangling reference or inconsistent primary store found.
    pub fn validate(&self) -> Result<()> {
        let mut entity_names: Vec<&String> = self.entities.keys().collect();
        entity_names.sort();
        for name in entity_names {
            let entity = &self.entities[name];
            if let Some(master) = &entity.master_entity_type
                && !self.entities.contains_key(master)
            {
                return Err(CoreError::UnknownEntity {
                    referenced_by: entity.name.clone(),
                    entity: master.clone(),
                });
            }
            if let Some(primary) = &entity.primary_store_type {
                let store = self.stores.get(primary).ok_or_else(|| CoreError::UnknownStore {
                    referenced_by: entity.name.clone(),
                    store: primary.clone(),
                })?;
                if store.entity_type != entity.name {
                    return Err(CoreError::PrimaryStoreMismatch {
                        entity: entity.name.clone(),
                        store: primary.clone(),
                        holds: store.entity_type.clone(),
                    });
                }
            }
        }

        let mut store_names: Vec<&String> = self.stores.keys().collect();
        store_names.sort();
        for name in store_names {
            let store = &self.stores[name];
            if !self.entities.contains_key(&store.entity_type) {
                return Err(CoreError::UnknownEntity {
                    referenced_by: store.name.clone(),
                    entity: store.entity_type.clone(),
                });
            }
            if store.page_size == 0 {
                return Err(CoreError::InvalidPageSize(store.name.clone()));
            }
        }
        Ok(())
    }

    /// Look up an entity type.
    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&EntityTypeDescriptor> {
        self.entities.get(name)
    }

    /// Look up a store type.
    #[must_use]
    pub fn store(&self, name: &str) -> Option<&StoreTypeDescriptor> {
        self.stores.get(name)
    }

    /// Entity descriptor for the records held by a store type.
    #[must_use]
    pub fn store_entity(&self, store_type: &str) -> Option<&EntityTypeDescriptor> {
        self.store(store_type)
            .and_then(|store| self.entity(&store.entity_type))
    }

    /// Canonical primary store of a master entity type.
    #[must_use]
    pub fn primary_store_type(&self, master_entity_type: &str) -> Option<&str> {
        self.entity(master_entity_type)
            .and_then(|entity| entity.primary_store_type.as_deref())
    }

    /// Iterate registered entity types.
    pub fn entities(&self) -> impl Iterator<Item = &EntityTypeDescriptor> {
        self.entities.values()
    }

    /// Iterate registered store types.
    pub fn stores(&self) -> impl Iterator<Item = &StoreTypeDescriptor> {
        self.stores.values()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;

    fn customer_registry() -> Result<TypeRegistry> {
        TypeRegistry::from_descriptors(
            [
                EntityTypeDescriptor::master("Customer").with_primary_store("CustomerStore"),
                EntityTypeDescriptor::mastered("Order", "Customer"),
            ],
            [
                StoreTypeDescriptor::new("CustomerStore", "Customer"),
                StoreTypeDescriptor::new("OrderStore", "Order"),
            ],
        )
    }

    #[test]
    fn own_master_resolves_to_itself() {
        let customer = EntityTypeDescriptor::master("Customer");
        assert!(customer.is_master_entity());
        assert_eq!(customer.master_entity_type(), "Customer");

        let self_named = EntityTypeDescriptor::mastered("Customer", "Customer");
        assert!(self_named.is_master_entity());
    }

    #[test]
    fn mastered_entity_reports_its_master() {
        let order = EntityTypeDescriptor::mastered("Order", "Customer");
        assert!(!order.is_master_entity());
        assert_eq!(order.master_entity_type(), "Customer");
    }

    #[test]
    fn registry_resolves_primary_store_and_store_entity() {
        let registry = customer_registry().expect("valid registry");
        assert_eq!(registry.primary_store_type("Customer"), Some("CustomerStore"));
        assert_eq!(registry.primary_store_type("Order"), None);
        assert_eq!(
            registry.store_entity("OrderStore").map(EntityTypeDescriptor::master_entity_type),
            Some("Customer")
        );
    }

    #[test]
    fn duplicate_entity_is_rejected() {
        let mut registry = TypeRegistry::new();
        registry
            .register_entity(EntityTypeDescriptor::master("Customer"))
            .expect("first registration");
        let err = registry
            .register_entity(EntityTypeDescriptor::master("Customer"))
            .expect_err("duplicate must fail");
        assert!(matches!(err, CoreError::DuplicateEntityType(name) if name == "Customer"));
    }

    #[test]
    fn primary_store_must_hold_the_master() {
        let err = TypeRegistry::from_descriptors(
            [
                EntityTypeDescriptor::master("Customer").with_primary_store("OrderStore"),
                EntityTypeDescriptor::mastered("Order", "Customer"),
            ],
            [StoreTypeDescriptor::new("OrderStore", "Order")],
        )
        .expect_err("mismatched primary store");
        assert!(matches!(err, CoreError::PrimaryStoreMismatch { .. }));
    }

    #[test]
    fn store_for_unknown_entity_is_rejected() {
        let err = TypeRegistry::from_descriptors(
            [EntityTypeDescriptor::master("Customer")],
            [StoreTypeDescriptor::new("InvoiceStore", "Invoice")],
        )
        .expect_err("dangling entity");
        assert!(matches!(err, CoreError::UnknownEntity { entity, .. } if entity == "Invoice"));
    }

    #[test]
    fn unbuffered_store_has_no_page_limit() {
        let store = StoreTypeDescriptor::new("CustomerStore", "Customer").unbuffered();
        assert_eq!(store.page_limit(), None);
        let paged = StoreTypeDescriptor::new("CustomerStore", "Customer").with_page_size(50);
        assert_eq!(paged.page_limit(), Some(50));
    }
}
