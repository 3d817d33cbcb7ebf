//! Cache of master entities keyed by (master entity type, entity id).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use baff_core::EntityRecord;
use tracing::{debug, error, info};

use crate::error::{CacheError, Result};

/// One cached master: its version plus the serialized record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterEntry {
    /// Master entity type.
    pub entity_type: String,
    /// Master entity id.
    pub entity_id: String,
    /// Version tag carried by the record.
    pub version: Option<String>,
    /// Serialized record.
    pub data: String,
}

impl MasterEntry {
    /// Decode the cached record.
    ///
    /// # Errors
    /// Returns an error if the stored payload no longer decodes.
    pub fn record(&self) -> Result<EntityRecord> {
        Ok(EntityRecord::from_json(&self.data)?)
    }
}

/// At most one entry per (type, id); replacing an entry drops the previous one.
#[derive(Debug, Default)]
pub struct MasterStore {
    entries: Mutex<HashMap<(String, String), MasterEntry>>,
}

impl MasterStore {
    /// Create an empty master cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, String), MasterEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key(entity_type: &str, entity_id: &str) -> (String, String) {
        (entity_type.to_owned(), entity_id.to_owned())
    }

    /// Cached entry for a master.
    #[must_use]
    pub fn get_entry(&self, entity_type: &str, entity_id: &str) -> Option<MasterEntry> {
        self.lock().get(&Self::key(entity_type, entity_id)).cloned()
    }

    /// Cached master record, decoded.
    #[must_use]
    pub fn get_master(&self, entity_type: &str, entity_id: &str) -> Option<EntityRecord> {
        let entry = self.get_entry(entity_type, entity_id)?;
        match entry.record() {
            Ok(record) => Some(record),
            Err(err) => {
                error!(entity_type, entity_id, error = %err, "Cached master no longer decodes");
                None
            }
        }
    }

    /// Drop a cached master. Returns true if one was held.
    pub fn remove_master(&self, entity_type: &str, entity_id: &str) -> bool {
        let removed = self.lock().remove(&Self::key(entity_type, entity_id)).is_some();
        if removed {
            info!(entity_type, entity_id, "Removed cached master");
        }
        removed
    }

    /// Cache a master record under its master entity type and entity id.
    ///
    /// # Errors
    /// Returns [`CacheError::MissingEntityId`] for a record without an id, or an
    /// encoding error.
    pub fn store_master(&self, master: &EntityRecord) -> Result<MasterEntry> {
        let entity_id = master
            .entity_id()
            .ok_or_else(|| CacheError::MissingEntityId(master.entity_type().to_owned()))?;
        let entry = MasterEntry {
            entity_type: master.master_entity_type().to_owned(),
            entity_id: entity_id.to_owned(),
            version: master.version().map(str::to_owned),
            data: master.to_json()?,
        };
        debug!(
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            version = ?entry.version,
            "Cached master"
        );
        self.lock()
            .insert(Self::key(&entry.entity_type, &entry.entity_id), entry.clone());
        Ok(entry)
    }

    /// Drop every cached master of a type. Returns the number removed.
    pub fn flush_master(&self, entity_type: &str) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(held_type, _), _| held_type != entity_type);
        let removed = before - entries.len();
        drop(entries);
        info!(entity_type, removed, "Flushed cached masters");
        removed
    }

    /// Number of cached masters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when no masters are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use crate::test_support::{customer, registry};

    #[test]
    fn store_master_replaces_previous_entry() {
        let masters = MasterStore::new();
        masters.store_master(&customer("42", "v1")).expect("store");
        masters.store_master(&customer("42", "v2")).expect("store");

        assert_eq!(masters.len(), 1);
        let entry = masters.get_entry("Customer", "42").expect("cached");
        assert_eq!(entry.version.as_deref(), Some("v2"));
        assert_eq!(masters.get_master("Customer", "42").expect("decodes").version(), Some("v2"));
    }

    #[test]
    fn record_without_id_is_rejected() {
        let masters = MasterStore::new();
        let types = registry();
        let record = EntityRecord::new(types.entity("Customer").expect("entity"));
        assert!(matches!(
            masters.store_master(&record),
            Err(CacheError::MissingEntityId(t)) if t == "Customer"
        ));
        assert!(masters.is_empty());
    }

    #[test]
    fn flush_master_only_drops_that_type() {
        let masters = MasterStore::new();
        masters.store_master(&customer("42", "v1")).expect("store");
        masters.store_master(&customer("43", "v1")).expect("store");

        assert_eq!(masters.flush_master("Supplier"), 0);
        assert_eq!(masters.flush_master("Customer"), 2);
        assert!(masters.get_master("Customer", "42").is_none());
    }

    #[test]
    fn remove_master_reports_whether_held() {
        let masters = MasterStore::new();
        masters.store_master(&customer("42", "v1")).expect("store");
        assert!(masters.remove_master("Customer", "42"));
        assert!(!masters.remove_master("Customer", "42"));
    }
}
