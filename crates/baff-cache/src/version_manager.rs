//! Resolves master records and versions and keeps dependent stores coherent.

use std::sync::Arc;

use baff_core::{EntityRecord, EntityRequest, FetchResponse, TypeRegistry};
use tracing::{debug, info, warn};

use crate::data_access::DataAccess;
use crate::error::{CacheError, Result};
use crate::events::{CacheEvent, EventBus};
use crate::master_store::{MasterEntry, MasterStore};
use crate::store_manager::EntityStoreManager;

/// Master resolution and invalidation.
///
/// Lookup order for a master is the master cache, then the primary store for
/// the type, then the data-access layer. While a fetch is outstanding the
/// master is absent from the cache, so synchronous peeks report `None`.
#[derive(Debug)]
pub struct VersionManager<D> {
    data: Arc<D>,
    stores: Arc<EntityStoreManager>,
    types: Arc<TypeRegistry>,
    masters: MasterStore,
    events: EventBus,
    username: Option<String>,
}

impl<D: DataAccess> VersionManager<D> {
    /// Create a manager with an empty master cache.
    #[must_use]
    pub fn new(data: Arc<D>, stores: Arc<EntityStoreManager>, types: Arc<TypeRegistry>, events: EventBus) -> Self {
        Self {
            data,
            stores,
            types,
            masters: MasterStore::new(),
            events,
            username: None,
        }
    }

    /// Set the session user sent with master fetches.
    #[must_use]
    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    /// Data-access layer used for fetches.
    #[must_use]
    pub const fn data(&self) -> &Arc<D> {
        &self.data
    }

    /// Cached masters.
    #[must_use]
    pub const fn masters(&self) -> &MasterStore {
        &self.masters
    }

    /// Master from the cache only; never fetches.
    #[must_use]
    pub fn cached_master(&self, master_entity_type: &str, master_entity_id: &str) -> Option<EntityRecord> {
        self.masters.get_master(master_entity_type, master_entity_id)
    }

    /// Version from the cache only; never fetches.
    #[must_use]
    pub fn cached_version(&self, master_entity_type: &str, master_entity_id: &str) -> Option<String> {
        self.masters
            .get_entry(master_entity_type, master_entity_id)
            .and_then(|entry| entry.version)
    }

    /// Version of a master, resolving it if it is not cached.
    pub async fn get_version(&self, master_entity_type: &str, master_entity_id: &str) -> Option<String> {
        if master_entity_type.is_empty() || master_entity_id.is_empty() {
            return None;
        }
        info!(master_entity_type, master_entity_id, "Resolving master version");
        let master = self.get_master(master_entity_type, master_entity_id).await?;
        master.version().map(str::to_owned)
    }

    /// Master record, from the cache when present.
    ///
    /// On a miss this resolves the master, fetching it if no primary store holds
    /// it. A master that is Resolving is a miss, so a call made while another
    /// load is outstanding starts an overlapping fetch; the later result wins.
    /// Use [`cached_master`](Self::cached_master) for a read that never fetches.
    pub async fn get_master(&self, master_entity_type: &str, master_entity_id: &str) -> Option<EntityRecord> {
        if master_entity_type.is_empty() || master_entity_id.is_empty() {
            return None;
        }
        if let Some(master) = self.masters.get_master(master_entity_type, master_entity_id) {
            return Some(master);
        }
        self.set_master(master_entity_type, master_entity_id).await
    }

    /// Resolve a master from its primary store, or fetch it when not held there.
    pub async fn set_master(&self, master_entity_type: &str, master_entity_id: &str) -> Option<EntityRecord> {
        if let Some(master) = self.stores.find_master(master_entity_type, master_entity_id) {
            debug!(master_entity_type, master_entity_id, "Master found in primary store");
            if let Err(err) = self.store_master(&master) {
                warn!(master_entity_type, master_entity_id, error = %err, "Failed to cache master");
            }
            return Some(master);
        }
        self.load_master(master_entity_type, master_entity_id).await.ok()
    }

    /// Fetch a master, replacing any cached copy, and flush its scoped stores.
    ///
    /// # Errors
    /// Returns [`CacheError::Fetch`] when the fetch fails and
    /// [`CacheError::MasterNotFound`] when it returns nothing; scoped stores are
    /// flushed as invalid in both cases.
    pub async fn load_master(&self, master_entity_type: &str, master_entity_id: &str) -> Result<EntityRecord> {
        let (request, pending) = self.begin_master_load(master_entity_type, master_entity_id);
        let outcome = self.data.fetch_entity(&request).await;
        self.finish_master_load(pending, outcome)
    }

    fn begin_master_load<'a>(
        &'a self,
        master_entity_type: &'a str,
        master_entity_id: &'a str,
    ) -> (EntityRequest, PendingMaster<'a>) {
        info!(master_entity_type, master_entity_id, "Loading master");
        self.masters.remove_master(master_entity_type, master_entity_id);
        let request = EntityRequest::new(master_entity_type, master_entity_id, self.username.as_deref());
        let pending = PendingMaster {
            stores: &self.stores,
            events: &self.events,
            entity_type: master_entity_type,
            entity_id: master_entity_id,
            armed: true,
        };
        (request, pending)
    }

    fn finish_master_load(
        &self,
        mut pending: PendingMaster<'_>,
        outcome: std::result::Result<FetchResponse, D::Error>,
    ) -> Result<EntityRecord> {
        pending.armed = false;
        let (master_entity_type, master_entity_id) = (pending.entity_type, pending.entity_id);
        let loaded = outcome
            .map_err(|err| CacheError::fetch(format!("master {master_entity_type} {master_entity_id}"), err))
            .and_then(|response| {
                response
                    .records
                    .into_iter()
                    .next()
                    .ok_or_else(|| CacheError::MasterNotFound {
                        entity_type: master_entity_type.to_owned(),
                        entity_id: master_entity_id.to_owned(),
                    })
            })
            .and_then(|mut master| {
                if master.entity_id().is_none()
                    && let Some(descriptor) = self.types.entity(master_entity_type)
                {
                    master.set_entity_id(descriptor, master_entity_id);
                }
                self.store_master(&master)?;
                Ok(master)
            });

        let failed = loaded.is_err();
        match &loaded {
            Ok(master) => info!(
                master_entity_type,
                master_entity_id,
                version = ?master.version(),
                "Loaded master"
            ),
            Err(err) => warn!(master_entity_type, master_entity_id, error = %err, "Failed to load master"),
        }
        pending.resolve(failed);
        loaded
    }

    /// Cache a master record.
    ///
    /// # Errors
    /// Returns [`CacheError::MissingEntityId`] for a record without an id.
    pub fn store_master(&self, master: &EntityRecord) -> Result<MasterEntry> {
        self.masters.store_master(master)
    }

    /// Drop every cached master of a type.
    pub fn flush_master(&self, master_entity_type: &str) -> usize {
        self.masters.flush_master(master_entity_type)
    }

    /// Invalidate after an external change to a master type.
    ///
    /// * With a master record: cache it and flush the stores scoped to its id.
    /// * With only an id: refetch that master, flushing master stores while the
    ///   fetch is outstanding, then its scoped stores.
    /// * With neither: drop every cached master of the type and flush all its stores.
    pub async fn refresh_data(
        &self,
        master_entity_type: &str,
        master_entity_id: Option<&str>,
        master: Option<EntityRecord>,
    ) {
        if master_entity_type.is_empty() {
            return;
        }
        match (master, master_entity_id) {
            (Some(master), _) => {
                info!(master_entity_type, master_entity_id, "Refreshing with supplied master");
                if let Err(err) = self.store_master(&master) {
                    warn!(master_entity_type, error = %err, "Failed to cache supplied master");
                }
                let scope = master_entity_id.or_else(|| master.entity_id());
                self.stores.flush_mastered_stores(master_entity_type, scope, false);
            }
            (None, Some(master_entity_id)) => {
                info!(master_entity_type, master_entity_id, "Refreshing master");
                let (request, pending) = self.begin_master_load(master_entity_type, master_entity_id);
                self.stores.flush_master_stores(master_entity_type);
                let outcome = self.data.fetch_entity(&request).await;
                if let Err(err) = self.finish_master_load(pending, outcome) {
                    debug!(master_entity_type, master_entity_id, error = %err, "Master refresh did not resolve");
                }
            }
            (None, None) => {
                info!(master_entity_type, "Refreshing all masters of type");
                self.flush_master(master_entity_type);
                self.stores.flush_mastering_stores(master_entity_type, None);
            }
        }
    }
}

/// A master fetch between the cache removal and its outcome.
///
/// Dropped before completing, the load resolves as failed: scoped stores are
/// flushed invalid and a failed `masterLoad` is published.
struct PendingMaster<'a> {
    stores: &'a EntityStoreManager,
    events: &'a EventBus,
    entity_type: &'a str,
    entity_id: &'a str,
    armed: bool,
}

impl PendingMaster<'_> {
    fn resolve(&self, failed: bool) {
        self.stores
            .flush_mastered_stores(self.entity_type, Some(self.entity_id), failed);
        self.events.publish(CacheEvent::MasterLoad {
            entity_type: self.entity_type.to_owned(),
            entity_id: self.entity_id.to_owned(),
            failed,
        });
    }
}

impl Drop for PendingMaster<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                master_entity_type = self.entity_type,
                master_entity_id = self.entity_id,
                "Master load abandoned"
            );
            self.resolve(true);
        }
    }
}
