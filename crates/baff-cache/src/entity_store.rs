//! A cached, filterable, pageable collection of records of one store type.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use baff_core::{
    EntityRecord, EntityTypeDescriptor, FetchResponse, Filter, OwnerId, PageQuery, StoreTypeDescriptor,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::data_access::DataAccess;
use crate::error::{CacheError, Result};
use crate::events::{CacheEvent, EventBus};

/// Build the registry key for a store instance: `type[|masterId][|ownerId]`.
///
/// When only an owner is given the master segment is kept empty (`type||owner`)
/// so owner-scoped and master-scoped keys never collide.
#[must_use]
pub fn store_key(store_type: &str, owner_id: Option<&OwnerId>, master_entity_id: Option<&str>) -> String {
    let mut key = store_type.to_owned();
    if master_entity_id.is_some() || owner_id.is_some() {
        key.push('|');
        key.push_str(master_entity_id.unwrap_or_default());
    }
    if let Some(owner) = owner_id {
        key.push('|');
        key.push_str(owner.as_str());
    }
    key
}

/// Build the master key (`#Type#` or `#Type#|id`) describing which master a store depends on.
#[must_use]
pub fn master_key(master_entity_type: &str, master_entity_id: Option<&str>) -> String {
    master_entity_id.map_or_else(
        || format!("#{master_entity_type}#"),
        |id| format!("#{master_entity_type}#|{id}"),
    )
}

/// Records of a single store type, scoped to an optional owner and master.
///
/// Stores are shared between consumers through the registry; all mutation goes
/// through `&self` and an internal lock that is never held across a fetch.
#[derive(Debug)]
pub struct EntityStore {
    descriptor: StoreTypeDescriptor,
    store_key: String,
    master_entity_type: String,
    master_entity_id: Option<String>,
    owner_id: Option<OwnerId>,
    events: EventBus,
    state: Mutex<StoreState>,
}

#[derive(Debug, Default)]
struct StoreState {
    records: Vec<EntityRecord>,
    has_loaded: bool,
    in_flight: usize,
    /// Bumped whenever held data is invalidated; completions from older generations are dropped.
    generation: u64,
    /// Generation whose fetch result is currently held.
    applied: Option<u64>,
    total: Option<usize>,
    meta: Value,
    context_filters: Vec<Filter>,
    field_filters: Vec<Filter>,
    params: BTreeMap<String, String>,
    destroyed: bool,
}

enum Completion {
    Replace,
    Append,
}

/// In-flight slot held by a fetch. Dropping it unfinished gives the slot back.
struct PendingFetch<'a> {
    store: &'a EntityStore,
    generation: u64,
    armed: bool,
}

impl<'a> PendingFetch<'a> {
    const fn new(store: &'a EntityStore, generation: u64) -> Self {
        Self {
            store,
            generation,
            armed: true,
        }
    }

    fn finish<E>(mut self, result: std::result::Result<FetchResponse, E>, mode: Completion) -> Result<usize>
    where
        E: Into<anyhow::Error>,
    {
        self.armed = false;
        self.store.complete(self.generation, result, mode)
    }
}

impl Drop for PendingFetch<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.store.abandon(self.generation);
        }
    }
}

impl EntityStore {
    /// Create an empty store. Scoped stores get an equality filter on the master id.
    #[must_use]
    pub fn new(
        descriptor: StoreTypeDescriptor,
        entity: &EntityTypeDescriptor,
        owner_id: Option<&OwnerId>,
        master_entity_id: Option<&str>,
        events: EventBus,
    ) -> Self {
        Self {
            store_key: store_key(&descriptor.name, owner_id, master_entity_id),
            descriptor,
            master_entity_type: entity.master_entity_type().to_owned(),
            master_entity_id: master_entity_id.map(str::to_owned),
            owner_id: owner_id.cloned(),
            events,
            state: Mutex::new(StoreState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registry key of this store.
    #[must_use]
    pub fn store_key(&self) -> &str {
        &self.store_key
    }

    /// Key of the master this store depends on.
    #[must_use]
    pub fn master_key(&self) -> String {
        master_key(&self.master_entity_type, self.master_entity_id.as_deref())
    }

    /// Store type name.
    #[must_use]
    pub fn store_type(&self) -> &str {
        &self.descriptor.name
    }

    /// Entity type held by this store.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.descriptor.entity_type
    }

    /// Master entity type the held entity belongs to.
    #[must_use]
    pub fn master_entity_type(&self) -> &str {
        &self.master_entity_type
    }

    /// Master entity id this store is scoped to, if any.
    #[must_use]
    pub fn master_entity_id(&self) -> Option<&str> {
        self.master_entity_id.as_deref()
    }

    /// Owner this store instance is partitioned by, if any.
    #[must_use]
    pub const fn owner_id(&self) -> Option<&OwnerId> {
        self.owner_id.as_ref()
    }

    /// Whether this store holds master entities of `master_entity_type` (not scoped to one master).
    #[must_use]
    pub fn holds_masters_of(&self, master_entity_type: &str) -> bool {
        self.master_entity_id.is_none() && self.master_entity_type == master_entity_type
    }

    /// Whether this store is scoped to a master of `master_entity_type`.
    ///
    /// With `master_entity_id` of `None` any scoped store of the type matches.
    #[must_use]
    pub fn is_mastered_by(&self, master_entity_type: &str, master_entity_id: Option<&str>) -> bool {
        self.master_entity_type == master_entity_type
            && self.master_entity_id.as_deref().is_some_and(|held| {
                master_entity_id.is_none_or(|wanted| wanted == held)
            })
    }

    /// True once a load has completed and no fetch is outstanding.
    #[must_use]
    pub fn has_loaded(&self) -> bool {
        self.lock().has_loaded
    }

    /// True while at least one fetch is outstanding.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.lock().in_flight > 0
    }

    /// True after [`destroy`](Self::destroy).
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.lock().destroyed
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// True when no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Server-side total reported by the last applied fetch.
    #[must_use]
    pub fn total(&self) -> Option<usize> {
        self.lock().total
    }

    /// Snapshot of the held records.
    #[must_use]
    pub fn records(&self) -> Vec<EntityRecord> {
        self.lock().records.clone()
    }

    /// Find the held record with the same entity id as `record`.
    #[must_use]
    pub fn find_entity(&self, record: &EntityRecord) -> Option<EntityRecord> {
        record.entity_id().and_then(|id| self.find_by_id(id))
    }

    /// Find a held record by entity id.
    #[must_use]
    pub fn find_by_id(&self, entity_id: &str) -> Option<EntityRecord> {
        self.lock()
            .records
            .iter()
            .find(|record| record.entity_id() == Some(entity_id))
            .cloned()
    }

    /// Effective filters: master scope, store-type defaults, context then field filters.
    #[must_use]
    pub fn filters(&self) -> Vec<Filter> {
        let state = self.lock();
        self.effective_filters(&state)
    }

    fn effective_filters(&self, state: &StoreState) -> Vec<Filter> {
        self.master_entity_id
            .iter()
            .map(Filter::master)
            .chain(self.descriptor.filters.iter().cloned())
            .chain(state.context_filters.iter().cloned())
            .chain(state.field_filters.iter().cloned())
            .collect()
    }

    /// Number of user-applied field filters.
    #[must_use]
    pub fn filter_count(&self) -> usize {
        self.lock().field_filters.len()
    }

    /// Apply a field filter, replacing any filter with the same key.
    ///
    /// Held records are dropped when the filter set changes.
    pub fn add_filter(&self, filter: Filter) -> bool {
        let mut state = self.lock();
        if state.field_filters.contains(&filter) {
            return false;
        }
        state.field_filters.retain(|existing| existing.key() != filter.key());
        state.field_filters.push(filter);
        Self::invalidate(&mut state);
        drop(state);
        debug!(store_key = %self.store_key, "Field filter applied");
        true
    }

    /// Remove the field filter with the given key.
    pub fn remove_filter(&self, key: &str) -> bool {
        let mut state = self.lock();
        let before = state.field_filters.len();
        state.field_filters.retain(|existing| existing.key() != key);
        let removed = state.field_filters.len() != before;
        if removed {
            Self::invalidate(&mut state);
        }
        removed
    }

    /// Remove every field filter.
    pub fn clear_filters(&self) -> bool {
        let mut state = self.lock();
        if state.field_filters.is_empty() {
            return false;
        }
        state.field_filters.clear();
        Self::invalidate(&mut state);
        true
    }

    /// Apply context filters.
    ///
    /// Returns true when the same filters were already applied. Otherwise held
    /// records are dropped, the filters replaced, and false is returned.
    pub fn set_context_filters(&self, filters: Vec<Filter>) -> bool {
        let mut state = self.lock();
        if state.context_filters == filters {
            return true;
        }
        state.context_filters = filters;
        Self::invalidate(&mut state);
        drop(state);
        debug!(store_key = %self.store_key, "Context filters changed");
        false
    }

    /// Set a request parameter sent with every page fetch.
    ///
    /// Held records are dropped when the value changes.
    pub fn set_param(&self, name: &str, value: &str) -> bool {
        let mut state = self.lock();
        if state.params.get(name).is_some_and(|current| current == value) {
            return false;
        }
        state.params.insert(name.to_owned(), value.to_owned());
        Self::invalidate(&mut state);
        true
    }

    /// Current value of a request parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<String> {
        self.lock().params.get(name).cloned()
    }

    /// Query for the page starting at `start` under the current filters and params.
    #[must_use]
    pub fn query(&self, start: usize) -> PageQuery {
        let state = self.lock();
        self.query_from(&state, start)
    }

    fn query_from(&self, state: &StoreState, start: usize) -> PageQuery {
        PageQuery {
            store_type: self.descriptor.name.clone(),
            entity_type: self.descriptor.entity_type.clone(),
            start,
            limit: self.descriptor.page_limit(),
            sorters: self.descriptor.sorters.clone(),
            filters: self.effective_filters(state),
            params: state.params.clone(),
        }
    }

    /// Fetch the first page, replacing held records.
    ///
    /// Returns the number of records held afterwards. A completion superseded by a
    /// flush or a newer load is discarded.
    ///
    /// # Errors
    /// Returns [`CacheError::StoreDestroyed`] for a destroyed store and
    /// [`CacheError::Fetch`] when the data-access layer fails.
    pub async fn load<D>(&self, data: &D) -> Result<usize>
    where
        D: DataAccess + ?Sized,
    {
        let (query, pending) = {
            let mut state = self.lock();
            if state.destroyed {
                return Err(CacheError::StoreDestroyed(self.store_key.clone()));
            }
            state.has_loaded = false;
            state.generation += 1;
            state.in_flight += 1;
            (self.query_from(&state, 0), PendingFetch::new(self, state.generation))
        };
        debug!(store_key = %self.store_key, "Loading store");
        let result = data.fetch_page(&query).await;
        pending.finish(result, Completion::Replace)
    }

    /// Fetch the page following the held records and append it.
    ///
    /// Does nothing (returns `Ok(0)`) before the first load, while a fetch is
    /// outstanding, or when the reported total is already held.
    ///
    /// # Errors
    /// Returns [`CacheError::StoreDestroyed`] for a destroyed store and
    /// [`CacheError::Fetch`] when the data-access layer fails.
    pub async fn load_next_page<D>(&self, data: &D) -> Result<usize>
    where
        D: DataAccess + ?Sized,
    {
        let (query, pending) = {
            let mut state = self.lock();
            if state.destroyed {
                return Err(CacheError::StoreDestroyed(self.store_key.clone()));
            }
            let exhausted = state.total.is_some_and(|total| state.records.len() >= total);
            if !state.has_loaded || state.in_flight > 0 || exhausted || self.descriptor.page_limit().is_none() {
                return Ok(0);
            }
            state.in_flight += 1;
            let start = state.records.len();
            (self.query_from(&state, start), PendingFetch::new(self, state.generation))
        };
        debug!(store_key = %self.store_key, start = query.start, "Loading next page");
        let before = query.start;
        let held = pending.finish(data.fetch_page(&query).await, Completion::Append)?;
        Ok(held.saturating_sub(before))
    }

    fn complete<E>(&self, generation: u64, result: std::result::Result<FetchResponse, E>, mode: Completion) -> Result<usize>
    where
        E: Into<anyhow::Error>,
    {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);

        let outcome = match result {
            Err(err) => Err(CacheError::fetch(self.store_key.clone(), err)),
            Ok(response) if generation == state.generation && !state.destroyed => {
                match mode {
                    Completion::Replace => state.records = response.records,
                    Completion::Append => state.records.extend(response.records),
                }
                state.total = response.total;
                state.meta = response.meta;
                state.applied = Some(generation);
                Ok(state.records.len())
            }
            Ok(_) => {
                debug!(store_key = %self.store_key, generation, "Discarding superseded fetch");
                Ok(state.records.len())
            }
        };

        let event = self.settle(&mut state);
        drop(state);

        if let Err(err) = &outcome {
            warn!(store_key = %self.store_key, error = %err, "Store load failed");
        }
        if let Some(event) = event {
            self.events.publish(event);
        }
        outcome
    }

    /// Release the in-flight slot of a fetch whose future was dropped before completing.
    fn abandon(&self, generation: u64) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        // A loaded store stays loaded; only a completion parked behind this fetch settles.
        let event = if state.has_loaded { None } else { self.settle(&mut state) };
        drop(state);
        debug!(store_key = %self.store_key, generation, "Fetch abandoned");
        if let Some(event) = event {
            self.events.publish(event);
        }
    }

    /// Mark the store loaded once the current generation's data is held and nothing is outstanding.
    fn settle(&self, state: &mut StoreState) -> Option<CacheEvent> {
        if state.in_flight > 0 || state.destroyed || state.applied != Some(state.generation) {
            return None;
        }
        let first_load = !state.has_loaded;
        state.has_loaded = true;
        debug!(store_key = %self.store_key, records = state.records.len(), first_load, "Store loaded");
        Some(CacheEvent::PostFetch {
            store_key: self.store_key.clone(),
            first_load,
            total: state.total,
            meta: state.meta.clone(),
        })
    }

    fn invalidate(state: &mut StoreState) {
        state.records.clear();
        state.has_loaded = false;
        state.total = None;
        state.meta = Value::Null;
        state.applied = None;
        state.generation += 1;
    }

    /// Drop held records without notifying subscribers.
    pub fn remove_all(&self) {
        Self::invalidate(&mut self.lock());
    }

    /// Drop held records and notify subscribers; consumers reload on demand.
    pub fn flush(&self, invalid: bool) {
        Self::invalidate(&mut self.lock());
        info!(store_key = %self.store_key, master_key = %self.master_key(), invalid, "Flushed store");
        self.events.publish(CacheEvent::Flush {
            store_key: self.store_key.clone(),
            invalid,
        });
    }

    /// Release held records and refuse further loads.
    pub fn destroy(&self) {
        let mut state = self.lock();
        Self::invalidate(&mut state);
        state.destroyed = true;
        drop(state);
        debug!(store_key = %self.store_key, "Destroyed store");
    }
}
