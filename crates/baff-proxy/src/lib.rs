//! In-memory data-access backend for the baff entity cache.

mod error;

pub use error::ProxyError;

use anyhow::{Context, Result, anyhow};
use baff_core::{EntityRecord, EntityRequest, FetchResponse, PageQuery, TypeRegistry};
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Fixture-backed service proxy answering entity and page fetches.
#[derive(Debug, Default)]
pub struct MemoryProxy {
    inner: Mutex<ProxyState>,
}

#[derive(Debug, Default)]
struct ProxyState {
    data: HashMap<String, Vec<EntityRecord>>,
    unavailable: HashSet<String>,
    entity_fetches: usize,
    page_fetches: usize,
}

impl MemoryProxy {
    /// Create a proxy with no data.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a fixture file mapping entity type names to arrays of payloads.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or a payload does not decode
    /// against its registered entity type.
    pub fn open(path: impl AsRef<Path>, registry: &TypeRegistry) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let fixtures: Map<String, Value> = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        let proxy = Self::from_fixtures(fixtures, registry)?;
        info!(path = %path.display(), "Loaded proxy fixtures");
        Ok(proxy)
    }

    /// Build a proxy from an already-parsed fixture object.
    ///
    /// # Errors
    /// Returns an error for unknown entity types, non-array values or undecodable payloads.
    pub fn from_fixtures(fixtures: Map<String, Value>, registry: &TypeRegistry) -> Result<Self> {
        let proxy = Self::new();
        for (entity_type, payloads) in fixtures {
            let descriptor = registry
                .entity(&entity_type)
                .ok_or_else(|| anyhow!("fixture references unknown entity type {entity_type}"))?;
            let Value::Array(payloads) = payloads else {
                return Err(anyhow!("fixture for {entity_type} must be an array"));
            };
            let records = payloads
                .into_iter()
                .map(|payload| EntityRecord::from_value(descriptor, payload))
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("invalid {entity_type} fixture"))?;
            proxy.insert_all(records)?;
        }
        Ok(proxy)
    }

    /// Add or replace a record, matching on entity type and id.
    ///
    /// # Errors
    /// Returns [`ProxyError::LockError`] if the data set lock is poisoned.
    pub fn upsert(&self, record: EntityRecord) -> Result<(), ProxyError> {
        let mut state = self.inner.lock().map_err(|_| ProxyError::LockError)?;
        let records = state.data.entry(record.entity_type().to_owned()).or_default();
        let existing = record
            .entity_id()
            .and_then(|id| records.iter().position(|r| r.entity_id() == Some(id)));
        match existing {
            Some(idx) => records[idx] = record,
            None => records.push(record),
        }
        drop(state);
        Ok(())
    }

    /// Add several records.
    ///
    /// # Errors
    /// Returns [`ProxyError::LockError`] if the data set lock is poisoned.
    pub fn insert_all(&self, records: impl IntoIterator<Item = EntityRecord>) -> Result<(), ProxyError> {
        for record in records {
            self.upsert(record)?;
        }
        Ok(())
    }

    /// Make every fetch for an entity type fail until restored.
    ///
    /// # Errors
    /// Returns [`ProxyError::LockError`] if the data set lock is poisoned.
    pub fn set_unavailable(&self, entity_type: &str, unavailable: bool) -> Result<(), ProxyError> {
        let mut state = self.inner.lock().map_err(|_| ProxyError::LockError)?;
        if unavailable {
            state.unavailable.insert(entity_type.to_owned());
        } else {
            state.unavailable.remove(entity_type);
        }
        drop(state);
        Ok(())
    }

    /// Answer a single-entity fetch. A missing entity yields an empty response.
    ///
    /// # Errors
    /// Returns an error when the entity type is unknown or marked unavailable.
    pub fn fetch_entity(&self, request: &EntityRequest) -> Result<FetchResponse, ProxyError> {
        let mut state = self.inner.lock().map_err(|_| ProxyError::LockError)?;
        state.entity_fetches += 1;
        let records = state.records_of(&request.entity_type)?;
        let found: Vec<EntityRecord> = records
            .iter()
            .filter(|record| record.entity_id() == Some(request.entity_id.as_str()))
            .take(1)
            .cloned()
            .collect();
        drop(state);

        debug!(
            entity_type = %request.entity_type,
            entity_id = %request.entity_id,
            found = found.len(),
            "Answered entity fetch"
        );
        let total = found.len();
        Ok(FetchResponse::new(found)
            .with_total(total)
            .with_meta(json!({ "success": true, "total": total })))
    }

    /// Answer a page fetch: filter, sort, then slice.
    ///
    /// # Errors
    /// Returns an error when the entity type is unknown or marked unavailable.
    pub fn fetch_page(&self, query: &PageQuery) -> Result<FetchResponse, ProxyError> {
        let mut state = self.inner.lock().map_err(|_| ProxyError::LockError)?;
        state.page_fetches += 1;
        let mut matched: Vec<EntityRecord> = state
            .records_of(&query.entity_type)?
            .iter()
            .filter(|record| query.filters.iter().all(|filter| filter.matches(record)))
            .cloned()
            .collect();
        drop(state);

        matched.sort_by(|a, b| {
            query
                .sorters
                .iter()
                .map(|sorter| sorter.compare(a, b))
                .find(|ordering| ordering.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let total = matched.len();
        let page: Vec<EntityRecord> = matched
            .into_iter()
            .skip(query.start)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();

        debug!(
            store_type = %query.store_type,
            start = query.start,
            returned = page.len(),
            total,
            "Answered page fetch"
        );
        Ok(FetchResponse::new(page)
            .with_total(total)
            .with_meta(json!({ "success": true, "total": total })))
    }

    /// Number of single-entity fetches answered so far.
    #[must_use]
    pub fn entity_fetches(&self) -> usize {
        self.inner.lock().map_or(0, |state| state.entity_fetches)
    }

    /// Number of page fetches answered so far.
    #[must_use]
    pub fn page_fetches(&self) -> usize {
        self.inner.lock().map_or(0, |state| state.page_fetches)
    }
}

impl ProxyState {
    fn records_of(&self, entity_type: &str) -> Result<&[EntityRecord], ProxyError> {
        if self.unavailable.contains(entity_type) {
            return Err(ProxyError::Unavailable(entity_type.to_owned()));
        }
        self.data
            .get(entity_type)
            .map(Vec::as_slice)
            .ok_or_else(|| ProxyError::UnknownEntityType(entity_type.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use baff_core::{EntityTypeDescriptor, Filter, Sorter, StoreTypeDescriptor};
    use std::collections::BTreeMap;

    fn registry() -> TypeRegistry {
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
        .expect("valid registry")
    }

    fn seeded() -> MemoryProxy {
        let fixtures = json!({
            "Customer": [
                {"entityId": "42", "versionControl": "v1", "name": "Acme"},
                {"entityId": "43", "versionControl": "v7", "name": "Globex"}
            ],
            "Order": [
                {"entityId": "o-1", "masterEntityId": "42", "amount": 30},
                {"entityId": "o-2", "masterEntityId": "42", "amount": 10},
                {"entityId": "o-3", "masterEntityId": "43", "amount": 20}
            ]
        });
        let Value::Object(map) = fixtures else {
            unreachable!("fixture literal is an object")
        };
        MemoryProxy::from_fixtures(map, &registry()).expect("fixtures load")
    }

    fn order_query(start: usize, limit: Option<usize>) -> PageQuery {
        PageQuery {
            store_type: "OrderStore".into(),
            entity_type: "Order".into(),
            start,
            limit,
            sorters: vec![Sorter::asc("amount")],
            filters: vec![Filter::master("42")],
            params: BTreeMap::new(),
        }
    }

    #[test]
    fn fetch_entity_returns_matching_record() {
        let proxy = seeded();
        let response = proxy
            .fetch_entity(&EntityRequest::new("Customer", "43", None))
            .expect("fetch");
        assert_eq!(response.records.len(), 1);
        assert_eq!(response.records[0].version(), Some("v7"));
        assert_eq!(proxy.entity_fetches(), 1);
    }

    #[test]
    fn fetch_entity_for_missing_id_is_empty() {
        let proxy = seeded();
        let response = proxy
            .fetch_entity(&EntityRequest::new("Customer", "99", None))
            .expect("fetch");
        assert!(response.records.is_empty());
    }

    #[test]
    fn fetch_page_filters_sorts_and_slices() {
        let proxy = seeded();
        let response = proxy.fetch_page(&order_query(0, Some(1))).expect("fetch");
        assert_eq!(response.total, Some(2));
        let ids: Vec<_> = response.records.iter().filter_map(EntityRecord::entity_id).collect();
        assert_eq!(ids, vec!["o-2"]);

        let next = proxy.fetch_page(&order_query(1, Some(1))).expect("fetch");
        let ids: Vec<_> = next.records.iter().filter_map(EntityRecord::entity_id).collect();
        assert_eq!(ids, vec!["o-1"]);
    }

    #[test]
    fn unavailable_type_fails_until_restored() {
        let proxy = seeded();
        proxy.set_unavailable("Order", true).expect("toggle");
        let err = proxy.fetch_page(&order_query(0, None)).expect_err("must fail");
        assert!(matches!(err, ProxyError::Unavailable(t) if t == "Order"));

        proxy.set_unavailable("Order", false).expect("toggle");
        assert!(proxy.fetch_page(&order_query(0, None)).is_ok());
    }

    #[test]
    fn upsert_replaces_existing_record() {
        let proxy = seeded();
        let descriptor = registry().entity("Customer").cloned().expect("customer");
        let updated = EntityRecord::from_value(
            &descriptor,
            json!({"entityId": "42", "versionControl": "v2", "name": "Acme Ltd"}),
        )
        .expect("decode");
        proxy.upsert(updated).expect("upsert");

        let response = proxy
            .fetch_entity(&EntityRequest::new("Customer", "42", None))
            .expect("fetch");
        assert_eq!(response.records[0].version(), Some("v2"));
    }

    #[test]
    fn fixture_with_unknown_type_is_rejected() {
        let Value::Object(map) = json!({"Invoice": []}) else {
            unreachable!("fixture literal is an object")
        };
        let err = MemoryProxy::from_fixtures(map, &registry()).expect_err("unknown type");
        assert!(err.to_string().contains("Invoice"));
    }
}
