//! Shared fixtures for unit tests.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;
use baff_core::{
    EntityRecord, EntityRequest, EntityTypeDescriptor, FetchResponse, PageQuery, Sorter, StoreTypeDescriptor,
    TypeRegistry,
};
use serde_json::json;
use tokio::sync::oneshot;

use crate::data_access::DataAccess;
use crate::events::{CacheEvent, EventReceiver};

/// Customer masters with a primary `CustomerStore`; orders scoped to a customer.
pub fn registry() -> TypeRegistry {
    TypeRegistry::from_descriptors(
        [
            EntityTypeDescriptor::master("Customer").with_primary_store("CustomerStore"),
            EntityTypeDescriptor::mastered("Order", "Customer"),
        ],
        [
            StoreTypeDescriptor::new("CustomerStore", "Customer"),
            StoreTypeDescriptor::new("OrderStore", "Order")
                .with_page_size(2)
                .with_sorter(Sorter::asc("amount")),
        ],
    )
    .expect("valid registry")
}

pub fn customer(id: &str, version: &str) -> EntityRecord {
    let types = registry();
    EntityRecord::from_value(
        types.entity("Customer").expect("customer"),
        json!({ "entityId": id, "versionControl": version, "name": format!("Customer {id}") }),
    )
    .expect("customer record")
}

pub fn order(id: &str, customer_id: &str, amount: i64) -> EntityRecord {
    let types = registry();
    EntityRecord::from_value(
        types.entity("Order").expect("order"),
        json!({ "entityId": id, "masterEntityId": customer_id, "amount": amount }),
    )
    .expect("order record")
}

pub fn drain(rx: &mut EventReceiver) -> Vec<CacheEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scriptable data-access double. Fetches may be held until released.
#[derive(Default)]
pub struct MockAccess {
    inner: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    masters: HashMap<(String, String), EntityRecord>,
    records: HashMap<String, Vec<EntityRecord>>,
    failing: HashSet<String>,
    holds: VecDeque<oneshot::Receiver<()>>,
    entity_requests: Vec<EntityRequest>,
    page_queries: Vec<PageQuery>,
}

impl MockAccess {
    pub fn put_master(&self, record: EntityRecord) {
        let key = (
            record.entity_type().to_owned(),
            record.entity_id().expect("master id").to_owned(),
        );
        guard(&self.inner).masters.insert(key, record);
    }

    pub fn set_records(&self, entity_type: &str, records: Vec<EntityRecord>) {
        guard(&self.inner).records.insert(entity_type.to_owned(), records);
    }

    pub fn fail(&self, entity_type: &str) {
        guard(&self.inner).failing.insert(entity_type.to_owned());
    }

    /// Hold the next fetch until the returned sender fires.
    pub fn hold(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        guard(&self.inner).holds.push_back(rx);
        tx
    }

    pub fn entity_requests(&self) -> Vec<EntityRequest> {
        guard(&self.inner).entity_requests.clone()
    }

    pub fn page_queries(&self) -> Vec<PageQuery> {
        guard(&self.inner).page_queries.clone()
    }

    async fn wait_turn(&self) {
        let hold = guard(&self.inner).holds.pop_front();
        if let Some(rx) = hold {
            let _ = rx.await;
        }
    }
}

impl DataAccess for MockAccess {
    type Error = anyhow::Error;

    async fn fetch_entity(&self, request: &EntityRequest) -> Result<FetchResponse, Self::Error> {
        guard(&self.inner).entity_requests.push(request.clone());
        self.wait_turn().await;
        let state = guard(&self.inner);
        if state.failing.contains(&request.entity_type) {
            return Err(anyhow!("service unavailable for {}", request.entity_type));
        }
        let found: Vec<_> = state
            .masters
            .get(&(request.entity_type.clone(), request.entity_id.clone()))
            .cloned()
            .into_iter()
            .collect();
        Ok(FetchResponse::new(found))
    }

    async fn fetch_page(&self, query: &PageQuery) -> Result<FetchResponse, Self::Error> {
        guard(&self.inner).page_queries.push(query.clone());
        self.wait_turn().await;
        let state = guard(&self.inner);
        if state.failing.contains(&query.entity_type) {
            return Err(anyhow!("service unavailable for {}", query.entity_type));
        }
        let mut matched: Vec<_> = state
            .records
            .get(&query.entity_type)
            .into_iter()
            .flatten()
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
        let page = matched
            .into_iter()
            .skip(query.start)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(FetchResponse::new(page).with_total(total))
    }
}
