//! Request and response shapes crossing the data-access boundary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filter::{Filter, Sorter};
use crate::record::EntityRecord;

/// Extra parameter carrying the session user name.
pub const USERNAME_PARAM: &str = "username";
/// Extra parameter carrying the requested entity id.
pub const ENTITY_ID_PARAM: &str = "entityId";
/// Extra parameter carrying the action code.
pub const ACTION_CODE_PARAM: &str = "actionCode";

/// Fetch of a single entity by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRequest {
    /// Entity type to fetch.
    pub entity_type: String,
    /// Identifier of the entity.
    pub entity_id: String,
    /// Extra query parameters.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl EntityRequest {
    /// Request for one entity with the standard `entityId`/`username`/`actionCode` params.
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        username: Option<&str>,
    ) -> Self {
        let entity_id = entity_id.into();
        let mut params = BTreeMap::new();
        params.insert(ENTITY_ID_PARAM.to_owned(), entity_id.clone());
        params.insert(USERNAME_PARAM.to_owned(), username.unwrap_or_default().to_owned());
        params.insert(ACTION_CODE_PARAM.to_owned(), String::new());
        Self {
            entity_type: entity_type.into(),
            entity_id,
            params,
        }
    }
}

/// Fetch of one page of a store's records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    /// Store type issuing the query.
    pub store_type: String,
    /// Entity type held by the store.
    pub entity_type: String,
    /// Offset of the first record.
    pub start: usize,
    /// Maximum records to return; `None` fetches everything.
    pub limit: Option<usize>,
    /// Sort order.
    #[serde(default)]
    pub sorters: Vec<Sorter>,
    /// Filters; all must match.
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// Extra query parameters.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// Result of a successful fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FetchResponse {
    /// Records returned.
    pub records: Vec<EntityRecord>,
    /// Total matching records on the server, when known.
    #[serde(default)]
    pub total: Option<usize>,
    /// Raw response metadata passed through to observers.
    #[serde(default)]
    pub meta: Value,
}

impl FetchResponse {
    /// Response holding the given records.
    #[must_use]
    pub const fn new(records: Vec<EntityRecord>) -> Self {
        Self {
            records,
            total: None,
            meta: Value::Null,
        }
    }

    /// Set the server-side total.
    #[must_use]
    pub const fn with_total(mut self, total: usize) -> Self {
        self.total = Some(total);
        self
    }

    /// Attach raw response metadata.
    #[must_use]
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }
}
