//! Filter and sorter descriptors shared by stores and data-access backends.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::EntityRecord;

/// Field name carrying the master entity identifier on every record.
pub const MASTER_ENTITY_ID_FIELD: &str = "masterEntityId";

/// Comparison applied by a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    /// Field equals the value.
    #[default]
    Eq,
    /// Field differs from the value (or is absent).
    Ne,
    /// Case-insensitive substring match.
    Like,
    /// Field equals one of the pipe-delimited values.
    In,
    /// Field is greater than the value.
    Gt,
    /// Field is greater than or equal to the value.
    Ge,
    /// Field is less than the value.
    Lt,
    /// Field is less than or equal to the value.
    Le,
}

/// A single property filter, sent to the data-access layer with each fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filter {
    /// Optional stable identifier used to match context filters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Record field the filter applies to.
    pub property: String,
    /// Comparison operator.
    #[serde(default)]
    pub operator: FilterOp,
    /// Comparison value; `In` filters take a `a|b|c` list.
    pub value: String,
}

impl Filter {
    /// Build a filter with an explicit operator.
    pub fn new(property: impl Into<String>, operator: FilterOp, value: impl Into<String>) -> Self {
        Self {
            id: None,
            property: property.into(),
            operator,
            value: value.into(),
        }
    }

    /// Build an equality filter.
    pub fn equals(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(property, FilterOp::Eq, value)
    }

    /// Equality filter on the master entity id, installed on master-scoped stores.
    pub fn master(master_entity_id: impl Into<String>) -> Self {
        Self::equals(MASTER_ENTITY_ID_FIELD, master_entity_id).with_id(MASTER_ENTITY_ID_FIELD)
    }

    /// Attach a stable identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Key used when comparing filter sets: the id when present, otherwise the property.
    #[must_use]
    pub fn key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.property)
    }

    /// Evaluate the filter against a record.
    #[must_use]
    pub fn matches(&self, record: &EntityRecord) -> bool {
        let Some(actual) = record.field_text(&self.property) else {
            return self.operator == FilterOp::Ne;
        };

        match self.operator {
            FilterOp::Eq => actual == self.value,
            FilterOp::Ne => actual != self.value,
            FilterOp::Like => actual
                .to_lowercase()
                .contains(&self.value.to_lowercase()),
            FilterOp::In => self.value.split('|').any(|candidate| candidate == actual),
            FilterOp::Gt => compare_text(&actual, &self.value) == Ordering::Greater,
            FilterOp::Ge => compare_text(&actual, &self.value) != Ordering::Less,
            FilterOp::Lt => compare_text(&actual, &self.value) == Ordering::Less,
            FilterOp::Le => compare_text(&actual, &self.value) != Ordering::Greater,
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    /// Ascending order.
    #[default]
    Asc,
    /// Descending order.
    Desc,
}

/// Sort order applied by the data-access layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sorter {
    /// Record field to sort by.
    pub property: String,
    /// Sort direction.
    #[serde(default)]
    pub direction: SortDirection,
}

impl Sorter {
    /// Ascending sorter on a property.
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: SortDirection::Asc,
        }
    }

    /// Descending sorter on a property.
    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: SortDirection::Desc,
        }
    }

    /// Compare two records. Records lacking the property sort last.
    #[must_use]
    pub fn compare(&self, a: &EntityRecord, b: &EntityRecord) -> Ordering {
        let ordering = match (a.get(&self.property), b.get(&self.property)) {
            (Some(a), Some(b)) => compare_values(a, b),
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => compare_text(&value_text(a), &value_text(b)),
    }
}

fn compare_text(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}

pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
