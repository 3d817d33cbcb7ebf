//! Versioned entity records exchanged with the data-access layer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};
use crate::filter::{MASTER_ENTITY_ID_FIELD, value_text};
use crate::types::EntityTypeDescriptor;

/// Field carrying the entity id in service payloads.
pub const ENTITY_ID_FIELD: &str = "entityId";
/// Field carrying the optimistic-concurrency version token.
pub const VERSION_FIELD: &str = "versionControl";

/// A record with identity, master linkage and a version token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    entity_type: String,
    master_entity_type: String,
    entity_id: Option<String>,
    master_entity_id: Option<String>,
    version: Option<String>,
    data: Map<String, Value>,
}

impl EntityRecord {
    /// Create an empty, unsaved record of the given type.
    #[must_use]
    pub fn new(descriptor: &EntityTypeDescriptor) -> Self {
        Self {
            entity_type: descriptor.name.clone(),
            master_entity_type: descriptor.master_entity_type().to_owned(),
            entity_id: None,
            master_entity_id: None,
            version: None,
            data: Map::new(),
        }
    }

    /// Decode a service payload, resolving id, master id and version.
    ///
    /// The entity id comes from `entityId`, falling back to the type's id property.
    /// The master id comes from `masterEntityId`; a master entity falls back to its
    /// own id, then to the type's master id property. Empty strings count as absent.
    ///
    /// # Errors
    /// Returns [`CoreError::NotAnObject`] when the payload is not a JSON object.
    pub fn from_value(descriptor: &EntityTypeDescriptor, value: Value) -> Result<Self> {
        let Value::Object(data) = value else {
            return Err(CoreError::NotAnObject {
                entity_type: descriptor.name.clone(),
            });
        };

        let entity_id = text_field(&data, ENTITY_ID_FIELD).or_else(|| {
            descriptor
                .entity_id_property
                .as_deref()
                .and_then(|property| text_field(&data, property))
        });

        let mut master_entity_id = text_field(&data, MASTER_ENTITY_ID_FIELD);
        if master_entity_id.is_none() && descriptor.is_master_entity() {
            master_entity_id.clone_from(&entity_id);
        }
        if master_entity_id.is_none() {
            master_entity_id = descriptor
                .master_entity_id_property
                .as_deref()
                .and_then(|property| text_field(&data, property));
        }

        Ok(Self {
            entity_type: descriptor.name.clone(),
            master_entity_type: descriptor.master_entity_type().to_owned(),
            entity_id,
            master_entity_id,
            version: text_field(&data, VERSION_FIELD),
            data,
        })
    }

    /// Entity type name.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Master entity type (this record's own type when it is a master).
    #[must_use]
    pub fn master_entity_type(&self) -> &str {
        &self.master_entity_type
    }

    /// Whether this record is its own master.
    #[must_use]
    pub fn is_master_entity(&self) -> bool {
        self.entity_type == self.master_entity_type
    }

    /// Entity id, absent for unsaved records.
    #[must_use]
    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    /// Master entity id.
    #[must_use]
    pub fn master_entity_id(&self) -> Option<&str> {
        self.master_entity_id.as_deref()
    }

    /// Version token.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Raw payload fields.
    #[must_use]
    pub const fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Read a payload field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// Write a payload field.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.data.insert(field.into(), value);
    }

    /// Textual value of a field; canonical fields resolve through the record metadata.
    #[must_use]
    pub fn field_text(&self, field: &str) -> Option<String> {
        match field {
            ENTITY_ID_FIELD => self.entity_id.clone(),
            MASTER_ENTITY_ID_FIELD => self.master_entity_id.clone(),
            VERSION_FIELD => self.version.clone(),
            _ => self.data.get(field).filter(|v| !v.is_null()).map(value_text),
        }
    }

    /// Set the entity id, writing the canonical field and the declared id property.
    pub fn set_entity_id(&mut self, descriptor: &EntityTypeDescriptor, id: impl Into<String>) {
        let id = id.into();
        self.data
            .insert(ENTITY_ID_FIELD.to_owned(), Value::String(id.clone()));
        if let Some(property) = &descriptor.entity_id_property {
            self.data.insert(property.clone(), Value::String(id.clone()));
        }
        if descriptor.is_master_entity() && self.master_entity_id.is_none() {
            self.master_entity_id = Some(id.clone());
        }
        self.entity_id = Some(id);
    }

    /// Set the master entity id, writing the canonical field and the declared property.
    pub fn set_master_entity_id(
        &mut self,
        descriptor: &EntityTypeDescriptor,
        id: impl Into<String>,
    ) {
        let id = id.into();
        self.data
            .insert(MASTER_ENTITY_ID_FIELD.to_owned(), Value::String(id.clone()));
        if let Some(property) = &descriptor.master_entity_id_property {
            self.data.insert(property.clone(), Value::String(id.clone()));
        }
        self.master_entity_id = Some(id);
    }

    /// Attach a version token.
    pub fn set_version(&mut self, version: impl Into<String>) {
        let version = version.into();
        self.data
            .insert(VERSION_FIELD.to_owned(), Value::String(version.clone()));
        self.version = Some(version);
    }

    /// Encode the full record as a JSON string.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a record previously produced by [`to_json`](Self::to_json).
    ///
    /// # Errors
    /// Returns an error if the text is not a valid encoded record.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

fn text_field(data: &Map<String, Value>, field: &str) -> Option<String> {
    data.get(field)
        .filter(|value| !value.is_null())
        .map(value_text)
        .filter(|text| !text.is_empty())
}
