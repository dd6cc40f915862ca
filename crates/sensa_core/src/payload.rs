use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::{AttributeKind, AttributeName, AttributeValue, EntityRef, SensaError, SensaResult};

pub const INVALID_PAYLOAD_FORMAT: &str = "invalid payload format";

/// A validated ingest payload: identity plus typed attribute readings.
#[derive(Clone, Debug, PartialEq)]
pub struct IngestPayload {
    pub entity: EntityRef,
    pub attributes: BTreeMap<AttributeName, AttributeValue>,
}

impl IngestPayload {
    /// Checks the payload shape and parses every attribute. Shape problems
    /// are reported as `invalid payload format`; identifier and value
    /// problems carry their own message.
    pub fn from_json(payload: &JsonValue) -> SensaResult<Self> {
        let object = payload
            .as_object()
            .ok_or_else(|| SensaError::validation(INVALID_PAYLOAD_FORMAT))?;
        let id = object
            .get("id")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| SensaError::validation(INVALID_PAYLOAD_FORMAT))?;
        let entity_type = object
            .get("type")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| SensaError::validation(INVALID_PAYLOAD_FORMAT))?;
        let entity = EntityRef::new(entity_type, id)?;

        let mut attributes = BTreeMap::new();
        for (key, declared) in object {
            if key == "id" || key == "type" {
                continue;
            }
            let declared = declared
                .as_object()
                .ok_or_else(|| SensaError::validation(INVALID_PAYLOAD_FORMAT))?;
            let tag = declared
                .get("type")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| SensaError::validation(INVALID_PAYLOAD_FORMAT))?;
            let raw = declared
                .get("value")
                .ok_or_else(|| SensaError::validation(INVALID_PAYLOAD_FORMAT))?;
            let kind = AttributeKind::from_tag(tag).ok_or_else(|| {
                SensaError::validation(format!(
                    "{INVALID_PAYLOAD_FORMAT}: attribute '{key}' has unknown type '{tag}'"
                ))
            })?;
            let name = AttributeName::parse(key)?;
            let value = kind.parse_value(raw)?;
            if attributes.insert(name, value).is_some() {
                return Err(SensaError::validation(format!(
                    "attribute '{key}' is declared more than once"
                )));
            }
        }
        Ok(Self { entity, attributes })
    }

    /// Declared kind per attribute, as used to create a type table.
    pub fn schema(&self) -> BTreeMap<AttributeName, AttributeKind> {
        self.attributes
            .iter()
            .map(|(name, value)| (name.clone(), value.kind()))
            .collect()
    }
}

/// Request to append one column to an existing type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaExtension {
    pub field: AttributeName,
    pub kind: AttributeKind,
}

impl SchemaExtension {
    pub fn from_json(payload: &JsonValue) -> SensaResult<Self> {
        let field = payload
            .get("field")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| SensaError::validation(INVALID_PAYLOAD_FORMAT))?;
        let tag = payload
            .get("type")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| SensaError::validation(INVALID_PAYLOAD_FORMAT))?;
        let field = AttributeName::parse(field)?;
        let kind = tag.parse::<AttributeKind>()?;
        Ok(Self { field, kind })
    }
}
