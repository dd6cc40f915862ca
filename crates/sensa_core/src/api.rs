use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::{
    AttributeKind, AttributeName, AttributeValue, EntityRef, IngestPayload, SchemaExtension,
    SensaResult, TypeName,
};

/// One column of a type table as reported by the engine catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub sql_type: String,
    /// `None` for implicit columns whose kind is not an attribute kind.
    pub kind: Option<AttributeKind>,
}

/// Summary row: one per `(type, id)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub last_update: NaiveDateTime,
    /// Number of snapshot writes; 1 right after creation.
    pub revision: i64,
    pub snapshot: BTreeMap<String, AttributeValue>,
}

/// One history row. Attributes not populated by the ingest are `None`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub row_id: i64,
    pub entity_id: String,
    pub timestamp: NaiveDateTime,
    pub attributes: BTreeMap<String, Option<AttributeValue>>,
}

impl Observation {
    /// Flat attribute map in the shape returned to callers.
    pub fn to_json(&self) -> JsonValue {
        let mut out = JsonMap::new();
        out.insert("entity_id".to_string(), self.entity_id.clone().into());
        out.insert(
            "timestamp".to_string(),
            self.timestamp
                .format(crate::time::DATETIME_FORMAT)
                .to_string()
                .into(),
        );
        for (name, value) in &self.attributes {
            let json = value
                .as_ref()
                .map(AttributeValue::to_json)
                .unwrap_or(JsonValue::Null);
            out.insert(name.clone(), json);
        }
        JsonValue::Object(out)
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name).and_then(Option::as_ref)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestOutcome {
    Created,
    Updated,
}

impl IngestOutcome {
    pub fn to_body(self) -> JsonValue {
        match self {
            IngestOutcome::Created => serde_json::json!({"success": "created entity"}),
            IngestOutcome::Updated => serde_json::json!({"success": "updated entity"}),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityQueryResult {
    Snapshot(Entity),
    History(Vec<Observation>),
}

#[async_trait]
pub trait TypeRegistryApi {
    async fn type_exists(&self, entity_type: &TypeName) -> SensaResult<bool>;
    async fn describe(&self, entity_type: &TypeName) -> SensaResult<Vec<ColumnInfo>>;
    async fn matches_schema(
        &self,
        entity_type: &TypeName,
        payload: &IngestPayload,
    ) -> SensaResult<bool>;
    async fn list_types(&self) -> SensaResult<Vec<TypeName>>;
}

#[async_trait]
pub trait SchemaEvolverApi {
    /// Returns the physical table name.
    async fn create_type_table(
        &self,
        entity_type: &TypeName,
        schema: &BTreeMap<AttributeName, AttributeKind>,
    ) -> SensaResult<String>;
    async fn add_column(
        &self,
        entity_type: &TypeName,
        extension: &SchemaExtension,
    ) -> SensaResult<()>;
}

#[async_trait]
pub trait EntityStoreApi {
    async fn upsert_snapshot(
        &self,
        entity: &EntityRef,
        attributes: &BTreeMap<AttributeName, AttributeValue>,
        updated_at: NaiveDateTime,
    ) -> SensaResult<IngestOutcome>;
    async fn get_snapshot(&self, entity: &EntityRef) -> SensaResult<Option<Entity>>;
}

#[async_trait]
pub trait TimeSeriesApi {
    async fn append_observation(
        &self,
        entity: &EntityRef,
        attributes: &BTreeMap<AttributeName, AttributeValue>,
        timestamp: NaiveDateTime,
    ) -> SensaResult<()>;
    async fn query_recent(
        &self,
        entity: &EntityRef,
        limit: Option<u32>,
    ) -> SensaResult<Vec<Observation>>;
}

#[async_trait]
pub trait IngestApi {
    async fn ingest(&self, payload: &JsonValue) -> SensaResult<IngestOutcome>;
    async fn extend_type(&self, entity_type: &str, request: &JsonValue) -> SensaResult<()>;
    async fn query_entity(
        &self,
        qualified_id: &str,
        count: Option<u32>,
    ) -> SensaResult<EntityQueryResult>;
}
