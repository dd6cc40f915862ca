//! Ingest pipeline and entity query flow.
//!
//! A payload moves through `Validating -> Resolving -> [Evolving] -> Writing ->
//! Committed`. Validation failures never touch storage. Writing is two
//! phases: the history row first, then the snapshot. A snapshot failure after
//! a successful history write is reported as a partial write so operators can
//! reconcile.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::SensaStore;
use crate::config::FAILPOINT_AFTER_OBSERVATION_APPEND;
use sensa_core::api::{
    EntityQueryResult, EntityStoreApi, IngestApi, IngestOutcome, SchemaEvolverApi, TimeSeriesApi,
    TypeRegistryApi,
};
use sensa_core::{
    AttributeValue, EntityRef, IngestPayload, SchemaExtension, SensaError, SensaResult, TypeName,
    observation_now,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestStage {
    Validating,
    Resolving,
    Evolving,
    Writing,
    Committed,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestStage::Validating => "validating",
            IngestStage::Resolving => "resolving",
            IngestStage::Evolving => "evolving",
            IngestStage::Writing => "writing",
            IngestStage::Committed => "committed",
        };
        f.write_str(name)
    }
}

impl SensaStore {
    fn check_limits(&self, payload: &IngestPayload) -> SensaResult<()> {
        let limits = self.limits();
        if payload.attributes.len() > limits.max_attributes {
            return Err(SensaError::validation(format!(
                "payload has {} attributes; limit is {}",
                payload.attributes.len(),
                limits.max_attributes
            )));
        }
        for (name, value) in &payload.attributes {
            if let AttributeValue::Str(text) = value
                && text.len() > limits.max_string_bytes
            {
                return Err(SensaError::validation(format!(
                    "attribute {name} exceeds {} bytes",
                    limits.max_string_bytes
                )));
            }
        }
        Ok(())
    }

    async fn resolve_schema(&self, payload: &IngestPayload) -> SensaResult<()> {
        let entity_type = &payload.entity.entity_type;
        if self.type_exists(entity_type).await? {
            stage(&payload.entity, IngestStage::Resolving);
        } else {
            stage(&payload.entity, IngestStage::Evolving);
            self.create_type_table(entity_type, &payload.schema())
                .await?;
        }
        if !self.matches_schema(entity_type, payload).await? {
            let columns = self
                .bounded("describe", self.fetch_columns(entity_type))
                .await?;
            let unknown = Self::unknown_attributes(&columns, payload);
            return Err(SensaError::schema_mismatch(format!(
                "entity does not match the schema of {entity_type}: unknown attribute(s) {}",
                unknown.join(", ")
            )));
        }
        Ok(())
    }
}

fn stage(entity: &EntityRef, stage: IngestStage) {
    log::debug!("ingest {entity}: {stage}");
}

#[async_trait]
impl IngestApi for SensaStore {
    async fn ingest(&self, payload: &JsonValue) -> SensaResult<IngestOutcome> {
        let payload = IngestPayload::from_json(payload)?;
        stage(&payload.entity, IngestStage::Validating);
        self.check_limits(&payload)?;

        self.resolve_schema(&payload).await?;

        stage(&payload.entity, IngestStage::Writing);
        let timestamp = observation_now();
        self.append_observation(&payload.entity, &payload.attributes, timestamp)
            .await?;
        let snapshot = match self.maybe_failpoint(FAILPOINT_AFTER_OBSERVATION_APPEND) {
            Ok(()) => {
                self.upsert_snapshot(&payload.entity, &payload.attributes, timestamp)
                    .await
            }
            Err(err) => Err(err),
        };
        let outcome = snapshot.map_err(|err| {
            log::warn!(
                "ingest {}: history written but snapshot failed: {err}",
                payload.entity
            );
            SensaError::partial_write("snapshot", err.to_string())
        })?;

        stage(&payload.entity, IngestStage::Committed);
        Ok(outcome)
    }

    async fn extend_type(&self, entity_type: &str, request: &JsonValue) -> SensaResult<()> {
        let entity_type = TypeName::parse(entity_type)?;
        let extension = SchemaExtension::from_json(request)?;
        self.add_column(&entity_type, &extension).await
    }

    async fn query_entity(
        &self,
        qualified_id: &str,
        count: Option<u32>,
    ) -> SensaResult<EntityQueryResult> {
        let entity = EntityRef::parse_qualified(qualified_id)?;
        let snapshot = self
            .get_snapshot(&entity)
            .await?
            .ok_or_else(|| SensaError::not_found(format!("entity {entity} not found")))?;
        match count {
            None => Ok(EntityQueryResult::Snapshot(snapshot)),
            Some(count) => Ok(EntityQueryResult::History(
                self.query_recent(&entity, Some(count)).await?,
            )),
        }
    }
}
