use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sea_orm::DatabaseBackend;
use sea_orm::sea_query::{Expr, ExprTrait, InsertStatement, OnConflict, Query, UpdateStatement};

use crate::SensaStore;
use crate::db::SensaEntities;
use crate::store::{col_name, exec, query_one};
use sensa_core::api::{Entity, EntityStoreApi, IngestOutcome};
use sensa_core::{AttributeName, AttributeValue, EntityRef, SensaError, SensaResult};

fn encode_snapshot(attributes: &BTreeMap<AttributeName, AttributeValue>) -> SensaResult<String> {
    let snapshot: BTreeMap<&str, &AttributeValue> = attributes
        .iter()
        .map(|(name, value)| (name.as_str(), value))
        .collect();
    serde_json::to_string(&snapshot)
        .map_err(|err| SensaError::storage(format!("encode snapshot: {err}")))
}

/// First write of a summary row. On a key conflict PostgreSQL and SQLite do
/// nothing, leaving the update to [`snapshot_update`]. MySQL has no
/// conflict-free insert, so it updates in place and bumps the revision; the
/// affected-row count is then 1 for an insert and 2 for an update.
fn snapshot_insert(
    backend: DatabaseBackend,
    entity: &EntityRef,
    snapshot: &str,
    updated_at: NaiveDateTime,
) -> SensaResult<InsertStatement> {
    let mut insert = Query::insert();
    insert
        .into_table(SensaEntities::Table)
        .columns([
            SensaEntities::EntityType,
            SensaEntities::EntityId,
            SensaEntities::LastUpdate,
            SensaEntities::Revision,
            SensaEntities::Snapshot,
        ])
        .values([
            entity.entity_type.as_str().into(),
            entity.id.as_str().into(),
            updated_at.into(),
            1i64.into(),
            snapshot.into(),
        ])
        .map_err(|err| SensaError::storage(err.to_string()))?;
    let key = [SensaEntities::EntityType, SensaEntities::EntityId];
    let on_conflict = if backend == DatabaseBackend::MySql {
        OnConflict::columns(key)
            .update_columns([SensaEntities::LastUpdate, SensaEntities::Snapshot])
            .value(
                SensaEntities::Revision,
                Expr::col((SensaEntities::Table, SensaEntities::Revision)).add(1),
            )
            .to_owned()
    } else {
        OnConflict::columns(key).do_nothing().to_owned()
    };
    insert.on_conflict(on_conflict);
    Ok(insert)
}

fn snapshot_update(entity: &EntityRef, snapshot: &str, updated_at: NaiveDateTime) -> UpdateStatement {
    Query::update()
        .table(SensaEntities::Table)
        .value(SensaEntities::LastUpdate, updated_at)
        .value(SensaEntities::Snapshot, snapshot)
        .value(
            SensaEntities::Revision,
            Expr::col(SensaEntities::Revision).add(1),
        )
        .and_where(Expr::col(SensaEntities::EntityType).eq(entity.entity_type.as_str()))
        .and_where(Expr::col(SensaEntities::EntityId).eq(entity.id.as_str()))
        .to_owned()
}

impl SensaStore {
    /// The create-or-update decision is made by the engine in one statement,
    /// so concurrent first ingests of an entity produce one `Created`.
    async fn upsert_snapshot_inner(
        &self,
        entity: &EntityRef,
        attributes: &BTreeMap<AttributeName, AttributeValue>,
        updated_at: NaiveDateTime,
    ) -> SensaResult<IngestOutcome> {
        let snapshot = encode_snapshot(attributes)?;
        let insert = snapshot_insert(self.backend(), entity, &snapshot, updated_at)?;
        let affected = exec(self.connection(), &insert).await?;
        if self.backend() == DatabaseBackend::MySql {
            return Ok(if affected == 1 {
                IngestOutcome::Created
            } else {
                IngestOutcome::Updated
            });
        }
        if affected > 0 {
            return Ok(IngestOutcome::Created);
        }
        exec(
            self.connection(),
            &snapshot_update(entity, &snapshot, updated_at),
        )
        .await?;
        Ok(IngestOutcome::Updated)
    }

    async fn get_snapshot_inner(&self, entity: &EntityRef) -> SensaResult<Option<Entity>> {
        let select = Query::select()
            .from(SensaEntities::Table)
            .columns([
                SensaEntities::EntityType,
                SensaEntities::EntityId,
                SensaEntities::LastUpdate,
                SensaEntities::Revision,
                SensaEntities::Snapshot,
            ])
            .and_where(Expr::col(SensaEntities::EntityType).eq(entity.entity_type.as_str()))
            .and_where(Expr::col(SensaEntities::EntityId).eq(entity.id.as_str()))
            .limit(1)
            .to_owned();
        let Some(row) = query_one(self.connection(), &select).await? else {
            return Ok(None);
        };
        let entity_type: String = row.try_get("", &col_name(SensaEntities::EntityType))?;
        let id: String = row.try_get("", &col_name(SensaEntities::EntityId))?;
        let last_update: NaiveDateTime = row.try_get("", &col_name(SensaEntities::LastUpdate))?;
        let revision: i64 = row.try_get("", &col_name(SensaEntities::Revision))?;
        let raw: String = row.try_get("", &col_name(SensaEntities::Snapshot))?;
        let snapshot = serde_json::from_str(&raw)
            .map_err(|err| SensaError::storage(format!("decode snapshot for {entity}: {err}")))?;
        Ok(Some(Entity {
            id,
            entity_type,
            last_update,
            revision,
            snapshot,
        }))
    }
}

#[async_trait]
impl EntityStoreApi for SensaStore {
    async fn upsert_snapshot(
        &self,
        entity: &EntityRef,
        attributes: &BTreeMap<AttributeName, AttributeValue>,
        updated_at: NaiveDateTime,
    ) -> SensaResult<IngestOutcome> {
        self.bounded(
            "upsert_snapshot",
            self.upsert_snapshot_inner(entity, attributes, updated_at),
        )
        .await
    }

    async fn get_snapshot(&self, entity: &EntityRef) -> SensaResult<Option<Entity>> {
        self.bounded("get_snapshot", self.get_snapshot_inner(entity))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::{encode_snapshot, snapshot_insert, snapshot_update};
    use sea_orm::DatabaseBackend;
    use sea_orm::sea_query::{
        MysqlQueryBuilder, PostgresQueryBuilder, QueryStatementWriter, SqliteQueryBuilder,
    };
    use sensa_core::{AttributeName, AttributeValue, EntityRef, parse_datetime};
    use std::collections::BTreeMap;

    fn weather() -> EntityRef {
        EntityRef::new("weather", "01").expect("entity")
    }

    #[test]
    fn snapshot_encodes_tagged_values_by_name() {
        let mut attributes = BTreeMap::new();
        attributes.insert(
            AttributeName::parse("temperature").expect("name"),
            AttributeValue::Float(15.0),
        );
        attributes.insert(
            AttributeName::parse("label").expect("name"),
            AttributeValue::Str("north bed".to_string()),
        );
        let encoded = encode_snapshot(&attributes).expect("encode");
        assert_eq!(
            encoded,
            r#"{"label":{"type":"str","value":"north bed"},"temperature":{"type":"float","value":15.0}}"#
        );
    }

    #[test]
    fn mysql_insert_updates_in_place_on_duplicate_key() {
        let at = parse_datetime("2024-05-01 10:00:00").expect("time");
        let insert = snapshot_insert(DatabaseBackend::MySql, &weather(), "{}", at).expect("insert");
        let sql = insert.to_string(MysqlQueryBuilder);
        assert!(sql.contains("ON DUPLICATE KEY UPDATE"), "{sql}");
        assert!(!sql.contains("IGNORE"), "{sql}");
        assert!(sql.contains("VALUES(`snapshot`)"), "{sql}");
        assert!(sql.contains("`sensa_entities`.`revision` + 1"), "{sql}");
    }

    #[test]
    fn other_backends_insert_or_do_nothing() {
        let at = parse_datetime("2024-05-01 10:00:00").expect("time");
        let sql = snapshot_insert(DatabaseBackend::Postgres, &weather(), "{}", at)
            .expect("insert")
            .to_string(PostgresQueryBuilder);
        assert!(
            sql.contains(r#"ON CONFLICT ("entity_type", "entity_id") DO NOTHING"#),
            "{sql}"
        );
        let sql = snapshot_insert(DatabaseBackend::Sqlite, &weather(), "{}", at)
            .expect("insert")
            .to_string(SqliteQueryBuilder);
        assert!(
            sql.contains(r#"ON CONFLICT ("entity_type", "entity_id") DO NOTHING"#),
            "{sql}"
        );
    }

    #[test]
    fn update_bumps_revision_for_one_entity() {
        let at = parse_datetime("2024-05-01 10:00:00").expect("time");
        let sql = snapshot_update(&weather(), "{}", at).to_string(SqliteQueryBuilder);
        assert!(sql.contains(r#""revision" = "revision" + 1"#), "{sql}");
        assert!(sql.contains(r#""entity_type" = 'weather'"#), "{sql}");
        assert!(sql.contains(r#""entity_id" = '01'"#), "{sql}");
    }
}
