use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sea_orm::QueryResult;
use sea_orm::sea_query::{Alias, Expr, ExprTrait, Order, Query, Value as SeaValue};

use crate::SensaStore;
use crate::db::TypeTableColumns;
use crate::registry::type_table_name;
use crate::store::{col_name, exec, query_all};
use sensa_core::api::{ColumnInfo, Observation, TimeSeriesApi};
use sensa_core::{
    AttributeKind, AttributeName, AttributeValue, EntityRef, SensaError, SensaResult, is_reserved,
};

fn read_attribute(
    row: &QueryResult,
    column: &str,
    kind: AttributeKind,
) -> SensaResult<Option<AttributeValue>> {
    Ok(match kind {
        AttributeKind::Str => row
            .try_get::<Option<String>>("", column)?
            .map(AttributeValue::Str),
        AttributeKind::Int => row
            .try_get::<Option<i64>>("", column)?
            .map(AttributeValue::Int),
        AttributeKind::Float => row
            .try_get::<Option<f64>>("", column)?
            .map(AttributeValue::Float),
        AttributeKind::Datetime => row
            .try_get::<Option<NaiveDateTime>>("", column)?
            .map(AttributeValue::Datetime),
    })
}

impl SensaStore {
    /// Every attribute must name an existing column. Kind disagreements are
    /// handled according to the validation mode.
    pub(crate) fn check_columns(
        &self,
        entity: &EntityRef,
        columns: &[ColumnInfo],
        attributes: &BTreeMap<AttributeName, AttributeValue>,
    ) -> SensaResult<()> {
        for (name, value) in attributes {
            let Some(column) = columns.iter().find(|column| column.name == name.as_str()) else {
                return Err(SensaError::schema_mismatch(format!(
                    "attribute {name} is not a column of type {}",
                    entity.entity_type
                )));
            };
            if let Some(kind) = column.kind
                && kind != value.kind()
            {
                self.validation_failure(SensaError::schema_mismatch(format!(
                    "attribute {name} is declared {kind} but {} was sent",
                    value.kind()
                )))?;
            }
        }
        Ok(())
    }

    async fn append_observation_inner(
        &self,
        entity: &EntityRef,
        attributes: &BTreeMap<AttributeName, AttributeValue>,
        timestamp: NaiveDateTime,
    ) -> SensaResult<()> {
        let columns = self.fetch_columns(&entity.entity_type).await?;
        if columns.is_empty() {
            return Err(SensaError::type_not_found(format!(
                "type {} does not exist",
                entity.entity_type
            )));
        }
        self.check_columns(entity, &columns, attributes)?;

        let mut names = vec![
            Alias::new(col_name(TypeTableColumns::EntityId)),
            Alias::new(col_name(TypeTableColumns::Timestamp)),
        ];
        let mut values: Vec<SeaValue> = vec![entity.id.as_str().into(), timestamp.into()];
        for (name, value) in attributes {
            names.push(Alias::new(name.as_str()));
            values.push(match value {
                AttributeValue::Str(value) => value.as_str().into(),
                AttributeValue::Int(value) => (*value).into(),
                AttributeValue::Float(value) => (*value).into(),
                AttributeValue::Datetime(value) => (*value).into(),
            });
        }
        let mut insert = Query::insert();
        insert
            .into_table(Alias::new(type_table_name(&entity.entity_type)))
            .columns(names)
            .values(values.into_iter().map(Expr::val))
            .map_err(|err| SensaError::storage(err.to_string()))?;
        exec(self.connection(), &insert).await?;
        Ok(())
    }

    async fn query_recent_inner(
        &self,
        entity: &EntityRef,
        limit: Option<u32>,
    ) -> SensaResult<Vec<Observation>> {
        // `ExprTrait` also provides `min`, so the `Ord` call is spelled out.
        let limit = Ord::min(
            limit.filter(|limit| *limit > 0).unwrap_or(1),
            self.limits().max_history_rows,
        );
        let columns = self.fetch_columns(&entity.entity_type).await?;
        if columns.is_empty() {
            return Err(SensaError::type_not_found(format!(
                "no data for the type {}",
                entity.entity_type
            )));
        }
        let attributes: Vec<(&str, AttributeKind)> = columns
            .iter()
            .filter(|column| !is_reserved(&column.name))
            .filter_map(|column| match column.kind {
                Some(kind) => Some((column.name.as_str(), kind)),
                None => {
                    log::debug!(
                        "skipping column {} of unrecognized type {}",
                        column.name,
                        column.sql_type
                    );
                    None
                }
            })
            .collect();

        let mut select = Query::select();
        select
            .from(Alias::new(type_table_name(&entity.entity_type)))
            .columns([
                TypeTableColumns::Id,
                TypeTableColumns::EntityId,
                TypeTableColumns::Timestamp,
            ])
            .columns(attributes.iter().map(|(name, _)| Alias::new(*name)))
            .and_where(Expr::col(TypeTableColumns::EntityId).eq(entity.id.as_str()))
            .order_by(TypeTableColumns::Timestamp, Order::Desc)
            .order_by(TypeTableColumns::Id, Order::Desc)
            .limit(u64::from(limit));
        let rows = query_all(self.connection(), &select).await?;

        let mut observations = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = BTreeMap::new();
            for (name, kind) in &attributes {
                values.insert((*name).to_string(), read_attribute(&row, name, *kind)?);
            }
            observations.push(Observation {
                row_id: row.try_get("", &col_name(TypeTableColumns::Id))?,
                entity_id: row.try_get("", &col_name(TypeTableColumns::EntityId))?,
                timestamp: row.try_get("", &col_name(TypeTableColumns::Timestamp))?,
                attributes: values,
            });
        }
        Ok(observations)
    }
}

#[async_trait]
impl TimeSeriesApi for SensaStore {
    async fn append_observation(
        &self,
        entity: &EntityRef,
        attributes: &BTreeMap<AttributeName, AttributeValue>,
        timestamp: NaiveDateTime,
    ) -> SensaResult<()> {
        self.bounded(
            "append_observation",
            self.append_observation_inner(entity, attributes, timestamp),
        )
        .await
    }

    async fn query_recent(
        &self,
        entity: &EntityRef,
        limit: Option<u32>,
    ) -> SensaResult<Vec<Observation>> {
        self.bounded("query_recent", self.query_recent_inner(entity, limit))
            .await
    }
}
