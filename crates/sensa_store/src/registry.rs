use async_trait::async_trait;
use sea_orm::sea_query::Value as SeaValue;
use sea_orm::{ConnectionTrait, DatabaseBackend, QueryResult, Statement};

use crate::SensaStore;
use crate::db::TYPE_TABLE_PREFIX;
use sensa_core::api::{ColumnInfo, TypeRegistryApi};
use sensa_core::{AttributeKind, IngestPayload, SensaError, SensaResult, TypeName, is_reserved};

pub fn type_table_name(entity_type: &TypeName) -> String {
    format!("{TYPE_TABLE_PREFIX}{entity_type}")
}

fn columns_statement(backend: DatabaseBackend, table: &str) -> Statement {
    let sql = match backend {
        DatabaseBackend::Postgres => {
            "SELECT column_name::text AS column_name, data_type::text AS column_type \
             FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY ordinal_position"
        }
        DatabaseBackend::MySql => {
            "SELECT COLUMN_NAME AS column_name, COLUMN_TYPE AS column_type \
             FROM information_schema.columns \
             WHERE table_schema = DATABASE() AND table_name = ? \
             ORDER BY ordinal_position"
        }
        _ => "SELECT name AS column_name, type AS column_type FROM pragma_table_info(?) ORDER BY cid",
    };
    Statement::from_sql_and_values(backend, sql, [SeaValue::from(table)])
}

fn tables_statement(backend: DatabaseBackend) -> Statement {
    let sql = match backend {
        DatabaseBackend::Postgres => {
            "SELECT table_name::text AS table_name FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name LIKE 'ts!_%' ESCAPE '!' \
             ORDER BY table_name"
        }
        DatabaseBackend::MySql => {
            "SELECT TABLE_NAME AS table_name FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_name LIKE 'ts!_%' ESCAPE '!' \
             ORDER BY table_name"
        }
        _ => {
            "SELECT name AS table_name FROM sqlite_master \
             WHERE type = 'table' AND name LIKE 'ts!_%' ESCAPE '!' ORDER BY name"
        }
    };
    Statement::from_string(backend, sql)
}

impl SensaStore {
    /// Reads the live column set of a type table. Empty when the table is absent.
    pub(crate) async fn fetch_columns(&self, entity_type: &TypeName) -> SensaResult<Vec<ColumnInfo>> {
        let table = type_table_name(entity_type);
        let rows = self
            .connection()
            .query_all_raw(columns_statement(self.backend(), &table))
            .await?;
        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("", "column_name")?;
            let sql_type: String = row.try_get("", "column_type")?;
            let kind = if is_reserved(&name) {
                None
            } else {
                AttributeKind::from_sql_type(&sql_type)
            };
            columns.push(ColumnInfo {
                name,
                sql_type,
                kind,
            });
        }
        Ok(columns)
    }

    async fn fetch_type_tables(&self) -> SensaResult<Vec<QueryResult>> {
        let rows = self
            .connection()
            .query_all_raw(tables_statement(self.backend()))
            .await?;
        Ok(rows)
    }

    /// Payload attributes that have no column in the current schema.
    pub(crate) fn unknown_attributes(
        columns: &[ColumnInfo],
        payload: &IngestPayload,
    ) -> Vec<String> {
        payload
            .attributes
            .keys()
            .filter(|name| !columns.iter().any(|column| column.name == name.as_str()))
            .map(|name| name.to_string())
            .collect()
    }
}

#[async_trait]
impl TypeRegistryApi for SensaStore {
    async fn type_exists(&self, entity_type: &TypeName) -> SensaResult<bool> {
        let columns = self
            .bounded("type_exists", self.fetch_columns(entity_type))
            .await?;
        Ok(!columns.is_empty())
    }

    async fn describe(&self, entity_type: &TypeName) -> SensaResult<Vec<ColumnInfo>> {
        let columns = self
            .bounded("describe", self.fetch_columns(entity_type))
            .await?;
        if columns.is_empty() {
            return Err(SensaError::not_found(format!(
                "type {entity_type} has no table"
            )));
        }
        Ok(columns)
    }

    async fn matches_schema(
        &self,
        entity_type: &TypeName,
        payload: &IngestPayload,
    ) -> SensaResult<bool> {
        let columns = self
            .bounded("matches_schema", self.fetch_columns(entity_type))
            .await?;
        if columns.is_empty() {
            return Ok(false);
        }
        Ok(Self::unknown_attributes(&columns, payload).is_empty())
    }

    async fn list_types(&self) -> SensaResult<Vec<TypeName>> {
        let rows = self
            .bounded("list_types", self.fetch_type_tables())
            .await?;
        let mut types = Vec::with_capacity(rows.len());
        for row in rows {
            let table: String = row.try_get("", "table_name")?;
            let Some(raw) = table.strip_prefix(TYPE_TABLE_PREFIX) else {
                continue;
            };
            match TypeName::parse(raw) {
                Ok(name) if name.as_str() == raw => types.push(name),
                _ => log::debug!("skipping foreign table {table}"),
            }
        }
        Ok(types)
    }
}

#[cfg(test)]
mod tests {
    use super::{columns_statement, tables_statement, type_table_name};
    use sea_orm::DatabaseBackend;
    use sea_orm::sea_query::Value as SeaValue;
    use sensa_core::TypeName;

    #[test]
    fn table_names_carry_prefix() {
        let name = TypeName::parse("SoilSensor").expect("type");
        assert_eq!(type_table_name(&name), "ts_soilsensor");
    }

    #[test]
    fn column_lookup_binds_the_table_name() {
        for backend in [
            DatabaseBackend::Sqlite,
            DatabaseBackend::Postgres,
            DatabaseBackend::MySql,
        ] {
            let statement = columns_statement(backend, "ts_weather");
            let values = statement.values.expect("bound values").0;
            assert_eq!(values, vec![SeaValue::from("ts_weather")]);
            assert!(!statement.sql.contains("ts_weather"), "{}", statement.sql);
        }
    }

    #[test]
    fn column_lookup_reads_each_catalog() {
        let sql = columns_statement(DatabaseBackend::Sqlite, "ts_weather").sql;
        assert!(sql.contains("pragma_table_info(?)"), "{sql}");
        assert!(sql.contains("ORDER BY cid"), "{sql}");

        let sql = columns_statement(DatabaseBackend::Postgres, "ts_weather").sql;
        assert!(sql.contains("information_schema.columns"), "{sql}");
        assert!(sql.contains("current_schema()"), "{sql}");
        assert!(sql.contains("table_name = $1"), "{sql}");

        let sql = columns_statement(DatabaseBackend::MySql, "ts_weather").sql;
        assert!(sql.contains("information_schema.columns"), "{sql}");
        assert!(sql.contains("DATABASE()"), "{sql}");
        assert!(sql.contains("table_name = ?"), "{sql}");
    }

    #[test]
    fn table_listing_escapes_the_prefix_wildcard() {
        for backend in [
            DatabaseBackend::Sqlite,
            DatabaseBackend::Postgres,
            DatabaseBackend::MySql,
        ] {
            let sql = tables_statement(backend).sql;
            assert!(sql.contains("LIKE 'ts!_%' ESCAPE '!'"), "{sql}");
        }
    }
}
