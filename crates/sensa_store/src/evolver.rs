use std::collections::BTreeMap;

use async_trait::async_trait;
use sea_orm::sea_query::{
    Alias, ColumnDef, Expr, Index, IndexCreateStatement, Table, TableCreateStatement,
};
use sea_orm::{DatabaseBackend, DbErr};

use crate::SensaStore;
use crate::config::FAILPOINT_BEFORE_TYPE_TABLE_CREATE;
use crate::db::TypeTableColumns;
use crate::registry::type_table_name;
use crate::store::exec_schema;
use sensa_core::api::SchemaEvolverApi;
use sensa_core::{AttributeKind, AttributeName, SchemaExtension, SensaError, SensaResult, TypeName};

const STRING_COLUMN_LEN: u32 = 255;
const ENTITY_ID_COLUMN_LEN: u32 = 64;

/// Fixed column definition for each declared kind.
fn attribute_column(name: &AttributeName, kind: AttributeKind) -> ColumnDef {
    let mut column = ColumnDef::new(Alias::new(name.as_str()));
    match kind {
        AttributeKind::Str => column.string_len(STRING_COLUMN_LEN),
        AttributeKind::Int => column.big_integer(),
        AttributeKind::Float => column.double(),
        AttributeKind::Datetime => column.date_time(),
    };
    column
}

fn entity_index_name(table: &str) -> String {
    format!("idx_{table}_entity_ts")
}

/// Engines word this differently: "duplicate column name" (SQLite, MySQL)
/// and "column ... already exists" (PostgreSQL).
fn is_duplicate_column(err: &DbErr) -> bool {
    let message = err.to_string().to_ascii_lowercase();
    message.contains("duplicate column") || message.contains("already exists")
}

/// `CREATE TABLE IF NOT EXISTS` for a type table. MySQL has no
/// `CREATE INDEX IF NOT EXISTS`, so its index is declared inline.
fn type_table_statement(
    backend: DatabaseBackend,
    table: &str,
    schema: &BTreeMap<AttributeName, AttributeKind>,
) -> TableCreateStatement {
    let mut create = Table::create();
    create
        .table(Alias::new(table))
        .if_not_exists()
        .col(
            ColumnDef::new(TypeTableColumns::Id)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(TypeTableColumns::EntityId)
                .string_len(ENTITY_ID_COLUMN_LEN)
                .not_null(),
        )
        .col(
            ColumnDef::new(TypeTableColumns::Timestamp)
                .date_time()
                .not_null()
                .default(Expr::current_timestamp()),
        );
    for (name, kind) in schema {
        create.col(attribute_column(name, *kind));
    }
    if backend == DatabaseBackend::MySql {
        create.index(
            Index::create()
                .name(entity_index_name(table))
                .col(TypeTableColumns::EntityId)
                .col(TypeTableColumns::Timestamp),
        );
    }
    create
}

fn entity_index_statement(table: &str) -> IndexCreateStatement {
    Index::create()
        .if_not_exists()
        .name(entity_index_name(table))
        .table(Alias::new(table))
        .col(TypeTableColumns::EntityId)
        .col(TypeTableColumns::Timestamp)
        .to_owned()
}

impl SensaStore {
    async fn create_type_table_inner(
        &self,
        entity_type: &TypeName,
        schema: &BTreeMap<AttributeName, AttributeKind>,
    ) -> SensaResult<String> {
        self.maybe_failpoint(FAILPOINT_BEFORE_TYPE_TABLE_CREATE)?;
        let table = type_table_name(entity_type);
        let create = type_table_statement(self.backend(), &table, schema);

        if let Err(err) = exec_schema(self.connection(), &create).await {
            // PostgreSQL can still report a catalog conflict when two
            // sessions race on CREATE TABLE IF NOT EXISTS.
            if self.fetch_columns(entity_type).await?.is_empty() {
                return Err(SensaError::from(err));
            }
            log::debug!("type table {table} created concurrently: {err}");
        }

        if self.backend() != DatabaseBackend::MySql {
            let index = entity_index_statement(&table);
            // Racing sessions can trip over the same index; lookups still work
            // without it.
            if let Err(err) = exec_schema(self.connection(), &index).await {
                log::warn!("index on {table} not created: {err}");
            }
        }
        log::info!(
            "type table {table} ready with {} attribute column(s)",
            schema.len()
        );
        Ok(table)
    }

    async fn add_column_inner(
        &self,
        entity_type: &TypeName,
        extension: &SchemaExtension,
    ) -> SensaResult<()> {
        let columns = self.fetch_columns(entity_type).await?;
        if columns.is_empty() {
            return Err(SensaError::type_not_found(format!(
                "type {entity_type} does not exist"
            )));
        }
        let field = extension.field.as_str();
        if columns.iter().any(|column| column.name == field) {
            return Err(SensaError::duplicate_field(format!(
                "field {field} already exists on {entity_type}"
            )));
        }
        let table = type_table_name(entity_type);
        let alter = Table::alter()
            .table(Alias::new(&table))
            .add_column(attribute_column(&extension.field, extension.kind))
            .to_owned();
        match exec_schema(self.connection(), &alter).await {
            Ok(()) => {
                log::info!("added column {field} ({}) to {table}", extension.kind);
                Ok(())
            }
            // Lost a race with another extension of the same field.
            Err(err) if is_duplicate_column(&err) => Err(SensaError::duplicate_field(format!(
                "field {field} already exists on {entity_type}"
            ))),
            Err(err) => Err(SensaError::from(err)),
        }
    }
}

#[async_trait]
impl SchemaEvolverApi for SensaStore {
    async fn create_type_table(
        &self,
        entity_type: &TypeName,
        schema: &BTreeMap<AttributeName, AttributeKind>,
    ) -> SensaResult<String> {
        self.bounded(
            "create_type_table",
            self.create_type_table_inner(entity_type, schema),
        )
        .await
    }

    async fn add_column(
        &self,
        entity_type: &TypeName,
        extension: &SchemaExtension,
    ) -> SensaResult<()> {
        self.bounded("add_column", self.add_column_inner(entity_type, extension))
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{entity_index_name, entity_index_statement, type_table_statement};
    use sea_orm::DatabaseBackend;
    use sensa_core::{AttributeKind, AttributeName, MAX_TYPE_NAME_LEN};

    fn gauge_schema() -> BTreeMap<AttributeName, AttributeKind> {
        let mut schema = BTreeMap::new();
        for (name, kind) in [
            ("label", AttributeKind::Str),
            ("count", AttributeKind::Int),
            ("reading", AttributeKind::Float),
            ("seen_at", AttributeKind::Datetime),
        ] {
            schema.insert(AttributeName::parse(name).expect("name"), kind);
        }
        schema
    }

    fn render(backend: DatabaseBackend) -> String {
        backend
            .build(&type_table_statement(backend, "ts_gauge", &gauge_schema()))
            .sql
    }

    #[test]
    fn mysql_columns_and_inline_index() {
        let sql = render(DatabaseBackend::MySql);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS `ts_gauge`"), "{sql}");
        assert!(sql.contains("`label` varchar(255)"), "{sql}");
        assert!(sql.contains("`count` bigint"), "{sql}");
        assert!(sql.contains("`reading` double"), "{sql}");
        assert!(sql.contains("`seen_at` datetime"), "{sql}");
        assert!(sql.contains("`idx_ts_gauge_entity_ts`"), "{sql}");
    }

    #[test]
    fn postgres_columns_without_inline_index() {
        let sql = render(DatabaseBackend::Postgres);
        assert!(sql.starts_with(r#"CREATE TABLE IF NOT EXISTS "ts_gauge""#), "{sql}");
        assert!(sql.contains(r#""label" varchar(255)"#), "{sql}");
        assert!(sql.contains(r#""count" bigint"#), "{sql}");
        assert!(sql.contains(r#""reading" double precision"#), "{sql}");
        assert!(sql.contains(r#""seen_at" timestamp"#), "{sql}");
        assert!(!sql.contains("idx_ts_gauge_entity_ts"), "{sql}");
    }

    #[test]
    fn sqlite_columns_map_back_to_kinds() {
        let sql = render(DatabaseBackend::Sqlite);
        assert!(sql.contains(r#""label" varchar(255)"#), "{sql}");
        assert!(sql.contains(r#""count" integer"#), "{sql}");
        assert!(sql.contains(r#""reading" double"#), "{sql}");
        assert!(sql.contains(r#""seen_at" datetime_text"#), "{sql}");
        assert!(!sql.contains("idx_ts_gauge_entity_ts"), "{sql}");
        for (declared, kind) in [
            ("varchar(255)", AttributeKind::Str),
            ("integer", AttributeKind::Int),
            ("double", AttributeKind::Float),
            ("datetime_text", AttributeKind::Datetime),
        ] {
            assert_eq!(AttributeKind::from_sql_type(declared), Some(kind));
        }
    }

    #[test]
    fn separate_index_is_conditional() {
        for backend in [DatabaseBackend::Postgres, DatabaseBackend::Sqlite] {
            let sql = backend.build(&entity_index_statement("ts_gauge")).sql;
            assert!(sql.starts_with("CREATE INDEX IF NOT EXISTS"), "{sql}");
            assert!(sql.contains("idx_ts_gauge_entity_ts"), "{sql}");
        }
    }

    #[test]
    fn index_names_fit_engine_identifier_limits() {
        let table = format!("ts_{}", "a".repeat(MAX_TYPE_NAME_LEN));
        assert!(entity_index_name(&table).len() <= 63);
    }
}
