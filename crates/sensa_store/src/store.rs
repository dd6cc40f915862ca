use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sea_orm::sea_query::{
    MysqlQueryBuilder, PostgresQueryBuilder, QueryStatementWriter, SqliteQueryBuilder,
};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr,
    QueryResult, Statement, StatementBuilder,
};
use sea_orm_migration::MigratorTrait;
use tokio::time::timeout;

use crate::config::{
    DEFAULT_MAX_ATTRIBUTES, DEFAULT_MAX_HISTORY_ROWS, DEFAULT_MAX_STRING_BYTES,
    DEFAULT_STATEMENT_TIMEOUT_MS,
};
use crate::migration::Migrator;
use crate::{SensaConfig, ValidationMode};
use sensa_core::{SensaError, SensaResult};

/// Handle over the relational engine. Cloning is cheap and shares the pool.
#[derive(Clone, Debug)]
pub struct SensaStore {
    conn: DatabaseConnection,
    backend: DatabaseBackend,
    limits: SensaLimits,
    validation_mode: ValidationMode,
    statement_timeout: Duration,
    failpoints: Arc<HashSet<String>>,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct SensaLimits {
    pub(crate) max_attributes: usize,
    pub(crate) max_string_bytes: usize,
    pub(crate) max_history_rows: u32,
}

impl SensaLimits {
    fn from_config(config: &SensaConfig) -> Self {
        let limits = config.limits.as_ref();
        Self {
            max_attributes: limits
                .and_then(|limits| limits.max_attributes)
                .unwrap_or(DEFAULT_MAX_ATTRIBUTES),
            max_string_bytes: limits
                .and_then(|limits| limits.max_string_bytes)
                .unwrap_or(DEFAULT_MAX_STRING_BYTES),
            max_history_rows: limits
                .and_then(|limits| limits.max_history_rows)
                .unwrap_or(DEFAULT_MAX_HISTORY_ROWS),
        }
    }
}

impl SensaStore {
    pub async fn connect(config: &SensaConfig, base_dir: &Path) -> SensaResult<Self> {
        config.validate()?;
        let url = build_connection_url(config, base_dir)?;
        let mut options = ConnectOptions::new(url);
        options.sqlx_logging_level(log::LevelFilter::Debug);
        if let Some(pool) = &config.pool {
            if let Some(max) = pool.max_connections {
                options.max_connections(max);
            }
            if let Some(min) = pool.min_connections {
                options.min_connections(min);
            }
            if let Some(timeout_ms) = pool.connect_timeout_ms {
                options.connect_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.acquire_timeout_ms {
                options.acquire_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.idle_timeout_ms {
                options.idle_timeout(Duration::from_millis(timeout_ms));
            }
        }
        let conn = Database::connect(options)
            .await
            .map_err(|err| SensaError::unavailable(format!("connect: {err}")))?;
        let backend = conn.get_database_backend();
        let statement_timeout = Duration::from_millis(
            config
                .statement_timeout_ms
                .unwrap_or(DEFAULT_STATEMENT_TIMEOUT_MS),
        );
        let failpoints = config
            .failpoints
            .clone()
            .unwrap_or_default()
            .into_iter()
            .collect::<HashSet<_>>();
        let store = Self {
            conn,
            backend,
            limits: SensaLimits::from_config(config),
            validation_mode: config.validation_mode.unwrap_or(ValidationMode::Error),
            statement_timeout,
            failpoints: Arc::new(failpoints),
        };
        Migrator::up(&store.conn, None)
            .await
            .map_err(SensaError::from)?;
        log::info!(
            "sensa store connected (backend {}, statement timeout {}ms)",
            config.backend_name(),
            store.statement_timeout.as_millis()
        );
        Ok(store)
    }

    pub async fn connect_sqlite(path: &Path) -> SensaResult<Self> {
        let config = SensaConfig::default_sqlite(path.to_string_lossy());
        Self::connect(&config, path.parent().unwrap_or_else(|| Path::new("."))).await
    }

    /// Returns a handle whose storage calls are each bounded by `limit`.
    pub fn with_timeout(&self, limit: Duration) -> Self {
        Self {
            statement_timeout: limit,
            ..self.clone()
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    pub fn backend(&self) -> DatabaseBackend {
        self.backend
    }

    pub fn statement_timeout(&self) -> Duration {
        self.statement_timeout
    }

    pub(crate) fn limits(&self) -> SensaLimits {
        self.limits
    }

    /// Runs one storage step under the configured timeout. State after a
    /// timeout is unknown to the caller.
    pub(crate) async fn bounded<T, F>(&self, step: &str, fut: F) -> SensaResult<T>
    where
        F: Future<Output = SensaResult<T>>,
    {
        match timeout(self.statement_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(SensaError::timeout(format!(
                "{step} exceeded {}ms",
                self.statement_timeout.as_millis()
            ))),
        }
    }

    pub(crate) fn validation_failure(&self, err: SensaError) -> SensaResult<()> {
        match self.validation_mode {
            ValidationMode::Error => Err(err),
            ValidationMode::Warn => {
                log::warn!("sensa validation warning: {err}");
                Ok(())
            }
            ValidationMode::Off => Ok(()),
        }
    }

    pub(crate) fn maybe_failpoint(&self, key: &str) -> SensaResult<()> {
        if self.failpoints.contains(key) {
            Err(SensaError::storage(format!("failpoint {key}")))
        } else {
            Ok(())
        }
    }
}

fn build_connection_url(config: &SensaConfig, base_dir: &Path) -> SensaResult<String> {
    match config.connection_url() {
        Some(url) => Ok(url.to_string()),
        None => {
            let path = config.sqlite_path(base_dir)?;
            Ok(format!("sqlite://{}?mode=rwc", path.display()))
        }
    }
}

pub(crate) fn build_stmt<S: QueryStatementWriter>(
    backend: DatabaseBackend,
    stmt: &S,
) -> (String, sea_orm::sea_query::Values) {
    match backend {
        DatabaseBackend::Sqlite => stmt.build(SqliteQueryBuilder),
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        DatabaseBackend::MySql => stmt.build(MysqlQueryBuilder),
        _ => stmt.build(SqliteQueryBuilder),
    }
}

/// Executes a DML statement and returns the affected row count.
pub(crate) async fn exec<C, S>(conn: &C, stmt: &S) -> SensaResult<u64>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let result = conn
        .execute_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(result.rows_affected())
}

/// Executes a DDL statement. Engine errors are returned untouched so callers
/// can classify races such as a concurrently added column.
pub(crate) async fn exec_schema<C, S>(conn: &C, stmt: &S) -> Result<(), DbErr>
where
    C: ConnectionTrait,
    S: StatementBuilder,
{
    let backend = conn.get_database_backend();
    let statement = backend.build(stmt);
    log::debug!("sensa ddl: {}", statement.sql);
    conn.execute_raw(statement).await?;
    Ok(())
}

pub(crate) async fn query_all<C, S>(conn: &C, stmt: &S) -> SensaResult<Vec<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let rows = conn
        .query_all_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(rows)
}

pub(crate) async fn query_one<C, S>(conn: &C, stmt: &S) -> SensaResult<Option<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let row = conn
        .query_one_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(row)
}

pub(crate) fn col_name(column: impl sea_orm::sea_query::Iden) -> String {
    column.to_string()
}
