use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use sensa_core::{SensaError, SensaResult};

const CONFIG_FILE_NAME: &str = "sensa.json";
pub const DEFAULT_SQLITE_NAME: &str = "sensa.sqlite";
pub const DEFAULT_STATEMENT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_ATTRIBUTES: usize = 256;
pub const DEFAULT_MAX_STRING_BYTES: usize = 255;
pub const DEFAULT_MAX_HISTORY_ROWS: u32 = 1_000;

/// Forces the snapshot write to fail after the history row is written.
pub const FAILPOINT_AFTER_OBSERVATION_APPEND: &str = "after_observation_append";
/// Fails type-table creation before any DDL is issued.
pub const FAILPOINT_BEFORE_TYPE_TABLE_CREATE: &str = "before_type_table_create";
pub const KNOWN_FAILPOINTS: [&str; 2] = [
    FAILPOINT_AFTER_OBSERVATION_APPEND,
    FAILPOINT_BEFORE_TYPE_TABLE_CREATE,
];

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseConfig {
    /// A relative `path` is resolved against the store's base directory.
    Sqlite { path: Option<String> },
    Postgres { url: String },
    Mysql { url: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
}

/// Payload and query bounds. Unset fields fall back to the `DEFAULT_*`
/// constants.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_attributes: Option<usize>,
    pub max_string_bytes: Option<usize>,
    pub max_history_rows: Option<u32>,
}

impl LimitsConfig {
    pub fn with_defaults() -> Self {
        Self {
            max_attributes: Some(DEFAULT_MAX_ATTRIBUTES),
            max_string_bytes: Some(DEFAULT_MAX_STRING_BYTES),
            max_history_rows: Some(DEFAULT_MAX_HISTORY_ROWS),
        }
    }
}

/// How value kinds are checked against an existing column's kind before a
/// history write.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    Off,
    Warn,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SensaConfig {
    pub database: DatabaseConfig,
    pub pool: Option<PoolConfig>,
    pub limits: Option<LimitsConfig>,
    pub validation_mode: Option<ValidationMode>,
    pub statement_timeout_ms: Option<u64>,
    pub failpoints: Option<Vec<String>>,
}

impl SensaConfig {
    pub fn default_sqlite(path: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig::Sqlite {
                path: Some(path.into()),
            },
            pool: None,
            limits: Some(LimitsConfig::with_defaults()),
            validation_mode: Some(ValidationMode::Error),
            statement_timeout_ms: Some(DEFAULT_STATEMENT_TIMEOUT_MS),
            failpoints: None,
        }
    }

    /// Reads `sensa.json` from `base_dir`, or writes one pointing at a SQLite
    /// file next to it. The written path is relative so the directory can be
    /// moved as a whole.
    pub fn load_or_init(base_dir: &Path) -> SensaResult<Self> {
        fs::create_dir_all(base_dir)
            .map_err(|err| SensaError::storage(format!("create config dir: {err}")))?;
        let config_path = Self::file_path(base_dir);
        if config_path.exists() {
            let raw = fs::read_to_string(&config_path)
                .map_err(|err| SensaError::storage(format!("read config: {err}")))?;
            let config: SensaConfig = serde_json::from_str(&raw).map_err(|err| {
                SensaError::validation(format!("parse {}: {err}", config_path.display()))
            })?;
            config.validate()?;
            return Ok(config);
        }
        let config = SensaConfig::default_sqlite(DEFAULT_SQLITE_NAME);
        let payload = serde_json::to_string_pretty(&config)
            .map_err(|err| SensaError::storage(format!("serialize config: {err}")))?;
        fs::write(&config_path, payload)
            .map_err(|err| SensaError::storage(format!("write config: {err}")))?;
        Ok(config)
    }

    pub fn file_path(base_dir: &Path) -> PathBuf {
        base_dir.join(CONFIG_FILE_NAME)
    }

    /// Rejects settings that would only fail later, at connect or ingest time.
    pub fn validate(&self) -> SensaResult<()> {
        match &self.database {
            DatabaseConfig::Sqlite { path } => {
                if path.as_deref().is_some_and(|path| path.trim().is_empty()) {
                    return Err(SensaError::validation("sqlite path must not be empty"));
                }
            }
            DatabaseConfig::Postgres { url } => {
                require_scheme(url, &["postgres://", "postgresql://"])?
            }
            DatabaseConfig::Mysql { url } => require_scheme(url, &["mysql://", "mariadb://"])?,
        }
        if let Some(pool) = &self.pool
            && let (Some(min), Some(max)) = (pool.min_connections, pool.max_connections)
            && min > max
        {
            return Err(SensaError::validation(format!(
                "pool min_connections {min} exceeds max_connections {max}"
            )));
        }
        if let Some(limits) = &self.limits {
            let zero = [
                ("max_attributes", limits.max_attributes == Some(0)),
                ("max_string_bytes", limits.max_string_bytes == Some(0)),
                ("max_history_rows", limits.max_history_rows == Some(0)),
            ];
            if let Some((name, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
                return Err(SensaError::validation(format!(
                    "limits.{name} must be at least 1"
                )));
            }
        }
        if self.statement_timeout_ms == Some(0) {
            return Err(SensaError::validation(
                "statement_timeout_ms must be at least 1",
            ));
        }
        for failpoint in self.failpoints.iter().flatten() {
            if !KNOWN_FAILPOINTS.contains(&failpoint.as_str()) {
                return Err(SensaError::validation(format!(
                    "unknown failpoint '{failpoint}'"
                )));
            }
        }
        Ok(())
    }

    pub fn sqlite_path(&self, base_dir: &Path) -> SensaResult<PathBuf> {
        match &self.database {
            DatabaseConfig::Sqlite { path } => {
                let candidate = PathBuf::from(path.as_deref().unwrap_or(DEFAULT_SQLITE_NAME));
                if candidate.is_absolute() {
                    Ok(candidate)
                } else {
                    Ok(base_dir.join(candidate))
                }
            }
            _ => Err(SensaError::validation("config is not sqlite backend")),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.database {
            DatabaseConfig::Sqlite { .. } => "sqlite",
            DatabaseConfig::Postgres { .. } => "postgres",
            DatabaseConfig::Mysql { .. } => "mysql",
        }
    }

    /// Server URL for PostgreSQL and MySQL; `None` for SQLite.
    pub fn connection_url(&self) -> Option<&str> {
        match &self.database {
            DatabaseConfig::Sqlite { .. } => None,
            DatabaseConfig::Postgres { url } | DatabaseConfig::Mysql { url } => Some(url.as_str()),
        }
    }
}

fn require_scheme(url: &str, schemes: &[&str]) -> SensaResult<()> {
    if schemes.iter().any(|scheme| url.starts_with(scheme)) {
        Ok(())
    } else {
        Err(SensaError::validation(format!(
            "database url must start with one of {}",
            schemes.join(", ")
        )))
    }
}
