use std::path::{Path, PathBuf};

use crate::config::DEFAULT_SQLITE_NAME;
use crate::{SensaConfig, SensaResult, SensaStore};

/// Loads `sensa.json` from `base`, writing a SQLite default on first use.
pub fn load_or_init_config(base: &Path) -> SensaResult<SensaConfig> {
    SensaConfig::load_or_init(base)
}

/// Opens the store described by the config under `base`. Invalid configs are
/// rejected before any connection is attempted.
pub async fn open_store(base: &Path) -> SensaResult<SensaStore> {
    let config = load_or_init_config(base)?;
    log::debug!(
        "opening {} store from {}",
        config.backend_name(),
        SensaConfig::file_path(base).display()
    );
    SensaStore::connect(&config, base).await
}

pub fn default_sqlite_path(base: &Path) -> PathBuf {
    base.join(DEFAULT_SQLITE_NAME)
}

#[cfg(test)]
mod tests {
    use super::{default_sqlite_path, load_or_init_config, open_store};
    use crate::DatabaseConfig;
    use sensa_core::api::{EntityStoreApi, IngestApi, IngestOutcome};
    use sensa_core::{EntityRef, SensaError, SensaResult};
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn first_open_writes_relative_sqlite_config() -> SensaResult<()> {
        let dir = tempdir().expect("tempdir");
        let base = dir.path();
        let store = open_store(base).await?;
        assert!(default_sqlite_path(base).exists());

        let config = load_or_init_config(base)?;
        match &config.database {
            DatabaseConfig::Sqlite { path } => assert_eq!(path.as_deref(), Some("sensa.sqlite")),
            other => panic!("expected sqlite, got {other:?}"),
        }

        let outcome = store
            .ingest(&json!({"id": "01", "type": "weather", "wind": {"type": "float", "value": 2.5}}))
            .await?;
        assert_eq!(outcome, IngestOutcome::Created);
        Ok(())
    }

    #[tokio::test]
    async fn moved_directory_keeps_its_data() -> SensaResult<()> {
        let dir = tempdir().expect("tempdir");
        let first = dir.path().join("first");
        let store = open_store(&first).await?;
        store
            .ingest(&json!({"id": "01", "type": "weather", "wind": {"type": "float", "value": 2.5}}))
            .await?;
        drop(store);

        let moved = dir.path().join("moved");
        std::fs::rename(&first, &moved).expect("rename");
        let store = open_store(&moved).await?;
        let snapshot = store
            .get_snapshot(&EntityRef::new("weather", "01")?)
            .await?
            .expect("snapshot survives the move");
        assert_eq!(snapshot.revision, 1);
        Ok(())
    }

    #[tokio::test]
    async fn reuses_existing_config_file() -> SensaResult<()> {
        let dir = tempdir().expect("tempdir");
        let base = dir.path();
        std::fs::write(
            base.join("sensa.json"),
            r#"{"database": {"backend": "sqlite", "path": "custom.sqlite"}, "statement_timeout_ms": 250}"#,
        )
        .expect("write config");
        let config = load_or_init_config(base)?;
        assert_eq!(config.statement_timeout_ms, Some(250));
        assert_eq!(config.sqlite_path(base)?, base.join("custom.sqlite"));
        Ok(())
    }

    #[tokio::test]
    async fn invalid_config_file_is_rejected_before_connecting() {
        let dir = tempdir().expect("tempdir");
        let base = dir.path();
        std::fs::write(
            base.join("sensa.json"),
            r#"{"database": {"backend": "sqlite"}, "failpoints": ["after_snapshot"]}"#,
        )
        .expect("write config");
        let err = open_store(base).await.expect_err("unknown failpoint");
        assert!(matches!(err, SensaError::Validation { .. }), "{err}");
        assert!(!default_sqlite_path(base).exists());
    }
}
