use std::path::Path;

use sensa_store::api::{IngestApi, TimeSeriesApi};
use sensa_store::{
    AttributeValue, EntityRef, LimitsConfig, SensaConfig, SensaError, SensaResult, SensaStore,
};
use serde_json::json;
use tempfile::tempdir;

async fn open_with_history_cap(base: &Path, cap: Option<u32>) -> SensaResult<SensaStore> {
    let mut config = SensaConfig::default_sqlite(base.join("sensa.sqlite").to_string_lossy());
    if let Some(cap) = cap {
        config.limits = Some(LimitsConfig {
            max_attributes: None,
            max_string_bytes: None,
            max_history_rows: Some(cap),
        });
    }
    SensaStore::connect(&config, base).await
}

async fn record_readings(store: &SensaStore, readings: &[i64]) -> SensaResult<()> {
    for reading in readings {
        store
            .ingest(&json!({"id": "north", "type": "gauge", "level": {"type": "int", "value": reading}}))
            .await?;
    }
    Ok(())
}

fn levels(rows: &[sensa_store::api::Observation]) -> Vec<i64> {
    rows.iter()
        .filter_map(|row| match row.get("level") {
            Some(AttributeValue::Int(level)) => Some(*level),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn returns_most_recent_rows_first() -> SensaResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open_with_history_cap(dir.path(), None).await?;
    record_readings(&store, &[1, 2, 3, 4]).await?;
    let entity = EntityRef::new("gauge", "north")?;

    assert_eq!(levels(&store.query_recent(&entity, Some(3)).await?), vec![4, 3, 2]);
    assert_eq!(levels(&store.query_recent(&entity, Some(50)).await?), vec![4, 3, 2, 1]);

    let rows = store.query_recent(&entity, Some(4)).await?;
    assert!(rows.windows(2).all(|pair| pair[0].timestamp >= pair[1].timestamp));
    assert!(rows.windows(2).all(|pair| pair[0].row_id > pair[1].row_id));
    Ok(())
}

#[tokio::test]
async fn zero_or_missing_limit_returns_one_row() -> SensaResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open_with_history_cap(dir.path(), None).await?;
    record_readings(&store, &[10, 20]).await?;
    let entity = EntityRef::new("gauge", "north")?;

    assert_eq!(levels(&store.query_recent(&entity, None).await?), vec![20]);
    assert_eq!(levels(&store.query_recent(&entity, Some(0)).await?), vec![20]);
    Ok(())
}

#[tokio::test]
async fn configured_cap_bounds_history() -> SensaResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open_with_history_cap(dir.path(), Some(2)).await?;
    record_readings(&store, &[1, 2, 3]).await?;
    let entity = EntityRef::new("gauge", "north")?;

    assert_eq!(levels(&store.query_recent(&entity, Some(100)).await?), vec![3, 2]);
    Ok(())
}

#[tokio::test]
async fn history_is_scoped_to_one_entity() -> SensaResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open_with_history_cap(dir.path(), None).await?;
    record_readings(&store, &[1]).await?;
    store
        .ingest(&json!({"id": "south", "type": "gauge", "level": {"type": "int", "value": 99}}))
        .await?;

    let north = EntityRef::new("gauge", "north")?;
    assert_eq!(levels(&store.query_recent(&north, Some(10)).await?), vec![1]);

    let idle = EntityRef::new("gauge", "east")?;
    assert!(store.query_recent(&idle, Some(10)).await?.is_empty());

    let unknown = EntityRef::new("barometer", "north")?;
    let err = store
        .query_recent(&unknown, Some(1))
        .await
        .expect_err("no table");
    assert!(matches!(err, SensaError::TypeNotFound { .. }));
    Ok(())
}
