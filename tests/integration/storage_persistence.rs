//! Persistence and retention behavior of the SQLite store

use crate::helpers::*;
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use watchtower::adapter::{DISK_ENTITY, NETWORK_ENTITY, SERVER_ENTITY, StorageAdapter};
use watchtower::config::RetentionSettings;
use watchtower::storage::{
    EntityFilter, EventFilter, MetricFilter, NewEntity, NewEvent, NewMetric, RetentionPolicy,
    Severity, SqliteBackend, StorageBackend,
};

#[tokio::test]
async fn test_data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("persist.db");

    let entity_id = {
        let store = SqliteBackend::new(&path).await.unwrap();
        let server = store
            .create_entity(NewEntity::new("server", "localhost"))
            .await
            .unwrap();
        store
            .create_metric(NewMetric::raw(Some(server.id), "cpu_usage", 42.0, Utc::now()))
            .await
            .unwrap();
        store
            .create_event(NewEvent::new("agent_started", Severity::Info, "hello").for_entity(server.id))
            .await
            .unwrap();
        store.close().await.unwrap();
        server.id
    };

    let store = SqliteBackend::new(&path).await.unwrap();
    let server = store.get_entity_by_name("server", "localhost").await.unwrap();
    assert_eq!(server.id, entity_id);

    let metrics = store
        .list_metrics(MetricFilter::for_metric(entity_id, "cpu_usage"))
        .await
        .unwrap();
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].value, 42.0);

    let info = store.get_database_info().await.unwrap();
    assert_eq!(info.event_count, 1);
    assert!(info.schema_version.is_some());
}

#[tokio::test]
async fn test_migrations_are_idempotent_across_reopens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("migrate.db");

    let first = SqliteBackend::new(&path).await.unwrap();
    let version = first.get_database_info().await.unwrap().schema_version;
    let hash = first.get_database_info().await.unwrap().schema_hash;
    first.close().await.unwrap();

    for _ in 0..3 {
        let store = SqliteBackend::new(&path).await.unwrap();
        let info = store.get_database_info().await.unwrap();
        assert_eq!(info.schema_version, version);
        assert_eq!(info.schema_hash, hash);
        store.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_retention_window_boundary() {
    let (_dir, store) = create_test_store().await;
    let now = Utc::now();

    let recent = store
        .create_event(NewEvent::new("note", Severity::Info, "29 days old").at(now - Duration::days(29)))
        .await
        .unwrap();
    let old = store
        .create_event(NewEvent::new("note", Severity::Info, "31 days old").at(now - Duration::days(31)))
        .await
        .unwrap();
    store
        .create_metric(NewMetric::raw(None, "cpu_usage", 1.0, now - Duration::days(31)))
        .await
        .unwrap();

    let report = store.cleanup_at(&RetentionPolicy::default(), now).await.unwrap();
    assert_eq!(report.retained_events, 1);
    assert_eq!(report.retained_raw_metrics, 1);

    assert!(store.get_event(recent.id).await.is_ok());
    assert!(store.get_event(old.id).await.unwrap_err().is_not_found());

    let info = store.get_database_info().await.unwrap();
    assert_eq!(info.last_cleanup.map(|t| t.timestamp_millis()), Some(now.timestamp_millis()));
}

#[tokio::test]
async fn test_expired_rows_removed_regardless_of_age() {
    let (_dir, store) = create_test_store().await;
    let now = Utc::now();

    store
        .create_metric(
            NewMetric::raw(None, "response_time_ms", 12.0, now - Duration::hours(2))
                .expires_after(Duration::hours(1)),
        )
        .await
        .unwrap();
    store
        .create_metric(
            NewMetric::raw(None, "response_time_ms", 14.0, now).expires_after(Duration::hours(1)),
        )
        .await
        .unwrap();

    let report = store.cleanup_at(&RetentionPolicy::default(), now).await.unwrap();
    assert_eq!(report.expired_metrics, 1);
    assert_eq!(store.list_metrics(MetricFilter::default()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_deleting_entity_cascades_metrics_and_detaches_events() {
    let (_dir, store) = create_test_store().await;
    let disk = store.create_entity(NewEntity::new("disk", "/")).await.unwrap();

    store
        .create_metric(NewMetric::raw(Some(disk.id), "disk_usage", 40.0, Utc::now()))
        .await
        .unwrap();
    let event = store
        .create_event(NewEvent::new("disk_added", Severity::Info, "root disk").for_entity(disk.id))
        .await
        .unwrap();

    store.delete_entity(disk.id).await.unwrap();

    assert!(store.list_metrics(MetricFilter::default()).await.unwrap().is_empty());
    assert_eq!(store.get_event(event.id).await.unwrap().entity_id, None);
}

#[tokio::test]
async fn test_adapter_writes_full_system_sample() {
    let (_dir, store) = create_test_store().await;
    let adapter = StorageAdapter::new(store.clone(), RetentionSettings::default());

    let written = adapter
        .store_system_metrics(&create_system_sample(35.0, Utc::now()))
        .await
        .unwrap();
    assert!(written > 0);

    let entities = store.list_entities(EntityFilter::default()).await.unwrap();
    let types: Vec<_> = entities.iter().map(|e| e.entity_type.as_str()).collect();
    assert!(types.contains(&SERVER_ENTITY));
    assert!(types.contains(&DISK_ENTITY));
    assert!(types.contains(&NETWORK_ENTITY));

    let metrics = store
        .list_metrics(MetricFilter {
            metric_name: Some("cpu_usage".to_string()),
            ..MetricFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].value, 35.0);
    assert!(metrics[0].expires_at.is_some());
}

#[tokio::test]
async fn test_service_transitions_are_logged_once() {
    let (_dir, store) = create_test_store().await;
    let adapter = StorageAdapter::new(store.clone(), RetentionSettings::default());

    for (active, sub) in [
        ("active", "running"),
        ("active", "running"),
        ("failed", "failed"),
        ("failed", "failed"),
        ("active", "running"),
    ] {
        adapter
            .store_service_metrics(&[create_service("nginx", active, sub)])
            .await
            .unwrap();
    }

    let events = store
        .list_events(EventFilter {
            event_type: Some("service_state_change".to_string()),
            ..EventFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(events.len(), 3);
}
