//! Concurrent writers against one store

use std::sync::Arc;

use crate::helpers::*;
use chrono::Utc;
use futures::future::join_all;
use watchtower::adapter::StorageAdapter;
use watchtower::config::RetentionSettings;
use watchtower::storage::{EntityFilter, MetricFilter, NewEntity, NewMetric, StorageBackend};

#[tokio::test]
async fn test_get_or_create_from_many_tasks() {
    let (_dir, store) = create_test_store().await;

    let tasks = (0..20).map(|_| {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .get_or_create_entity(NewEntity::new("service", "postgres"))
                .await
                .unwrap()
                .id
        })
    });
    let ids: Vec<i64> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();

    assert!(ids.iter().all(|id| *id == ids[0]));
    let entities = store
        .list_entities(EntityFilter {
            entity_type: Some("service".to_string()),
            ..EntityFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(entities.len(), 1);
}

#[tokio::test]
async fn test_concurrent_metric_batches() {
    let (_dir, store) = create_test_store().await;
    let server = store
        .create_entity(NewEntity::new("server", "localhost"))
        .await
        .unwrap();
    let server_id = server.id;

    let tasks = (0..10).map(|batch| {
        let store = store.clone();
        tokio::spawn(async move {
            let rows = (0..50)
                .map(|i| NewMetric::raw(Some(server_id), "cpu_usage", (batch * 50 + i) as f64, Utc::now()))
                .collect();
            store.create_metrics(rows).await.unwrap()
        })
    });
    let written: usize = join_all(tasks).await.into_iter().map(|r| r.unwrap()).sum();
    assert_eq!(written, 500);

    let summary = store
        .get_metric_summary(MetricFilter::for_metric(server.id, "cpu_usage"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.count, 500);
    assert_eq!(summary.min, 0.0);
    assert_eq!(summary.max, 499.0);
}

#[tokio::test]
async fn test_shared_adapter_across_collectors() {
    let (_dir, store) = create_test_store().await;
    let adapter = Arc::new(StorageAdapter::new(store.clone(), RetentionSettings::default()));

    let system = {
        let adapter = adapter.clone();
        tokio::spawn(async move {
            for cpu in [10.0, 20.0, 30.0] {
                adapter
                    .store_system_metrics(&create_system_sample(cpu, Utc::now()))
                    .await
                    .unwrap();
            }
        })
    };
    let http = {
        let adapter = adapter.clone();
        tokio::spawn(async move {
            for ms in [100, 200, 300] {
                adapter
                    .store_http_check_results(&[create_http_result("home", true, ms)])
                    .await
                    .unwrap();
            }
        })
    };
    system.await.unwrap();
    http.await.unwrap();

    let servers = store
        .list_entities(EntityFilter {
            entity_type: Some("server".to_string()),
            ..EntityFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(servers.len(), 1);

    let site = store.get_entity_by_name("site", "home").await.unwrap();
    let summary = store
        .get_metric_summary(MetricFilter::for_metric(site.id, "response_time_ms"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.count, 3);
    assert_eq!(summary.latest, 300.0);
}
