//! Degraded dependencies: failing channels, closed stores, bad input

use std::sync::Arc;

use crate::helpers::*;
use chrono::Utc;
use watchtower::adapter::StorageAdapter;
use watchtower::alerts::{AlertEngine, AlertStatus};
use watchtower::config::{Config, RetentionSettings};
use watchtower::notify::{Notifier, WebhookNotifier};
use watchtower::snapshot::Snapshot;
use watchtower::storage::{NewEntity, SqliteBackend, StorageBackend};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_failing_webhook_does_not_block_other_channels() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let broken: Arc<dyn Notifier> = Arc::new(WebhookNotifier::new(
        "broken",
        server.uri(),
        reqwest::Client::new(),
    ));
    let recorder = RecordingNotifier::new("recorder");
    let engine = AlertEngine::new(vec![cpu_rule(10.0)], vec![broken, recorder.clone() as Arc<dyn Notifier>]);

    let snapshot = Snapshot {
        system: Some(create_system_sample(99.0, Utc::now())),
        ..Snapshot::default()
    };
    let summary = engine.evaluate_rules(&snapshot).await;
    assert_eq!(summary.fired, 1);

    let alert = engine.get_alert("cpu-high-current").await.unwrap();
    assert_eq!(alert.status, AlertStatus::Firing);
    assert_eq!(alert.sent_to, vec!["recorder".to_string()]);
    assert_eq!(recorder.kinds().len(), 1);
}

#[tokio::test]
async fn test_every_channel_failing_still_tracks_alert() {
    let engine = AlertEngine::new(
        vec![cpu_rule(10.0)],
        vec![
            RecordingNotifier::failing("a") as Arc<dyn Notifier>,
            RecordingNotifier::failing("b"),
        ],
    );
    let snapshot = Snapshot {
        system: Some(create_system_sample(99.0, Utc::now())),
        ..Snapshot::default()
    };
    engine.evaluate_rules(&snapshot).await;

    let alert = engine.get_alert("cpu-high-current").await.unwrap();
    assert!(alert.sent_to.is_empty());
    assert_eq!(alert.notification_count, 1);
}

#[tokio::test]
async fn test_closed_store_reports_errors_and_unhealthy() {
    let (_dir, store) = create_test_store().await;
    store.close().await.unwrap();

    assert!(store.create_entity(NewEntity::new("server", "late")).await.is_err());
    assert!(!store.get_system_health().await.unwrap().healthy);

    let adapter = StorageAdapter::new(store.clone(), RetentionSettings::default());
    assert!(
        adapter
            .store_system_metrics(&create_system_sample(5.0, Utc::now()))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_alert_events_tolerate_closed_store() {
    let (_dir, store) = create_test_store().await;
    let recorder = RecordingNotifier::new("recorder");
    let engine = AlertEngine::new(vec![cpu_rule(10.0)], vec![recorder.clone() as Arc<dyn Notifier>])
        .with_event_store(store.clone());
    store.close().await.unwrap();

    let snapshot = Snapshot {
        system: Some(create_system_sample(99.0, Utc::now())),
        ..Snapshot::default()
    };
    let summary = engine.evaluate_rules(&snapshot).await;
    assert_eq!(summary.fired, 1);
    assert_eq!(recorder.kinds().len(), 1);
}

#[tokio::test]
async fn test_unwritable_database_path_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("nested").join("db.sqlite");
    std::fs::write(dir.path().join("missing"), b"not a directory").unwrap();

    assert!(SqliteBackend::new(&path).await.is_err());
}

#[test]
fn test_invalid_config_is_rejected() {
    let result = Config::from_json(r#"{ "storrage": { "path": "/tmp/x.db" } }"#);
    assert!(result.is_err());
}
