//! Snapshot to rule engine to notification channel, end to end

use std::sync::Arc;

use crate::helpers::*;
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;
use watchtower::alerts::{AlertEngine, AlertRule, AlertStatus, RuleCondition};
use watchtower::notify::{NotificationKind, Notifier, WebhookNotifier};
use watchtower::snapshot::Snapshot;
use watchtower::storage::{EventFilter, Severity};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn snapshot_with_cpu(cpu: f64) -> Snapshot {
    Snapshot {
        system: Some(create_system_sample(cpu, Utc::now())),
        ..Snapshot::default()
    }
}

#[tokio::test]
async fn test_webhook_receives_firing_and_resolved() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_partial_json(json!({ "kind": "firing", "alert": { "id": "cpu-high-current" } })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_partial_json(json!({ "kind": "resolved", "alert": { "status": "resolved" } })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let webhook: Arc<dyn Notifier> = Arc::new(WebhookNotifier::new(
        "ops",
        format!("{}/hook", server.uri()),
        reqwest::Client::new(),
    ));
    let (_dir, store) = create_test_store().await;
    let engine = AlertEngine::new(vec![cpu_rule(90.0)], vec![webhook]).with_event_store(store.clone());

    let summary = engine.evaluate_rules(&snapshot_with_cpu(97.5)).await;
    assert_eq!(summary.fired, 1);

    let alert = engine.get_alert("cpu-high-current").await.unwrap();
    assert_eq!(alert.status, AlertStatus::Firing);
    assert_eq!(alert.sent_to, vec!["ops".to_string()]);

    let summary = engine.evaluate_rules(&snapshot_with_cpu(20.0)).await;
    assert_eq!(summary.resolved, 1);
    assert!(engine.active_alerts().await.is_empty());

    let events = store
        .list_events(EventFilter {
            event_type: Some("alert_fired".to_string()),
            ..EventFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, Severity::Critical);
    assert_eq!(events[0].details.get_str("rule_id"), Some("cpu-high"));
}

#[tokio::test]
async fn test_throttle_limits_repeat_notifications() {
    let recorder = RecordingNotifier::new("recorder");
    let mut rule = cpu_rule(50.0);
    rule.max_notifications = Some(3);
    let engine = AlertEngine::new(vec![rule], vec![recorder.clone() as Arc<dyn Notifier>]);

    let snapshot = snapshot_with_cpu(75.0);
    let start = Utc::now();
    for minute in 0..60 {
        engine
            .evaluate_rules_at(&snapshot, start + Duration::minutes(minute))
            .await;
    }

    assert_eq!(
        recorder.kinds(),
        vec![
            NotificationKind::Firing,
            NotificationKind::Repeat,
            NotificationKind::Repeat
        ]
    );
    let alert = engine.get_alert("cpu-high-current").await.unwrap();
    assert_eq!(alert.status, AlertStatus::Suppressed);
    assert_eq!(alert.notification_count, 3);
}

#[tokio::test]
async fn test_service_and_http_rules_together() {
    let recorder = RecordingNotifier::new("recorder");
    let rules = vec![
        AlertRule {
            id: "nginx-down".to_string(),
            name: "nginx down".to_string(),
            severity: Severity::Error,
            enabled: true,
            condition: RuleCondition::Service {
                service: "nginx".to_string(),
                expected_state: None,
            },
            notify: Vec::new(),
            min_interval: None,
            max_notifications: None,
        },
        AlertRule {
            id: "home-slow".to_string(),
            name: "home page slow".to_string(),
            severity: Severity::Warning,
            enabled: true,
            condition: RuleCondition::Http {
                check: "home".to_string(),
                timeout_ms: Some(500),
                expected_status: None,
            },
            notify: Vec::new(),
            min_interval: None,
            max_notifications: None,
        },
    ];
    let engine = AlertEngine::new(rules, vec![recorder.clone() as Arc<dyn Notifier>]);

    let snapshot = Snapshot {
        services: vec![create_service("nginx", "failed", "failed")],
        http: vec![create_http_result("home", true, 1_200)],
        ..Snapshot::default()
    };
    let summary = engine.evaluate_rules(&snapshot).await;
    assert_eq!(summary.evaluated, 2);
    assert_eq!(summary.fired, 2);

    let healthy = Snapshot {
        services: vec![create_service("nginx", "active", "running")],
        http: vec![create_http_result("home", true, 80)],
        ..Snapshot::default()
    };
    let summary = engine.evaluate_rules(&healthy).await;
    assert_eq!(summary.resolved, 2);
    assert_eq!(engine.history().await.len(), 2);
    assert_eq!(recorder.sent.lock().unwrap().len(), 4);
}
