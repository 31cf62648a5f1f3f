//! The HTTP API served by a running agent

use std::time::Duration;

use crate::helpers::*;
use chrono::Utc;
use reqwest::StatusCode;
use serde_json::{Value, json};
use watchtower::agent::Agent;
use watchtower::config::Config;

async fn start_agent(dir: &tempfile::TempDir) -> (Agent, String) {
    let mut config = Config::default();
    config.storage.path = dir.path().join("api.db");
    config.api.listen = "127.0.0.1:0".parse().unwrap();
    config.collectors.system.enabled = false;
    config.collectors.services.enabled = false;
    config.collectors.http.enabled = false;
    config.alerts.rules = serde_json::from_value(json!([{
        "id": "cpu-high",
        "name": "CPU high",
        "severity": "critical",
        "condition": { "type": "system", "cpu_threshold": 90.0 }
    }]))
    .unwrap();

    let mut agent = Agent::new(config).await.unwrap();
    agent.start().await.unwrap();
    let base = format!("http://{}/api/v1", agent.api_addr().unwrap());
    (agent, base)
}

async fn get_json(url: &str) -> (StatusCode, Value) {
    let response = reqwest::get(url).await.unwrap();
    let status = response.status();
    (status, response.json().await.unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_collected_data_is_queryable() {
    let dir = tempfile::tempdir().unwrap();
    let (agent, base) = start_agent(&dir).await;

    agent
        .adapter()
        .store_system_metrics(&create_system_sample(42.0, Utc::now()))
        .await
        .unwrap();
    agent
        .adapter()
        .store_service_metrics(&[create_service("nginx", "active", "running")])
        .await
        .unwrap();

    let (status, body) = get_json(&format!("{base}/entities?type=service")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["entities"][0]["status"], "active");

    let (status, server) = get_json(&format!("{base}/entities/by-name/server/localhost")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, summary) = get_json(&format!(
        "{base}/metrics/summary?entity_id={}&name=cpu_usage",
        server["id"]
    ))
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["latest"], 42.0);

    let (status, body) = get_json(&format!("{base}/events?type=service_state_change")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);

    let (status, body) = get_json(&format!("{base}/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["database"]["metric_count"].as_i64().unwrap() > 0);

    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_alert_acknowledge_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let (agent, base) = start_agent(&dir).await;

    agent
        .snapshot()
        .set_system(create_system_sample(95.0, Utc::now()))
        .await;
    agent.evaluator().unwrap().evaluate_now().await.unwrap();
    assert_eq!(agent.engine().active_alerts().await.len(), 1);

    let (status, body) = get_json(&format!("{base}/alerts")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["alerts"][0]["id"], "cpu-high-current");

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/alerts/cpu-high-current/acknowledge"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "acknowledged");

    let response = client
        .post(format!("{base}/alerts/nope/resolve"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let (status, _) = get_json(&format!("{base}/entities?limit=abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    tokio::time::timeout(Duration::from_secs(10), agent.shutdown())
        .await
        .unwrap()
        .unwrap();
}
