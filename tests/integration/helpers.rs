//! Helper functions for integration tests

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use watchtower::alerts::{AlertRule, RuleCondition};
use watchtower::notify::{Notification, NotificationKind, Notifier};
use watchtower::storage::{Severity, SqliteBackend, StorageBackend};
use watchtower::{
    CpuMetrics, DiskMetrics, HttpCheckResult, LoadAverage, MemoryMetrics, NetworkMetrics,
    ServiceStatus, SystemMetricsSample,
};

/// A fresh database in its own temporary directory
pub async fn create_test_store() -> (TempDir, Arc<dyn StorageBackend>) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteBackend::new(dir.path().join("watchtower.db"))
        .await
        .unwrap();
    (dir, Arc::new(store))
}

pub fn create_system_sample(cpu: f64, timestamp: DateTime<Utc>) -> SystemMetricsSample {
    SystemMetricsSample {
        cpu: CpuMetrics {
            usage_percent: cpu,
            idle_percent: 100.0 - cpu,
            user_percent: Some(cpu * 0.7),
            system_percent: Some(cpu * 0.3),
            iowait_percent: Some(0.0),
            cores: 8,
        },
        memory: MemoryMetrics {
            total_bytes: 16_000_000_000,
            used_bytes: 8_000_000_000,
            available_bytes: 8_000_000_000,
            swap_total_bytes: 4_000_000_000,
            swap_used_bytes: 1_000_000_000,
            usage_percent: 50.0,
        },
        disks: vec![DiskMetrics {
            device: "/dev/sda1".to_string(),
            mount_point: "/".to_string(),
            filesystem: "ext4".to_string(),
            total_bytes: 500_000_000_000,
            used_bytes: 200_000_000_000,
            usage_percent: 40.0,
        }],
        network: vec![NetworkMetrics {
            interface: "eth0".to_string(),
            bytes_sent: 1_000,
            bytes_recv: 2_000,
        }],
        load: LoadAverage {
            one: 0.5,
            five: 0.4,
            fifteen: 0.3,
        },
        timestamp,
    }
}

pub fn create_service(name: &str, active: &str, sub: &str) -> ServiceStatus {
    ServiceStatus {
        name: name.to_string(),
        status: sub.to_string(),
        active: active.to_string(),
        sub: sub.to_string(),
        ..ServiceStatus::default()
    }
}

pub fn create_http_result(name: &str, success: bool, response_time_ms: u64) -> HttpCheckResult {
    HttpCheckResult {
        name: name.to_string(),
        url: format!("https://{name}.example.org"),
        status_code: success.then_some(200),
        response_time_ms,
        success,
        error: (!success).then(|| "connection refused".to_string()),
        timestamp: Utc::now(),
        ssl_expiry: None,
    }
}

pub fn cpu_rule(threshold: f64) -> AlertRule {
    AlertRule {
        id: "cpu-high".to_string(),
        name: "CPU high".to_string(),
        severity: Severity::Critical,
        enabled: true,
        condition: RuleCondition::System {
            cpu_threshold: Some(threshold),
            memory_threshold: None,
            disk_threshold: None,
            load_threshold: None,
        },
        notify: Vec::new(),
        min_interval: None,
        max_notifications: None,
    }
}

/// Notifier that records what it was asked to send
#[derive(Default)]
pub struct RecordingNotifier {
    pub name: String,
    pub fail: bool,
    pub sent: Mutex<Vec<(NotificationKind, String)>>,
}

impl RecordingNotifier {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            ..Self::default()
        })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail: true,
            ..Self::default()
        })
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.sent.lock().unwrap().iter().map(|(kind, _)| *kind).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((notification.kind, notification.alert.id.clone()));
        if self.fail {
            anyhow::bail!("{} is down", self.name);
        }
        Ok(())
    }
}
