//! Latest collected samples, shared between collectors, the alert evaluator
//! and the API.
//!
//! Writers replace one section at a time; readers always receive an owned
//! copy so no lock is held while rules are evaluated.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{HttpCheckResult, ServiceStatus, SystemMetricsSample};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub system: Option<SystemMetricsSample>,
    pub services: Vec<ServiceStatus>,
    pub http: Vec<HttpCheckResult>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn service(&self, name: &str) -> Option<&ServiceStatus> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn http_check(&self, name: &str) -> Option<&HttpCheckResult> {
        self.http.iter().find(|c| c.name == name)
    }
}

/// Cheaply cloneable handle to the latest snapshot
#[derive(Debug, Clone, Default)]
pub struct LatestSnapshot {
    inner: Arc<RwLock<Snapshot>>,
}

impl LatestSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> Snapshot {
        self.inner.read().await.clone()
    }

    pub async fn set_system(&self, sample: SystemMetricsSample) {
        let mut snapshot = self.inner.write().await;
        snapshot.updated_at = Some(sample.timestamp);
        snapshot.system = Some(sample);
    }

    pub async fn set_services(&self, services: Vec<ServiceStatus>) {
        let mut snapshot = self.inner.write().await;
        snapshot.services = services;
        snapshot.updated_at = Some(Utc::now());
    }

    pub async fn set_http(&self, results: Vec<HttpCheckResult>) {
        let mut snapshot = self.inner.write().await;
        snapshot.updated_at = results.iter().map(|r| r.timestamp).max().or(Some(Utc::now()));
        snapshot.http = results;
    }
}
