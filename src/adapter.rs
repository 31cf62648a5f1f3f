//! Maps collector samples onto the generic entity / event / metric store
//!
//! ## Entity identity
//!
//! | sample                | entity type         | entity name  |
//! |-----------------------|---------------------|--------------|
//! | host resources        | `server`            | `localhost`  |
//! | one mounted disk      | `disk`              | mount point  |
//! | one network interface | `network_interface` | interface    |
//! | systemd unit          | `service`           | unit name    |
//! | HTTP check            | `site`              | check name   |
//!
//! Entities are resolved through an in-memory cache that falls back to the
//! store's get-or-create upsert, so the cache is never the authority.
//!
//! ## State changes
//!
//! Services and sites carry a derived [`EntityStatus`]. An event is written
//! only when the derived status differs from the stored one; an unchanged
//! status just refreshes `last_seen`.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::config::RetentionSettings;
use crate::storage::{
    Attributes, Entity, EntityStatus, EntityUpdate, NewEntity, NewEvent, NewMetric, Severity,
    StorageBackend,
};
use crate::{HttpCheckResult, ServiceStatus, SystemMetricsSample};

pub const SERVER_ENTITY: &str = "server";
pub const DISK_ENTITY: &str = "disk";
pub const NETWORK_ENTITY: &str = "network_interface";
pub const SERVICE_ENTITY: &str = "service";
pub const SITE_ENTITY: &str = "site";

/// Name of the server entity all host metrics hang off
pub const LOCAL_SERVER: &str = "localhost";

/// Derive the entity status of a systemd unit from its active/sub state
pub fn derive_service_status(active: &str, sub: &str) -> EntityStatus {
    match (active, sub) {
        ("active", "running") => EntityStatus::Active,
        ("failed", _) => EntityStatus::Error,
        _ => EntityStatus::Inactive,
    }
}

fn service_event_severity(status: EntityStatus) -> Severity {
    match status {
        EntityStatus::Error => Severity::Error,
        EntityStatus::Inactive => Severity::Warning,
        _ => Severity::Info,
    }
}

type EntityKey = (String, String);

pub struct StorageAdapter {
    store: Arc<dyn StorageBackend>,
    retention: RetentionSettings,
    entities: RwLock<HashMap<EntityKey, Entity>>,
}

impl StorageAdapter {
    pub fn new(store: Arc<dyn StorageBackend>, retention: RetentionSettings) -> Self {
        Self {
            store,
            retention,
            entities: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn StorageBackend> {
        &self.store
    }

    /// Forget every cached entity; the next lookup goes to the store
    pub async fn invalidate_cache(&self) {
        self.entities.write().await.clear();
    }

    async fn resolve_entity(&self, defaults: NewEntity) -> anyhow::Result<Entity> {
        let key = (defaults.entity_type.clone(), defaults.name.clone());

        if let Some(entity) = self.entities.read().await.get(&key) {
            return Ok(entity.clone());
        }

        let entity = self
            .store
            .get_or_create_entity(defaults)
            .await
            .with_context(|| format!("failed to resolve entity {}/{}", key.0, key.1))?;

        self.entities.write().await.insert(key, entity.clone());
        Ok(entity)
    }

    fn cache_key(entity: &Entity) -> EntityKey {
        (entity.entity_type.clone(), entity.name.clone())
    }

    async fn update_status(
        &self,
        entity: &Entity,
        status: EntityStatus,
        details: Attributes,
    ) -> anyhow::Result<Entity> {
        let updated = self
            .store
            .update_entity(
                entity.id,
                EntityUpdate {
                    status: Some(status),
                    details: Some(details),
                },
            )
            .await
            .with_context(|| {
                format!(
                    "failed to update status of {}/{}",
                    entity.entity_type, entity.name
                )
            })?;

        self.entities
            .write()
            .await
            .insert(Self::cache_key(&updated), updated.clone());
        Ok(updated)
    }

    async fn touch(&self, entity: &Entity) -> anyhow::Result<()> {
        self.store
            .touch_entity(entity.id)
            .await
            .with_context(|| format!("failed to touch {}/{}", entity.entity_type, entity.name))
    }

    fn raw_metric(
        &self,
        entity_id: i64,
        name: &str,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> NewMetric {
        NewMetric::raw(Some(entity_id), name, value, timestamp)
            .expires_after(self.retention.raw_metrics_ttl.to_chrono())
    }

    /// Write one host sample as a single metric batch
    ///
    /// Returns the number of metric rows written.
    #[instrument(skip_all, fields(disks = sample.disks.len(), interfaces = sample.network.len()))]
    pub async fn store_system_metrics(&self, sample: &SystemMetricsSample) -> anyhow::Result<usize> {
        let server = self
            .resolve_entity(
                NewEntity::new(SERVER_ENTITY, LOCAL_SERVER).with_status(EntityStatus::Active),
            )
            .await?;
        self.touch(&server).await?;

        let ts = sample.timestamp;
        let cpu = &sample.cpu;
        let memory = &sample.memory;

        let mut rows = Vec::with_capacity(13 + sample.disks.len() * 3 + sample.network.len() * 2);

        let breakdown = [
            ("cpu_user", cpu.user_percent),
            ("cpu_system", cpu.system_percent),
            ("cpu_iowait", cpu.iowait_percent),
        ];
        let cpu_rows = [("cpu_usage", cpu.usage_percent), ("cpu_idle", cpu.idle_percent)]
            .into_iter()
            .chain(breakdown.into_iter().filter_map(|(name, value)| Some((name, value?))));
        for (name, value) in cpu_rows {
            rows.push(self.raw_metric(server.id, name, value, ts).with_tag("cores", cpu.cores));
        }

        for (name, value) in [
            ("memory_usage", memory.usage_percent),
            ("memory_used", memory.used_bytes as f64),
            ("memory_total", memory.total_bytes as f64),
            ("memory_available", memory.available_bytes as f64),
            ("swap_used", memory.swap_used_bytes as f64),
            ("load_1m", sample.load.one),
            ("load_5m", sample.load.five),
            ("load_15m", sample.load.fifteen),
        ] {
            rows.push(self.raw_metric(server.id, name, value, ts));
        }

        for disk in &sample.disks {
            let entity = self
                .resolve_entity(
                    NewEntity::new(DISK_ENTITY, &disk.mount_point)
                        .with_status(EntityStatus::Active)
                        .with_details(
                            Attributes::new()
                                .with("device", disk.device.as_str())
                                .with("filesystem", disk.filesystem.as_str()),
                        ),
                )
                .await?;

            let tags = Attributes::new()
                .with("device", disk.device.as_str())
                .with("filesystem", disk.filesystem.as_str())
                .with("total", disk.total_bytes);

            for (name, value) in [
                ("disk_usage", disk.usage_percent),
                ("disk_used", disk.used_bytes as f64),
                ("disk_total", disk.total_bytes as f64),
            ] {
                rows.push(
                    self.raw_metric(entity.id, name, value, ts)
                        .with_tags(tags.clone()),
                );
            }
        }

        for interface in &sample.network {
            let entity = self
                .resolve_entity(
                    NewEntity::new(NETWORK_ENTITY, &interface.interface)
                        .with_status(EntityStatus::Active),
                )
                .await?;

            rows.push(self.raw_metric(entity.id, "network_bytes_sent", interface.bytes_sent as f64, ts));
            rows.push(self.raw_metric(entity.id, "network_bytes_recv", interface.bytes_recv as f64, ts));
        }

        let written = self
            .store
            .create_metrics(rows)
            .await
            .context("failed to store system metrics batch")?;

        debug!("stored {} system metrics", written);
        Ok(written)
    }

    /// Record the state of each systemd unit
    ///
    /// Returns the number of `service_state_change` events written.
    #[instrument(skip_all, fields(count = services.len()))]
    pub async fn store_service_metrics(&self, services: &[ServiceStatus]) -> anyhow::Result<usize> {
        let now = Utc::now();
        let mut changes = 0;

        for service in services {
            let entity = self
                .resolve_entity(NewEntity::new(SERVICE_ENTITY, &service.name))
                .await?;

            let status = derive_service_status(&service.active, &service.sub);

            if entity.status != status {
                let mut details = Attributes::new()
                    .with("active", service.active.as_str())
                    .with("sub", service.sub.as_str())
                    .with("status", service.status.as_str())
                    .with("restart_count", service.restart_count);
                if let Some(since) = service.since {
                    details.insert("since", since.to_rfc3339());
                }
                if let Some(last_restart) = service.last_restart {
                    details.insert("last_restart", last_restart.to_rfc3339());
                }
                for (key, value) in &service.metadata {
                    details.insert(key.as_str(), value.as_str());
                }

                let updated = self.update_status(&entity, status, details).await?;

                info!(
                    "service {} changed state: {} -> {}",
                    service.name, entity.status, status
                );

                self.store
                    .create_event(
                        NewEvent::new(
                            "service_state_change",
                            service_event_severity(status),
                            format!(
                                "service {} changed from {} to {}",
                                service.name, entity.status, status
                            ),
                        )
                        .for_entity(updated.id)
                        .at(now)
                        .with_details(
                            Attributes::new()
                                .with("previous_status", entity.status.as_str())
                                .with("new_status", status.as_str())
                                .with("active", service.active.as_str())
                                .with("sub", service.sub.as_str()),
                        ),
                    )
                    .await
                    .with_context(|| {
                        format!("failed to record state change of service {}", service.name)
                    })?;
                changes += 1;
            } else {
                self.touch(&entity).await?;
            }

            self.store
                .create_metric(
                    self.raw_metric(
                        entity.id,
                        "service_restart_count",
                        service.restart_count as f64,
                        now,
                    ),
                )
                .await
                .with_context(|| format!("failed to record restart count of {}", service.name))?;
        }

        Ok(changes)
    }

    /// Record HTTP probe results
    ///
    /// Returns the number of events written.
    #[instrument(skip_all, fields(count = results.len()))]
    pub async fn store_http_check_results(&self, results: &[HttpCheckResult]) -> anyhow::Result<usize> {
        let mut events = 0;

        for result in results {
            let entity = self
                .resolve_entity(
                    NewEntity::new(SITE_ENTITY, &result.name)
                        .with_details(Attributes::new().with("url", result.url.as_str())),
                )
                .await?;

            let mut tags = Attributes::new().with("url", result.url.as_str());
            if let Some(code) = result.status_code {
                tags.insert("status_code", code);
            }

            let mut rows = vec![
                self.raw_metric(
                    entity.id,
                    "response_time_ms",
                    result.response_time_ms as f64,
                    result.timestamp,
                )
                .with_tags(tags),
            ];
            if let Some(expiry) = result.ssl_expiry {
                let days = (expiry - result.timestamp).num_days();
                rows.push(self.raw_metric(entity.id, "ssl_days_remaining", days as f64, result.timestamp));
            }

            self.store
                .create_metrics(rows)
                .await
                .with_context(|| format!("failed to record metrics for site {}", result.name))?;

            let status = if result.success {
                EntityStatus::Active
            } else {
                EntityStatus::Error
            };

            let mut details = Attributes::new()
                .with("url", result.url.as_str())
                .with("response_time_ms", result.response_time_ms);
            if let Some(code) = result.status_code {
                details.insert("status_code", code);
            }
            if let Some(error) = &result.error {
                details.insert("error", error.as_str());
            }

            let event = if entity.status != status {
                self.update_status(&entity, status, details.clone()).await?;
                info!("site {} changed state: {} -> {}", result.name, entity.status, status);

                let severity = if result.success {
                    Severity::Info
                } else {
                    Severity::Error
                };
                Some(
                    NewEvent::new(
                        "http_state_change",
                        severity,
                        format!(
                            "site {} changed from {} to {}",
                            result.name, entity.status, status
                        ),
                    )
                    .with_details(
                        details
                            .with("previous_status", entity.status.as_str())
                            .with("new_status", status.as_str()),
                    ),
                )
            } else {
                self.touch(&entity).await?;
                (!result.success).then(|| {
                    NewEvent::new(
                        "http_check_failed",
                        Severity::Error,
                        format!(
                            "check {} failed: {}",
                            result.name,
                            result.error.as_deref().unwrap_or("unexpected response")
                        ),
                    )
                    .with_details(details)
                })
            };

            if let Some(event) = event {
                self.store
                    .create_event(event.for_entity(entity.id).at(result.timestamp))
                    .await
                    .with_context(|| format!("failed to record event for site {}", result.name))?;
                events += 1;
            }
        }

        Ok(events)
    }
}
