//! Storage backend trait definition
//!
//! This module defines the `StorageBackend` trait that the agent, the
//! storage adapter and the HTTP layer talk to, plus the filter and
//! maintenance types that travel across it.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::StorageResult;
use super::schema::{
    AggregationLevel, Entity, EntityStatus, EntityUpdate, Event, Metric, MetricSummary, NewEntity,
    NewEvent, NewMetric, Severity,
};

/// Filter for listing entities. Every field is optional; set fields are ANDed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityFilter {
    pub entity_type: Option<String>,
    pub status: Option<EntityStatus>,
    pub name: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Filter for listing events
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub entity_id: Option<i64>,
    pub event_type: Option<String>,
    pub severity: Option<Severity>,
    /// Inclusive lower bound on the timestamp
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the timestamp
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Filter for listing metrics and computing summaries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricFilter {
    pub entity_id: Option<i64>,
    pub metric_name: Option<String>,
    pub aggregation_level: Option<AggregationLevel>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl MetricFilter {
    pub fn for_metric(entity_id: i64, metric_name: impl Into<String>) -> Self {
        Self {
            entity_id: Some(entity_id),
            metric_name: Some(metric_name.into()),
            ..Self::default()
        }
    }
}

/// Per-category retention windows applied to rows without an explicit expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub events_days: u32,
    pub raw_metrics_days: u32,
    pub aggregated_metrics_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            events_days: 30,
            raw_metrics_days: 30,
            aggregated_metrics_days: 365,
        }
    }
}

impl RetentionPolicy {
    pub fn events_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        days_before(now, self.events_days)
    }

    pub fn raw_metrics_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        days_before(now, self.raw_metrics_days)
    }

    pub fn aggregated_metrics_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        days_before(now, self.aggregated_metrics_days)
    }
}

/// Clamps to the earliest representable instant
fn days_before(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now.checked_sub_signed(Duration::days(i64::from(days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Outcome of one cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub expired_events: u64,
    pub expired_metrics: u64,
    pub retained_events: u64,
    pub retained_raw_metrics: u64,
    pub retained_aggregated_metrics: u64,
    /// Bytes sitting on the freelist after the deletes
    pub reclaimable_bytes: u64,
    pub ran_at: Option<DateTime<Utc>>,
}

impl CleanupReport {
    pub fn total_deleted(&self) -> u64 {
        self.expired_events
            + self.expired_metrics
            + self.retained_events
            + self.retained_raw_metrics
            + self.retained_aggregated_metrics
    }
}

/// Health status of the storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    pub entity_count: i64,
    pub event_count: i64,
    pub metric_count: i64,
    pub last_cleanup: Option<DateTime<Utc>>,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Size and schema information about the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub path: String,
    pub size_bytes: u64,
    pub page_count: i64,
    pub page_size: i64,
    pub freelist_pages: i64,
    pub schema_version: Option<i64>,
    pub schema_hash: Option<String>,
    pub entity_count: i64,
    pub event_count: i64,
    pub metric_count: i64,
    pub oldest_metric: Option<DateTime<Utc>>,
    pub newest_metric: Option<DateTime<Utc>>,
    pub last_cleanup: Option<DateTime<Utc>>,
}

/// Trait for the entity / event / metric store
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`; the store is shared between the
/// collector loops, the cleanup scheduler, the alert engine and the API.
///
/// ## Error Handling
///
/// Lookups of missing rows return `StorageError::NotFound`. Multi-row writes
/// are atomic: a failure rolls the whole batch back.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // ========================================================================
    // Entities
    // ========================================================================

    async fn create_entity(&self, entity: NewEntity) -> StorageResult<Entity>;

    async fn get_entity(&self, id: i64) -> StorageResult<Entity>;

    async fn get_entity_by_name(&self, entity_type: &str, name: &str) -> StorageResult<Entity>;

    /// Return the entity for `(type, name)`, creating it from `defaults` if absent.
    ///
    /// Never produces two rows for the same pair, even under concurrent callers.
    async fn get_or_create_entity(&self, defaults: NewEntity) -> StorageResult<Entity>;

    async fn update_entity(&self, id: i64, update: EntityUpdate) -> StorageResult<Entity>;

    /// Refresh `last_seen` and `updated_at`
    async fn touch_entity(&self, id: i64) -> StorageResult<()>;

    /// Delete an entity. Its metrics are removed, its events keep a NULL reference.
    async fn delete_entity(&self, id: i64) -> StorageResult<()>;

    /// Newest first by `updated_at`
    async fn list_entities(&self, filter: EntityFilter) -> StorageResult<Vec<Entity>>;

    // ========================================================================
    // Events
    // ========================================================================

    async fn create_event(&self, event: NewEvent) -> StorageResult<Event>;

    async fn get_event(&self, id: i64) -> StorageResult<Event>;

    async fn delete_event(&self, id: i64) -> StorageResult<()>;

    /// Newest first by `timestamp`
    async fn list_events(&self, filter: EventFilter) -> StorageResult<Vec<Event>>;

    // ========================================================================
    // Metrics
    // ========================================================================

    async fn create_metric(&self, metric: NewMetric) -> StorageResult<Metric>;

    /// Insert a batch of metrics inside one transaction
    ///
    /// Returns the number of rows written. Any failing row rolls back the
    /// whole batch.
    async fn create_metrics(&self, metrics: Vec<NewMetric>) -> StorageResult<usize>;

    async fn get_metric(&self, id: i64) -> StorageResult<Metric>;

    async fn delete_metric(&self, id: i64) -> StorageResult<()>;

    /// Newest first by `timestamp`
    async fn list_metrics(&self, filter: MetricFilter) -> StorageResult<Vec<Metric>>;

    /// Count/avg/min/max/latest for the most recent group matching `filter`.
    ///
    /// `limit`/`offset` are ignored. Returns `None` when nothing matches.
    async fn get_metric_summary(&self, filter: MetricFilter) -> StorageResult<Option<MetricSummary>>;

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Delete expired rows relative to the current time
    async fn cleanup(&self, policy: &RetentionPolicy) -> StorageResult<CleanupReport> {
        self.cleanup_at(policy, Utc::now()).await
    }

    /// Delete rows whose TTL passed before `now`, then rows without TTL that
    /// fall outside the retention windows, and record the cleanup time.
    async fn cleanup_at(
        &self,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> StorageResult<CleanupReport>;

    /// Compact the database file
    async fn vacuum(&self) -> StorageResult<()>;

    async fn get_system_health(&self) -> StorageResult<SystemHealth>;

    async fn get_database_info(&self) -> StorageResult<DatabaseInfo>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
