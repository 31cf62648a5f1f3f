//! SQLite storage backend implementation
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers are not blocked by the collector loops writing
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Versioned, checksummed schema evolution (see [`super::migrations`])
//!
//! ## Time representation
//!
//! All timestamps are stored as Unix milliseconds in `INTEGER` columns.
//!
//! ## Limitations
//!
//! - **Concurrency**: Writes are serialized by SQLite itself
//! - **Distributed**: Single-machine only

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, QueryBuilder, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{
    CleanupReport, DatabaseInfo, EntityFilter, EventFilter, MetricFilter, RetentionPolicy,
    StorageBackend, SystemHealth,
};
use super::error::{StorageError, StorageResult};
use super::migrations::Migrator;
use super::schema::{
    AggregationLevel, Attributes, Entity, EntityUpdate, Event, Metric, MetricSummary, NewEntity,
    NewEvent, NewMetric,
};

const ENTITY_COLUMNS: &str =
    "id, entity_type, name, status, details, created_at, updated_at, last_seen";

const EVENT_COLUMNS: &str =
    "id, entity_id, timestamp, event_type, severity, message, details, expires_at";

const METRIC_COLUMNS: &str = "id, entity_id, timestamp, metric_name, value, aggregation_level, \
     sample_count, tags, expires_at";

/// Connection settings for [`SqliteBackend`]
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    pub max_connections: u32,
    /// Page cache size in KiB
    pub cache_size_kib: u32,
    pub busy_timeout: Duration,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            cache_size_kib: 16 * 1024,
            busy_timeout: Duration::from_secs(30),
        }
    }
}

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Open (or create) the database at `db_path` with default settings
    ///
    /// Pending migrations are applied and the schema is validated; a schema
    /// that does not match this build fails with [`StorageError::SchemaMismatch`].
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::with_options(db_path, SqliteOptions::default()).await
    }

    #[instrument(skip_all)]
    pub async fn with_options(
        db_path: impl AsRef<Path>,
        options: SqliteOptions,
    ) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite store at: {}", db_path_str);

        let connect_options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(options.busy_timeout)
            // negative value = size in KiB rather than pages
            .pragma("cache_size", format!("-{}", options.cache_size_kib))
            .pragma("temp_store", "MEMORY");

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .connect_with(connect_options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        let migrator = Migrator::new();
        migrator.run(&pool).await?;
        migrator.validate(&pool).await?;
        info!("database schema is up to date");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Reverse the most recently applied migration
    pub async fn rollback_last_migration(&self) -> StorageResult<Option<i64>> {
        Migrator::new().rollback_last(&self.pool).await
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn entity_from_row(row: &SqliteRow) -> StorageResult<Entity> {
        let status: String = row.try_get("status")?;
        let details: Option<String> = row.try_get("details")?;

        Ok(Entity {
            id: row.try_get("id")?,
            entity_type: row.try_get("entity_type")?,
            name: row.try_get("name")?,
            status: status.parse()?,
            details: Attributes::from_column(details.as_deref())?,
            created_at: Self::millis_to_timestamp(row.try_get("created_at")?),
            updated_at: Self::millis_to_timestamp(row.try_get("updated_at")?),
            last_seen: row
                .try_get::<Option<i64>, _>("last_seen")?
                .map(Self::millis_to_timestamp),
        })
    }

    fn event_from_row(row: &SqliteRow) -> StorageResult<Event> {
        let severity: String = row.try_get("severity")?;
        let details: Option<String> = row.try_get("details")?;

        Ok(Event {
            id: row.try_get("id")?,
            entity_id: row.try_get("entity_id")?,
            timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?),
            event_type: row.try_get("event_type")?,
            severity: severity.parse()?,
            message: row.try_get("message")?,
            details: Attributes::from_column(details.as_deref())?,
            expires_at: row
                .try_get::<Option<i64>, _>("expires_at")?
                .map(Self::millis_to_timestamp),
        })
    }

    fn metric_from_row(row: &SqliteRow) -> StorageResult<Metric> {
        let level: String = row.try_get("aggregation_level")?;
        let tags: Option<String> = row.try_get("tags")?;

        Ok(Metric {
            id: row.try_get("id")?,
            entity_id: row.try_get("entity_id")?,
            timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?),
            metric_name: row.try_get("metric_name")?,
            value: row.try_get("value")?,
            aggregation_level: level.parse()?,
            sample_count: row.try_get("sample_count")?,
            tags: Attributes::from_column(tags.as_deref())?,
            expires_at: row
                .try_get::<Option<i64>, _>("expires_at")?
                .map(Self::millis_to_timestamp),
        })
    }

    fn push_pagination(qb: &mut QueryBuilder<'_, Sqlite>, limit: Option<u32>, offset: Option<u32>) {
        if limit.is_none() && offset.is_none() {
            return;
        }
        // LIMIT -1 means unbounded in SQLite, which lets an offset stand alone
        qb.push(" LIMIT ")
            .push_bind(limit.map(i64::from).unwrap_or(-1))
            .push(" OFFSET ")
            .push_bind(offset.map(i64::from).unwrap_or(0));
    }

    fn push_metric_conditions(qb: &mut QueryBuilder<'_, Sqlite>, filter: &MetricFilter) {
        qb.push(" WHERE 1 = 1");
        if let Some(entity_id) = filter.entity_id {
            qb.push(" AND entity_id = ").push_bind(entity_id);
        }
        if let Some(name) = &filter.metric_name {
            qb.push(" AND metric_name = ").push_bind(name.clone());
        }
        if let Some(level) = filter.aggregation_level {
            qb.push(" AND aggregation_level = ")
                .push_bind(level.as_str());
        }
        if let Some(since) = &filter.since {
            qb.push(" AND timestamp >= ")
                .push_bind(Self::timestamp_to_millis(since));
        }
        if let Some(until) = &filter.until {
            qb.push(" AND timestamp <= ")
                .push_bind(Self::timestamp_to_millis(until));
        }
    }

    async fn insert_metric<'e, E>(executor: E, metric: &NewMetric) -> StorageResult<i64>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let tags = metric.tags.to_column()?;

        let result = sqlx::query(
            r#"
            INSERT INTO metrics (
                entity_id, timestamp, metric_name, value,
                aggregation_level, sample_count, tags, expires_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(metric.entity_id)
        .bind(Self::timestamp_to_millis(&metric.timestamp))
        .bind(&metric.metric_name)
        .bind(metric.value)
        .bind(metric.aggregation_level.as_str())
        .bind(metric.sample_count)
        .bind(tags)
        .bind(metric.expires_at.as_ref().map(Self::timestamp_to_millis))
        .execute(executor)
        .await
        .map_err(|e| {
            StorageError::QueryFailed(format!(
                "failed to insert metric '{}': {}",
                metric.metric_name, e
            ))
        })?;

        Ok(result.last_insert_rowid())
    }

    async fn count_rows(&self, table: &'static str) -> StorageResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn pragma_value(&self, pragma: &'static str) -> StorageResult<i64> {
        let sql = format!("PRAGMA {}", pragma);
        let value: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(value)
    }

    async fn last_cleanup(&self) -> StorageResult<Option<DateTime<Utc>>> {
        let last: Option<i64> =
            sqlx::query_scalar("SELECT last_cleanup FROM metadata WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?
                .flatten();
        Ok(last.map(Self::millis_to_timestamp))
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self, entity), fields(entity_type = %entity.entity_type, name = %entity.name))]
    async fn create_entity(&self, entity: NewEntity) -> StorageResult<Entity> {
        let now = Self::timestamp_to_millis(&Utc::now());
        let details = entity.details.to_column()?;

        let result = sqlx::query(
            r#"
            INSERT INTO entities (entity_type, name, status, details, created_at, updated_at, last_seen)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entity.entity_type)
        .bind(&entity.name)
        .bind(entity.status.as_str())
        .bind(details)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Validation(
                format!("entity {}/{} already exists", entity.entity_type, entity.name),
            ),
            other => other.into(),
        })?;

        self.get_entity(result.last_insert_rowid()).await
    }

    async fn get_entity(&self, id: i64) -> StorageResult<Entity> {
        let sql = format!("SELECT {} FROM entities WHERE id = ?", ENTITY_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::not_found("entity", id))?;

        Self::entity_from_row(&row)
    }

    async fn get_entity_by_name(&self, entity_type: &str, name: &str) -> StorageResult<Entity> {
        let sql = format!(
            "SELECT {} FROM entities WHERE entity_type = ? AND name = ?",
            ENTITY_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(entity_type)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::not_found("entity", format!("{}/{}", entity_type, name)))?;

        Self::entity_from_row(&row)
    }

    #[instrument(skip(self, defaults), fields(entity_type = %defaults.entity_type, name = %defaults.name))]
    async fn get_or_create_entity(&self, defaults: NewEntity) -> StorageResult<Entity> {
        let now = Self::timestamp_to_millis(&Utc::now());
        let details = defaults.details.to_column()?;

        // the UNIQUE (entity_type, name) constraint makes this a no-op for existing pairs
        let result = sqlx::query(
            r#"
            INSERT INTO entities (entity_type, name, status, details, created_at, updated_at, last_seen)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (entity_type, name) DO NOTHING
            "#,
        )
        .bind(&defaults.entity_type)
        .bind(&defaults.name)
        .bind(defaults.status.as_str())
        .bind(details)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!("created entity");
        }

        self.get_entity_by_name(&defaults.entity_type, &defaults.name)
            .await
    }

    async fn update_entity(&self, id: i64, update: EntityUpdate) -> StorageResult<Entity> {
        let details = update
            .details
            .as_ref()
            .map(Attributes::to_column)
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE entities
            SET status = COALESCE(?, status),
                details = COALESCE(?, details),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(update.status.map(|s| s.as_str()))
        .bind(details)
        .bind(Self::timestamp_to_millis(&Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("entity", id));
        }

        self.get_entity(id).await
    }

    async fn touch_entity(&self, id: i64) -> StorageResult<()> {
        let now = Self::timestamp_to_millis(&Utc::now());
        let result = sqlx::query("UPDATE entities SET last_seen = ?, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("entity", id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_entity(&self, id: i64) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM entities WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("entity", id));
        }
        Ok(())
    }

    async fn list_entities(&self, filter: EntityFilter) -> StorageResult<Vec<Entity>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM entities WHERE 1 = 1",
            ENTITY_COLUMNS
        ));

        if let Some(entity_type) = &filter.entity_type {
            qb.push(" AND entity_type = ").push_bind(entity_type.clone());
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(name) = &filter.name {
            qb.push(" AND name = ").push_bind(name.clone());
        }

        qb.push(" ORDER BY updated_at DESC, id DESC");
        Self::push_pagination(&mut qb, filter.limit, filter.offset);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::entity_from_row).collect()
    }

    async fn create_event(&self, event: NewEvent) -> StorageResult<Event> {
        let details = event.details.to_column()?;

        let result = sqlx::query(
            r#"
            INSERT INTO events (entity_id, timestamp, event_type, severity, message, details, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.entity_id)
        .bind(Self::timestamp_to_millis(&event.timestamp))
        .bind(&event.event_type)
        .bind(event.severity.as_str())
        .bind(&event.message)
        .bind(details)
        .bind(event.expires_at.as_ref().map(Self::timestamp_to_millis))
        .execute(&self.pool)
        .await?;

        self.get_event(result.last_insert_rowid()).await
    }

    async fn get_event(&self, id: i64) -> StorageResult<Event> {
        let sql = format!("SELECT {} FROM events WHERE id = ?", EVENT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::not_found("event", id))?;

        Self::event_from_row(&row)
    }

    async fn delete_event(&self, id: i64) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM events WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("event", id));
        }
        Ok(())
    }

    async fn list_events(&self, filter: EventFilter) -> StorageResult<Vec<Event>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM events WHERE 1 = 1",
            EVENT_COLUMNS
        ));

        if let Some(entity_id) = filter.entity_id {
            qb.push(" AND entity_id = ").push_bind(entity_id);
        }
        if let Some(event_type) = &filter.event_type {
            qb.push(" AND event_type = ").push_bind(event_type.clone());
        }
        if let Some(severity) = filter.severity {
            qb.push(" AND severity = ").push_bind(severity.as_str());
        }
        if let Some(since) = &filter.since {
            qb.push(" AND timestamp >= ")
                .push_bind(Self::timestamp_to_millis(since));
        }
        if let Some(until) = &filter.until {
            qb.push(" AND timestamp <= ")
                .push_bind(Self::timestamp_to_millis(until));
        }

        qb.push(" ORDER BY timestamp DESC, id DESC");
        Self::push_pagination(&mut qb, filter.limit, filter.offset);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::event_from_row).collect()
    }

    async fn create_metric(&self, metric: NewMetric) -> StorageResult<Metric> {
        let id = Self::insert_metric(&self.pool, &metric).await?;
        self.get_metric(id).await
    }

    #[instrument(skip(self, metrics), fields(count = metrics.len()))]
    async fn create_metrics(&self, metrics: Vec<NewMetric>) -> StorageResult<usize> {
        if metrics.is_empty() {
            return Ok(0);
        }

        debug!("inserting {} metrics into SQLite", metrics.len());

        let mut tx = self.pool.begin().await?;

        for metric in &metrics {
            // dropping `tx` on the error path rolls the whole batch back
            Self::insert_metric(&mut *tx, metric).await?;
        }

        tx.commit().await?;

        Ok(metrics.len())
    }

    async fn get_metric(&self, id: i64) -> StorageResult<Metric> {
        let sql = format!("SELECT {} FROM metrics WHERE id = ?", METRIC_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::not_found("metric", id))?;

        Self::metric_from_row(&row)
    }

    async fn delete_metric(&self, id: i64) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM metrics WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("metric", id));
        }
        Ok(())
    }

    async fn list_metrics(&self, filter: MetricFilter) -> StorageResult<Vec<Metric>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM metrics", METRIC_COLUMNS));
        Self::push_metric_conditions(&mut qb, &filter);
        qb.push(" ORDER BY timestamp DESC, id DESC");
        Self::push_pagination(&mut qb, filter.limit, filter.offset);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::metric_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn get_metric_summary(&self, filter: MetricFilter) -> StorageResult<Option<MetricSummary>> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT entity_id, metric_name,
                   COUNT(*) AS sample_total,
                   AVG(value) AS average_value,
                   MIN(value) AS min_value,
                   MAX(value) AS max_value,
                   MIN(timestamp) AS first_ts,
                   MAX(timestamp) AS last_ts
            FROM metrics
            "#,
        );
        Self::push_metric_conditions(&mut qb, &filter);
        qb.push(" GROUP BY entity_id, metric_name ORDER BY last_ts DESC LIMIT 1");

        let Some(group) = qb.build().fetch_optional(&self.pool).await? else {
            return Ok(None);
        };

        let entity_id: Option<i64> = group.try_get("entity_id")?;
        let metric_name: String = group.try_get("metric_name")?;
        let last_ts: i64 = group.try_get("last_ts")?;

        let mut latest_qb = QueryBuilder::<Sqlite>::new("SELECT value FROM metrics");
        let group_filter = MetricFilter {
            entity_id: None,
            metric_name: Some(metric_name.clone()),
            ..filter.clone()
        };
        Self::push_metric_conditions(&mut latest_qb, &group_filter);
        latest_qb
            .push(" AND entity_id IS ")
            .push_bind(entity_id)
            .push(" AND timestamp = ")
            .push_bind(last_ts)
            .push(" ORDER BY id DESC LIMIT 1");

        let latest: f64 = latest_qb.build_query_scalar().fetch_one(&self.pool).await?;

        Ok(Some(MetricSummary {
            entity_id,
            metric_name,
            count: group.try_get("sample_total")?,
            average: group.try_get("average_value")?,
            min: group.try_get("min_value")?,
            max: group.try_get("max_value")?,
            latest,
            first_timestamp: Self::millis_to_timestamp(group.try_get("first_ts")?),
            latest_timestamp: Self::millis_to_timestamp(last_ts),
        }))
    }

    #[instrument(skip(self, policy), fields(now = %now))]
    async fn cleanup_at(
        &self,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> StorageResult<CleanupReport> {
        let now_millis = Self::timestamp_to_millis(&now);
        let events_cutoff = Self::timestamp_to_millis(&policy.events_cutoff(now));
        let raw_cutoff = Self::timestamp_to_millis(&policy.raw_metrics_cutoff(now));
        let aggregated_cutoff = Self::timestamp_to_millis(&policy.aggregated_metrics_cutoff(now));

        let mut tx = self.pool.begin().await?;

        let expired_events =
            sqlx::query("DELETE FROM events WHERE expires_at IS NOT NULL AND expires_at <= ?")
                .bind(now_millis)
                .execute(&mut *tx)
                .await?
                .rows_affected();

        let expired_metrics =
            sqlx::query("DELETE FROM metrics WHERE expires_at IS NOT NULL AND expires_at <= ?")
                .bind(now_millis)
                .execute(&mut *tx)
                .await?
                .rows_affected();

        let retained_events =
            sqlx::query("DELETE FROM events WHERE expires_at IS NULL AND timestamp < ?")
                .bind(events_cutoff)
                .execute(&mut *tx)
                .await?
                .rows_affected();

        let retained_raw_metrics = sqlx::query(
            "DELETE FROM metrics WHERE expires_at IS NULL AND aggregation_level = ? AND timestamp < ?",
        )
        .bind(AggregationLevel::Raw.as_str())
        .bind(raw_cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let retained_aggregated_metrics = sqlx::query(
            "DELETE FROM metrics WHERE expires_at IS NULL AND aggregation_level != ? AND timestamp < ?",
        )
        .bind(AggregationLevel::Raw.as_str())
        .bind(aggregated_cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query("UPDATE metadata SET last_cleanup = ?, updated_at = ? WHERE id = 1")
            .bind(now_millis)
            .bind(Self::timestamp_to_millis(&Utc::now()))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let freelist = self.pragma_value("freelist_count").await?;
        let page_size = self.pragma_value("page_size").await?;

        let report = CleanupReport {
            expired_events,
            expired_metrics,
            retained_events,
            retained_raw_metrics,
            retained_aggregated_metrics,
            reclaimable_bytes: (freelist.max(0) * page_size.max(0)) as u64,
            ran_at: Some(now),
        };

        if report.total_deleted() > 0 {
            info!(
                "cleanup deleted {} rows ({} reclaimable bytes)",
                report.total_deleted(),
                report.reclaimable_bytes
            );
        } else {
            debug!("cleanup found nothing to delete");
        }

        Ok(report)
    }

    #[instrument(skip(self))]
    async fn vacuum(&self) -> StorageResult<()> {
        info!("vacuuming database");
        sqlx::query("VACUUM").execute(&self.pool).await?;
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_system_health(&self) -> StorageResult<SystemHealth> {
        if let Err(e) = sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            warn!("health check failed: {}", e);
            return Ok(SystemHealth {
                healthy: false,
                message: format!("health check failed: {}", e),
                entity_count: 0,
                event_count: 0,
                metric_count: 0,
                last_cleanup: None,
                metadata: HashMap::new(),
            });
        }

        let mut metadata = HashMap::new();
        metadata.insert("backend".to_string(), "sqlite".to_string());
        metadata.insert("db_path".to_string(), self.db_path.clone());

        Ok(SystemHealth {
            healthy: true,
            message: "SQLite store operational".to_string(),
            entity_count: self.count_rows("entities").await?,
            event_count: self.count_rows("events").await?,
            metric_count: self.count_rows("metrics").await?,
            last_cleanup: self.last_cleanup().await?,
            metadata,
        })
    }

    #[instrument(skip(self))]
    async fn get_database_info(&self) -> StorageResult<DatabaseInfo> {
        let size_bytes = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        let schema = sqlx::query("SELECT schema_version, schema_hash FROM metadata WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        let (schema_version, schema_hash) = match schema {
            Some(row) => (row.try_get("schema_version")?, row.try_get("schema_hash")?),
            None => (None, None),
        };

        let (oldest, newest): (Option<i64>, Option<i64>) =
            sqlx::query_as("SELECT MIN(timestamp), MAX(timestamp) FROM metrics")
                .fetch_one(&self.pool)
                .await?;

        Ok(DatabaseInfo {
            path: self.db_path.clone(),
            size_bytes,
            page_count: self.pragma_value("page_count").await?,
            page_size: self.pragma_value("page_size").await?,
            freelist_pages: self.pragma_value("freelist_count").await?,
            schema_version,
            schema_hash,
            entity_count: self.count_rows("entities").await?,
            event_count: self.count_rows("events").await?,
            metric_count: self.count_rows("metrics").await?,
            oldest_metric: oldest.map(Self::millis_to_timestamp),
            newest_metric: newest.map(Self::millis_to_timestamp),
            last_cleanup: self.last_cleanup().await?,
        })
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite store");
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::{EntityStatus, Severity};
    use assert_matches::assert_matches;
    use chrono::Duration as ChronoDuration;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    async fn test_backend() -> (tempfile::TempDir, SqliteBackend) {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let backend = SqliteBackend::new(&db_path).await.unwrap();
        (temp_dir, backend)
    }

    /// A timestamp that survives the millisecond round trip unchanged
    fn ts(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    #[tokio::test]
    async fn test_sqlite_backend_creation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let backend = SqliteBackend::new(&db_path).await;
        assert!(backend.is_ok());
    }

    #[tokio::test]
    async fn test_reopen_existing_database() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let backend = SqliteBackend::new(&db_path).await.unwrap();
        backend
            .create_entity(NewEntity::new("server", "localhost"))
            .await
            .unwrap();
        backend.close().await.unwrap();

        let reopened = SqliteBackend::new(&db_path).await.unwrap();
        let entity = reopened
            .get_entity_by_name("server", "localhost")
            .await
            .unwrap();
        assert_eq!(entity.name, "localhost");
    }

    #[tokio::test]
    async fn test_entity_crud() {
        let (_dir, backend) = test_backend().await;

        let created = backend
            .create_entity(
                NewEntity::new("service", "nginx")
                    .with_status(EntityStatus::Active)
                    .with_details(Attributes::new().with("unit", "nginx.service")),
            )
            .await
            .unwrap();
        assert_eq!(created.status, EntityStatus::Active);
        assert_eq!(created.details.get_str("unit"), Some("nginx.service"));

        let updated = backend
            .update_entity(
                created.id,
                EntityUpdate {
                    status: Some(EntityStatus::Error),
                    details: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, EntityStatus::Error);
        // details untouched when not part of the update
        assert_eq!(updated.details.get_str("unit"), Some("nginx.service"));

        backend.touch_entity(created.id).await.unwrap();
        assert!(backend.get_entity(created.id).await.unwrap().last_seen.is_some());

        backend.delete_entity(created.id).await.unwrap();
        assert_matches!(
            backend.get_entity(created.id).await,
            Err(StorageError::NotFound { kind: "entity", .. })
        );
    }

    #[tokio::test]
    async fn test_missing_rows_are_not_found() {
        let (_dir, backend) = test_backend().await;

        assert!(backend.get_entity(1).await.unwrap_err().is_not_found());
        assert!(
            backend
                .get_entity_by_name("site", "nope")
                .await
                .unwrap_err()
                .is_not_found()
        );
        assert!(backend.get_event(1).await.unwrap_err().is_not_found());
        assert!(backend.get_metric(1).await.unwrap_err().is_not_found());
        assert!(backend.touch_entity(1).await.unwrap_err().is_not_found());
        assert!(backend.delete_event(1).await.unwrap_err().is_not_found());
        assert!(backend.delete_metric(1).await.unwrap_err().is_not_found());
        assert!(
            backend
                .update_entity(1, EntityUpdate::default())
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_create_duplicate_entity_is_rejected() {
        let (_dir, backend) = test_backend().await;

        backend
            .create_entity(NewEntity::new("disk", "/"))
            .await
            .unwrap();
        assert_matches!(
            backend.create_entity(NewEntity::new("disk", "/")).await,
            Err(StorageError::Validation(_))
        );

        // same name under another type is a different entity
        backend
            .create_entity(NewEntity::new("site", "/"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_get_or_create_never_duplicates() {
        let (_dir, backend) = test_backend().await;

        let first = backend
            .get_or_create_entity(NewEntity::new("server", "localhost"))
            .await
            .unwrap();
        let second = backend
            .get_or_create_entity(
                NewEntity::new("server", "localhost").with_status(EntityStatus::Error),
            )
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        // defaults only apply on creation
        assert_eq!(second.status, EntityStatus::Unknown);

        let all = backend
            .list_entities(EntityFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_get_or_create_concurrent_callers() {
        let (_dir, backend) = test_backend().await;
        let backend = Arc::new(backend);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let backend = backend.clone();
                tokio::spawn(async move {
                    backend
                        .get_or_create_entity(NewEntity::new("site", "example.com"))
                        .await
                        .unwrap()
                        .id
                })
            })
            .collect();

        let ids: Vec<i64> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        let filter = EntityFilter {
            entity_type: Some("site".to_string()),
            ..EntityFilter::default()
        };
        assert_eq!(backend.list_entities(filter).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_entity_cascades_metrics_and_nullifies_events() {
        let (_dir, backend) = test_backend().await;

        let entity = backend
            .create_entity(NewEntity::new("disk", "/data"))
            .await
            .unwrap();

        let metric = backend
            .create_metric(NewMetric::raw(Some(entity.id), "disk_usage", 42.0, Utc::now()))
            .await
            .unwrap();
        let event = backend
            .create_event(
                NewEvent::new("disk_full", Severity::Warning, "disk almost full")
                    .for_entity(entity.id),
            )
            .await
            .unwrap();

        backend.delete_entity(entity.id).await.unwrap();

        assert!(backend.get_metric(metric.id).await.unwrap_err().is_not_found());

        let event = backend.get_event(event.id).await.unwrap();
        assert_eq!(event.entity_id, None);
        assert_eq!(event.message, "disk almost full");
    }

    #[tokio::test]
    async fn test_list_entities_filters_and_ordering() {
        let (_dir, backend) = test_backend().await;

        for name in ["a", "b", "c"] {
            backend
                .create_entity(NewEntity::new("service", name).with_status(EntityStatus::Active))
                .await
                .unwrap();
        }
        backend
            .create_entity(NewEntity::new("site", "d").with_status(EntityStatus::Error))
            .await
            .unwrap();

        let services = backend
            .list_entities(EntityFilter {
                entity_type: Some("service".to_string()),
                ..EntityFilter::default()
            })
            .await
            .unwrap();
        let names: Vec<_> = services.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["c", "b", "a"]);

        let errored = backend
            .list_entities(EntityFilter {
                status: Some(EntityStatus::Error),
                ..EntityFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(errored.len(), 1);
        assert_eq!(errored[0].name, "d");

        let page = backend
            .list_entities(EntityFilter {
                entity_type: Some("service".to_string()),
                limit: Some(1),
                offset: Some(1),
                ..EntityFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "b");
    }

    #[tokio::test]
    async fn test_list_events_filters() {
        let (_dir, backend) = test_backend().await;
        let base = Utc::now().timestamp_millis();

        let entity = backend
            .create_entity(NewEntity::new("service", "sshd"))
            .await
            .unwrap();

        backend
            .create_event(
                NewEvent::new("service_state_change", Severity::Error, "sshd failed")
                    .for_entity(entity.id)
                    .at(ts(base)),
            )
            .await
            .unwrap();
        backend
            .create_event(
                NewEvent::new("service_state_change", Severity::Info, "sshd running")
                    .for_entity(entity.id)
                    .at(ts(base + 1_000)),
            )
            .await
            .unwrap();
        backend
            .create_event(NewEvent::new("install", Severity::Info, "installed nginx").at(ts(base + 2_000)))
            .await
            .unwrap();

        let all = backend.list_events(EventFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].event_type, "install");

        let for_entity = backend
            .list_events(EventFilter {
                entity_id: Some(entity.id),
                ..EventFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(for_entity.len(), 2);
        assert_eq!(for_entity[0].message, "sshd running");

        let errors = backend
            .list_events(EventFilter {
                severity: Some(Severity::Error),
                ..EventFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(errors.len(), 1);

        let window = backend
            .list_events(EventFilter {
                since: Some(ts(base + 500)),
                until: Some(ts(base + 1_500)),
                ..EventFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].timestamp, ts(base + 1_000));
    }

    #[tokio::test]
    async fn test_batch_insert_and_list_metrics() {
        let (_dir, backend) = test_backend().await;
        let base = Utc::now().timestamp_millis();

        let entity = backend
            .create_entity(NewEntity::new("server", "localhost"))
            .await
            .unwrap();

        let rows: Vec<NewMetric> = (0..10)
            .map(|i| {
                NewMetric::raw(Some(entity.id), "cpu_usage", i as f64, ts(base + i * 1_000))
                    .with_tag("cores", 4)
            })
            .collect();

        assert_eq!(backend.create_metrics(rows).await.unwrap(), 10);

        let latest = backend
            .list_metrics(MetricFilter {
                limit: Some(3),
                ..MetricFilter::for_metric(entity.id, "cpu_usage")
            })
            .await
            .unwrap();
        let values: Vec<f64> = latest.iter().map(|m| m.value).collect();
        assert_eq!(values, vec![9.0, 8.0, 7.0]);
        assert_eq!(latest[0].tags.get("cores"), Some(&serde_json::json!(4)));

        let range = backend
            .list_metrics(MetricFilter {
                since: Some(ts(base + 2_000)),
                until: Some(ts(base + 8_000)),
                ..MetricFilter::for_metric(entity.id, "cpu_usage")
            })
            .await
            .unwrap();
        assert_eq!(range.len(), 7);

        let hourly = backend
            .list_metrics(MetricFilter {
                aggregation_level: Some(AggregationLevel::Hourly),
                ..MetricFilter::default()
            })
            .await
            .unwrap();
        assert!(hourly.is_empty());
    }

    #[tokio::test]
    async fn test_batch_insert_rolls_back_on_failure() {
        let (_dir, backend) = test_backend().await;

        let entity = backend
            .create_entity(NewEntity::new("server", "localhost"))
            .await
            .unwrap();

        let batch = vec![
            NewMetric::raw(Some(entity.id), "cpu_usage", 1.0, Utc::now()),
            // unknown entity violates the foreign key
            NewMetric::raw(Some(9_999), "cpu_usage", 2.0, Utc::now()),
        ];

        assert_matches!(
            backend.create_metrics(batch).await,
            Err(StorageError::QueryFailed(_))
        );

        let stored = backend.list_metrics(MetricFilter::default()).await.unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_metric_summary_round_trip() {
        let (_dir, backend) = test_backend().await;
        let base = Utc::now().timestamp_millis();

        let entity = backend
            .create_entity(NewEntity::new("site", "example.com"))
            .await
            .unwrap();

        let rows = [100.0, 200.0, 300.0]
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                NewMetric::raw(Some(entity.id), "response_time_ms", v, ts(base + i as i64 * 60_000))
            })
            .collect();
        backend.create_metrics(rows).await.unwrap();

        let summary = backend
            .get_metric_summary(MetricFilter::for_metric(entity.id, "response_time_ms"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(summary.count, 3);
        assert_eq!(summary.min, 100.0);
        assert_eq!(summary.max, 300.0);
        assert_eq!(summary.average, 200.0);
        assert_eq!(summary.latest, 300.0);
        assert_eq!(summary.latest_timestamp, ts(base + 120_000));
        assert_eq!(summary.first_timestamp, ts(base));
    }

    #[tokio::test]
    async fn test_metric_summary_latest_is_by_timestamp_not_insert_order() {
        let (_dir, backend) = test_backend().await;
        let base = Utc::now().timestamp_millis();

        let entity = backend
            .create_entity(NewEntity::new("site", "example.com"))
            .await
            .unwrap();

        backend
            .create_metrics(vec![
                NewMetric::raw(Some(entity.id), "response_time_ms", 50.0, ts(base + 5_000)),
                NewMetric::raw(Some(entity.id), "response_time_ms", 70.0, ts(base)),
            ])
            .await
            .unwrap();

        let summary = backend
            .get_metric_summary(MetricFilter::for_metric(entity.id, "response_time_ms"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.latest, 50.0);
    }

    #[tokio::test]
    async fn test_metric_summary_without_match() {
        let (_dir, backend) = test_backend().await;
        let summary = backend
            .get_metric_summary(MetricFilter::for_metric(1, "response_time_ms"))
            .await
            .unwrap();
        assert!(summary.is_none());
    }

    #[tokio::test]
    async fn test_ttl_cleanup_boundaries() {
        let (_dir, backend) = test_backend().await;
        let now = Utc::now();
        let policy = RetentionPolicy::default();

        let entity = backend
            .create_entity(NewEntity::new("server", "localhost"))
            .await
            .unwrap();
        let metric = backend
            .create_metric(
                NewMetric::raw(Some(entity.id), "cpu_usage", 10.0, now)
                    .expires_after(ChronoDuration::days(30)),
            )
            .await
            .unwrap();

        let report = backend
            .cleanup_at(&policy, now + ChronoDuration::days(29))
            .await
            .unwrap();
        assert_eq!(report.expired_metrics, 0);
        assert!(backend.get_metric(metric.id).await.is_ok());

        let report = backend
            .cleanup_at(&policy, now + ChronoDuration::days(31))
            .await
            .unwrap();
        assert_eq!(report.expired_metrics, 1);
        let remaining = backend.list_metrics(MetricFilter::default()).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn test_retention_windows_apply_only_without_ttl() {
        let (_dir, backend) = test_backend().await;
        let now = Utc::now();
        let policy = RetentionPolicy {
            events_days: 7,
            raw_metrics_days: 30,
            aggregated_metrics_days: 90,
        };

        let old = now - ChronoDuration::days(40);
        backend
            .create_metrics(vec![
                NewMetric::raw(None, "cpu_usage", 1.0, old),
                NewMetric::raw(None, "cpu_usage", 2.0, old).aggregated(AggregationLevel::Hourly, 60),
                // explicit TTL wins over the window
                NewMetric::raw(None, "cpu_usage", 3.0, old).expires_after(ChronoDuration::days(60)),
                NewMetric::raw(None, "cpu_usage", 4.0, now),
            ])
            .await
            .unwrap();
        backend
            .create_event(NewEvent::new("old", Severity::Info, "old").at(now - ChronoDuration::days(8)))
            .await
            .unwrap();
        backend
            .create_event(NewEvent::new("new", Severity::Info, "new").at(now))
            .await
            .unwrap();

        let report = backend.cleanup_at(&policy, now).await.unwrap();
        assert_eq!(report.retained_raw_metrics, 1);
        assert_eq!(report.retained_aggregated_metrics, 0);
        assert_eq!(report.retained_events, 1);
        assert_eq!(report.total_deleted(), 2);

        let mut values: Vec<f64> = backend
            .list_metrics(MetricFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.value)
            .collect();
        values.sort_by(f64::total_cmp);
        assert_eq!(values, vec![2.0, 3.0, 4.0]);

        let health = backend.get_system_health().await.unwrap();
        assert_eq!(
            health.last_cleanup.map(|t| t.timestamp_millis()),
            Some(now.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn test_health_and_database_info() {
        let (_dir, backend) = test_backend().await;

        backend
            .create_metric(NewMetric::raw(None, "load_1m", 0.5, Utc::now()))
            .await
            .unwrap();

        let health = backend.get_system_health().await.unwrap();
        assert!(health.healthy);
        assert!(health.message.contains("operational"));
        assert_eq!(health.metric_count, 1);
        assert!(health.last_cleanup.is_none());

        let info = backend.get_database_info().await.unwrap();
        assert_eq!(info.metric_count, 1);
        assert!(info.page_size > 0);
        assert_eq!(
            info.schema_version,
            crate::storage::migrations::MIGRATIONS.last().map(|m| m.version)
        );
        assert!(info.schema_hash.is_some());
        assert!(info.newest_metric.is_some());
    }

    #[tokio::test]
    async fn test_vacuum_succeeds() {
        let (_dir, backend) = test_backend().await;
        backend
            .create_metrics(
                (0..100)
                    .map(|i| NewMetric::raw(None, "cpu_usage", i as f64, Utc::now()))
                    .collect(),
            )
            .await
            .unwrap();
        backend
            .cleanup_at(&RetentionPolicy::default(), Utc::now() + ChronoDuration::days(365))
            .await
            .unwrap();

        backend.vacuum().await.unwrap();
    }
}
