//! Forward-only schema migrations
//!
//! Migrations are compiled into the binary as an ordered list of
//! [`Migration`] units. On startup the [`Migrator`]:
//!
//! 1. creates the `schema_migrations` tracking table and the singleton
//!    `metadata` row if they are missing,
//! 2. applies every migration whose version is not recorded yet, in version
//!    order, each inside its own transaction,
//! 3. records a SHA-256 checksum per applied migration and refreshes the
//!    schema hash stored in `metadata`.
//!
//! [`Migrator::validate`] recomputes the hash from the known migrations and
//! compares it with the stored one. A mismatch means the database was written
//! by a different build and is reported as [`StorageError::SchemaMismatch`].
//!
//! Only the most recently applied migration can be rolled back.

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::error::{StorageError, StorageResult};

/// One versioned schema change
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub up: &'static str,
    pub down: &'static str,
}

impl Migration {
    /// Hex encoded SHA-256 over the forward SQL
    pub fn checksum(&self) -> String {
        hex::encode(Sha256::digest(self.up.as_bytes()))
    }
}

/// A row of the `schema_migrations` table
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedMigration {
    pub version: i64,
    pub description: String,
    pub checksum: String,
    pub applied_at: i64,
}

/// All migrations known to this build, in version order
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create entities, events and metrics tables",
        up: r#"
CREATE TABLE entities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'unknown'
        CHECK (status IN ('active', 'inactive', 'error', 'maintenance', 'unknown')),
    details TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    last_seen INTEGER,
    UNIQUE (entity_type, name)
);

CREATE TABLE events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id INTEGER REFERENCES entities(id) ON DELETE SET NULL,
    timestamp INTEGER NOT NULL,
    event_type TEXT NOT NULL,
    severity TEXT NOT NULL
        CHECK (severity IN ('info', 'warning', 'error', 'critical')),
    message TEXT NOT NULL,
    details TEXT NOT NULL DEFAULT '{}',
    expires_at INTEGER
);

CREATE TABLE metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id INTEGER REFERENCES entities(id) ON DELETE CASCADE,
    timestamp INTEGER NOT NULL,
    metric_name TEXT NOT NULL,
    value REAL NOT NULL,
    aggregation_level TEXT NOT NULL DEFAULT 'raw'
        CHECK (aggregation_level IN ('raw', 'hourly', 'daily')),
    sample_count INTEGER NOT NULL DEFAULT 1,
    tags TEXT NOT NULL DEFAULT '{}',
    expires_at INTEGER
);
"#,
        down: r#"
DROP TABLE metrics;
DROP TABLE events;
DROP TABLE entities;
"#,
    },
    Migration {
        version: 2,
        description: "add range scan indexes",
        up: r#"
CREATE INDEX idx_metrics_entity_name_ts ON metrics (entity_id, metric_name, timestamp);
CREATE INDEX idx_metrics_timestamp ON metrics (timestamp);
CREATE INDEX idx_events_entity_ts ON events (entity_id, timestamp);
CREATE INDEX idx_events_timestamp ON events (timestamp);
CREATE INDEX idx_entities_updated_at ON entities (updated_at);
"#,
        down: r#"
DROP INDEX idx_entities_updated_at;
DROP INDEX idx_events_timestamp;
DROP INDEX idx_events_entity_ts;
DROP INDEX idx_metrics_timestamp;
DROP INDEX idx_metrics_entity_name_ts;
"#,
    },
    Migration {
        version: 3,
        description: "add retention indexes",
        up: r#"
CREATE INDEX idx_metrics_expires_at ON metrics (expires_at) WHERE expires_at IS NOT NULL;
CREATE INDEX idx_events_expires_at ON events (expires_at) WHERE expires_at IS NOT NULL;
CREATE INDEX idx_metrics_level_ts ON metrics (aggregation_level, timestamp);
"#,
        down: r#"
DROP INDEX idx_metrics_level_ts;
DROP INDEX idx_events_expires_at;
DROP INDEX idx_metrics_expires_at;
"#,
    },
];

/// Hash identifying a set of migrations (version + checksum of each, in order)
pub fn schema_hash<'a>(migrations: impl IntoIterator<Item = (i64, &'a str)>) -> String {
    let mut hasher = Sha256::new();
    for (version, checksum) in migrations {
        hasher.update(version.to_le_bytes());
        hasher.update(checksum.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Applies, validates and rolls back [`Migration`]s against a pool
pub struct Migrator {
    migrations: Vec<Migration>,
}

impl Default for Migrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Migrator {
    /// Migrator over the migrations compiled into this build
    pub fn new() -> Self {
        Self::with_migrations(MIGRATIONS)
    }

    /// Migrator over a custom list; the list is sorted by version
    pub fn with_migrations(migrations: &[Migration]) -> Self {
        let mut migrations = migrations.to_vec();
        migrations.sort_by_key(|m| m.version);
        Self { migrations }
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Hash expected in `metadata` once every known migration is applied
    pub fn expected_hash(&self) -> String {
        let checksums: Vec<(i64, String)> = self
            .migrations
            .iter()
            .map(|m| (m.version, m.checksum()))
            .collect();
        schema_hash(checksums.iter().map(|(v, c)| (*v, c.as_str())))
    }

    async fn ensure_bookkeeping(&self, pool: &Pool<Sqlite>) -> StorageResult<()> {
        let now = Utc::now().timestamp_millis();

        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                checksum TEXT NOT NULL,
                applied_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS metadata (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                schema_version INTEGER,
                schema_hash TEXT,
                last_cleanup INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        sqlx::query("INSERT OR IGNORE INTO metadata (id, created_at, updated_at) VALUES (1, ?, ?)")
            .bind(now)
            .bind(now)
            .execute(pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        Ok(())
    }

    /// Migrations recorded in the tracking table, oldest first
    pub async fn applied(&self, pool: &Pool<Sqlite>) -> StorageResult<Vec<AppliedMigration>> {
        self.ensure_bookkeeping(pool).await?;

        let rows = sqlx::query(
            "SELECT version, description, checksum, applied_at FROM schema_migrations ORDER BY version ASC",
        )
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| AppliedMigration {
                version: row.get("version"),
                description: row.get("description"),
                checksum: row.get("checksum"),
                applied_at: row.get("applied_at"),
            })
            .collect())
    }

    /// Known migrations not yet applied, in version order
    pub async fn pending(&self, pool: &Pool<Sqlite>) -> StorageResult<Vec<Migration>> {
        let applied = self.applied(pool).await?;
        Ok(self
            .migrations
            .iter()
            .filter(|m| !applied.iter().any(|a| a.version == m.version))
            .copied()
            .collect())
    }

    /// Apply all pending migrations; returns how many were applied
    #[instrument(skip_all)]
    pub async fn run(&self, pool: &Pool<Sqlite>) -> StorageResult<usize> {
        let pending = self.pending(pool).await?;

        if pending.is_empty() {
            debug!("schema is up to date");
            return Ok(0);
        }

        for migration in &pending {
            self.apply(pool, migration).await?;
        }

        info!("applied {} migration(s)", pending.len());
        Ok(pending.len())
    }

    async fn apply(&self, pool: &Pool<Sqlite>, migration: &Migration) -> StorageResult<()> {
        debug!(
            "applying migration {}: {}",
            migration.version, migration.description
        );

        let failed = |e: sqlx::Error| {
            StorageError::MigrationFailed(format!(
                "migration {} ({}) failed: {}",
                migration.version, migration.description, e
            ))
        };

        let mut tx = pool.begin().await.map_err(failed)?;

        sqlx::raw_sql(migration.up)
            .execute(&mut *tx)
            .await
            .map_err(failed)?;

        sqlx::query(
            "INSERT INTO schema_migrations (version, description, checksum, applied_at) VALUES (?, ?, ?, ?)",
        )
        .bind(migration.version)
        .bind(migration.description)
        .bind(migration.checksum())
        .bind(Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(failed)?;

        refresh_metadata(&mut tx).await.map_err(failed)?;

        tx.commit().await.map_err(failed)?;
        Ok(())
    }

    /// Reverse the most recently applied migration
    ///
    /// Returns the rolled back version, or `None` if nothing was applied.
    #[instrument(skip_all)]
    pub async fn rollback_last(&self, pool: &Pool<Sqlite>) -> StorageResult<Option<i64>> {
        let applied = self.applied(pool).await?;
        let Some(last) = applied.last() else {
            debug!("no migrations to roll back");
            return Ok(None);
        };

        let migration = self
            .migrations
            .iter()
            .find(|m| m.version == last.version)
            .ok_or_else(|| {
                StorageError::MigrationFailed(format!(
                    "cannot roll back unknown migration {}",
                    last.version
                ))
            })?;

        let failed = |e: sqlx::Error| {
            StorageError::MigrationFailed(format!(
                "rollback of migration {} failed: {}",
                migration.version, e
            ))
        };

        let mut tx = pool.begin().await.map_err(failed)?;

        sqlx::raw_sql(migration.down)
            .execute(&mut *tx)
            .await
            .map_err(failed)?;

        sqlx::query("DELETE FROM schema_migrations WHERE version = ?")
            .bind(migration.version)
            .execute(&mut *tx)
            .await
            .map_err(failed)?;

        refresh_metadata(&mut tx).await.map_err(failed)?;

        tx.commit().await.map_err(failed)?;

        warn!(
            "rolled back migration {}: {}",
            migration.version, migration.description
        );
        Ok(Some(migration.version))
    }

    /// Verify that the database schema matches this build
    #[instrument(skip_all)]
    pub async fn validate(&self, pool: &Pool<Sqlite>) -> StorageResult<()> {
        let applied = self.applied(pool).await?;

        for record in &applied {
            let Some(known) = self.migrations.iter().find(|m| m.version == record.version) else {
                return Err(StorageError::SchemaMismatch(format!(
                    "database contains migration {} which this build does not know",
                    record.version
                )));
            };

            if known.checksum() != record.checksum {
                return Err(StorageError::SchemaMismatch(format!(
                    "checksum of migration {} ({}) differs from the applied one",
                    record.version, record.description
                )));
            }
        }

        let stored: Option<String> =
            sqlx::query_scalar("SELECT schema_hash FROM metadata WHERE id = 1")
                .fetch_one(pool)
                .await?;

        let expected = self.expected_hash();
        match stored {
            Some(stored) if stored == expected => Ok(()),
            Some(stored) => Err(StorageError::SchemaMismatch(format!(
                "stored schema hash {} does not match expected {}",
                stored, expected
            ))),
            None => Err(StorageError::SchemaMismatch(
                "no schema hash recorded".to_string(),
            )),
        }
    }
}

/// Recompute version and hash from the tracking table inside `tx`
async fn refresh_metadata(tx: &mut sqlx::Transaction<'_, Sqlite>) -> Result<(), sqlx::Error> {
    let rows = sqlx::query("SELECT version, checksum FROM schema_migrations ORDER BY version ASC")
        .fetch_all(&mut **tx)
        .await?;

    let applied: Vec<(i64, String)> = rows
        .into_iter()
        .map(|row| (row.get("version"), row.get("checksum")))
        .collect();

    let version = applied.last().map(|(v, _)| *v);
    let hash = schema_hash(applied.iter().map(|(v, c)| (*v, c.as_str())));

    sqlx::query("UPDATE metadata SET schema_version = ?, schema_hash = ?, updated_at = ? WHERE id = 1")
        .bind(version)
        .bind(hash)
        .bind(Utc::now().timestamp_millis())
        .execute(&mut **tx)
        .await?;

    Ok(())
}
