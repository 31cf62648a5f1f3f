//! Persistent store for entities, events and metrics
//!
//! ## Design
//!
//! - **Trait-based**: callers hold an `Arc<dyn StorageBackend>` so the
//!   adapter, the scheduler, the alert engine and the API share one store
//! - **Async**: all operations are async for use from Tokio tasks
//! - **Versioned schema**: [`migrations::Migrator`] applies checksummed
//!   migrations and refuses to run against a schema it does not recognise
//! - **Expiry**: rows carry an optional `expires_at`; everything else ages
//!   out through the [`RetentionPolicy`] windows
//!
//! ## Usage
//!
//! ```no_run
//! use watchtower::storage::{NewEntity, SqliteBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteBackend::new("./watchtower.db").await?;
//!     let server = store
//!         .get_or_create_entity(NewEntity::new("server", "localhost"))
//!         .await?;
//!     println!("server entity id {}", server.id);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod migrations;
pub mod schema;
pub mod sqlite;

pub use backend::{
    CleanupReport, DatabaseInfo, EntityFilter, EventFilter, MetricFilter, RetentionPolicy,
    StorageBackend, SystemHealth,
};
pub use error::{StorageError, StorageResult};
pub use schema::{
    AggregationLevel, Attributes, Entity, EntityStatus, EntityUpdate, Event, Metric,
    MetricSummary, NewEntity, NewEvent, NewMetric, Severity,
};
pub use sqlite::{SqliteBackend, SqliteOptions};
