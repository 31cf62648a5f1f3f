//! Row types for the entity / event / metric schema
//!
//! ## Design
//!
//! The store is deliberately generic: every monitored resource is an
//! [`Entity`], every discrete occurrence an [`Event`], and every numeric
//! sample a [`Metric`]. Domain specifics (which disk, which CPU breakdown,
//! which URL) live in the [`Attributes`] bag attached to each row, which is
//! stored as a JSON `TEXT` column.
//!
//! Typed columns are kept for everything that is filtered or indexed on
//! (entity type/name/status, event type/severity, metric name/level and
//! timestamps).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{StorageError, StorageResult};

/// Free-form key/value bag used for entity details, event details and metric tags.
///
/// Keys are ordered so the serialized column is stable across writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, Value>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Serialize into the representation stored in the database column
    pub fn to_column(&self) -> StorageResult<String> {
        serde_json::to_string(&self.0).map_err(|e| {
            StorageError::SerializationError(format!("failed to serialize attributes: {}", e))
        })
    }

    /// Parse a database column; NULL and empty strings decode to an empty bag
    pub fn from_column(column: Option<&str>) -> StorageResult<Self> {
        match column {
            None => Ok(Self::default()),
            Some(raw) if raw.trim().is_empty() => Ok(Self::default()),
            Some(raw) => serde_json::from_str(raw).map(Self).map_err(|e| {
                StorageError::SerializationError(format!("failed to deserialize attributes: {}", e))
            }),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Generates `as_str`, `Display` and `FromStr` for a closed string enum.
macro_rules! string_enum {
    ($name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = StorageError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(StorageError::Validation(format!(
                        "unknown {} '{}'",
                        $label, other
                    ))),
                }
            }
        }
    };
}

/// Lifecycle status of a monitored entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Active,
    Inactive,
    Error,
    Maintenance,
    #[default]
    Unknown,
}

string_enum!(EntityStatus, "entity status", {
    Active => "active",
    Inactive => "inactive",
    Error => "error",
    Maintenance => "maintenance",
    Unknown => "unknown",
});

/// Severity shared by events and alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

string_enum!(Severity, "severity", {
    Info => "info",
    Warning => "warning",
    Error => "error",
    Critical => "critical",
});

/// Granularity of a metric row
///
/// This is a closed set: any other value coming in from a filter is a
/// validation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationLevel {
    #[default]
    Raw,
    Hourly,
    Daily,
}

string_enum!(AggregationLevel, "aggregation level", {
    Raw => "raw",
    Hourly => "hourly",
    Daily => "daily",
});

impl AggregationLevel {
    pub fn is_aggregated(&self) -> bool {
        !matches!(self, AggregationLevel::Raw)
    }
}

/// A monitored resource (server, service, site, disk, network interface)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub entity_type: String,
    pub name: String,
    pub status: EntityStatus,
    pub details: Attributes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Values for creating an entity
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntity {
    pub entity_type: String,
    pub name: String,
    pub status: EntityStatus,
    pub details: Attributes,
}

impl NewEntity {
    pub fn new(entity_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            name: name.into(),
            status: EntityStatus::Unknown,
            details: Attributes::new(),
        }
    }

    pub fn with_status(mut self, status: EntityStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_details(mut self, details: Attributes) -> Self {
        self.details = details;
        self
    }
}

/// Partial update of an entity; `None` leaves the column untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityUpdate {
    pub status: Option<EntityStatus>,
    pub details: Option<Attributes>,
}

/// A discrete, timestamped occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub entity_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub severity: Severity,
    pub message: String,
    pub details: Attributes,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub entity_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub severity: Severity,
    pub message: String,
    pub details: Attributes,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            entity_id: None,
            timestamp: Utc::now(),
            event_type: event_type.into(),
            severity,
            message: message.into(),
            details: Attributes::new(),
            expires_at: None,
        }
    }

    pub fn for_entity(mut self, entity_id: i64) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_details(mut self, details: Attributes) -> Self {
        self.details = details;
        self
    }

    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// One time-series sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: i64,
    pub entity_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub metric_name: String,
    pub value: f64,
    pub aggregation_level: AggregationLevel,
    /// Number of raw samples folded into this row (1 for raw rows)
    pub sample_count: i64,
    pub tags: Attributes,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMetric {
    pub entity_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub metric_name: String,
    pub value: f64,
    pub aggregation_level: AggregationLevel,
    pub sample_count: i64,
    pub tags: Attributes,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewMetric {
    /// A raw sample with no tags and no expiry
    pub fn raw(
        entity_id: Option<i64>,
        metric_name: impl Into<String>,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id,
            timestamp,
            metric_name: metric_name.into(),
            value,
            aggregation_level: AggregationLevel::Raw,
            sample_count: 1,
            tags: Attributes::new(),
            expires_at: None,
        }
    }

    pub fn aggregated(mut self, level: AggregationLevel, sample_count: i64) -> Self {
        self.aggregation_level = level;
        self.sample_count = sample_count;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.tags.insert(key, value);
        self
    }

    pub fn with_tags(mut self, tags: Attributes) -> Self {
        self.tags = tags;
        self
    }

    /// Expire the row `ttl` after its own timestamp
    ///
    /// A TTL that runs past the representable date range means no expiry.
    pub fn expires_after(mut self, ttl: Duration) -> Self {
        self.expires_at = self.timestamp.checked_add_signed(ttl);
        self
    }
}

/// Aggregate over the most recent (entity, metric) group matching a filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub entity_id: Option<i64>,
    pub metric_name: String,
    pub count: i64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    /// Value of the newest row by timestamp
    pub latest: f64,
    pub first_timestamp: DateTime<Utc>,
    pub latest_timestamp: DateTime<Utc>,
}
