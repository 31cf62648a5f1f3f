//! Agent configuration
//!
//! The configuration is a single JSON file. Every section is optional and
//! falls back to defaults, so `{}` is a valid configuration.
//!
//! ```json
//! {
//!   "storage": { "path": "/var/lib/watchtower/watchtower.db",
//!                "retention": { "raw_metrics_days": 30, "cleanup_interval": "1h" } },
//!   "alerts": {
//!     "evaluation_interval": "30s",
//!     "notifiers": [ { "name": "ops", "type": "discord", "url": "https://discord.com/api/webhooks/..." } ],
//!     "rules": [ { "id": "cpu-high", "name": "CPU high", "severity": "critical",
//!                  "condition": { "type": "system", "cpu_threshold": 90.0 } } ]
//!   },
//!   "collectors": { "services": { "units": ["nginx", "sshd"] } },
//!   "api": { "listen": "127.0.0.1:8080" }
//! }
//! ```
//!
//! `WATCHTOWER_DB_PATH` and `WATCHTOWER_API_ADDR` override the file after it
//! is parsed (the binary loads a `.env` file first).

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::alerts::AlertRule;
use crate::storage::RetentionPolicy;
use crate::util::{self, HumanDuration};

const MAX_RETENTION_DAYS: u64 = 36_500;
const MAX_RETENTION: HumanDuration = HumanDuration::from_days(MAX_RETENTION_DAYS);

/// Errors raised while loading the configuration
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read
    Io { path: PathBuf, source: std::io::Error },

    /// The file is not valid JSON or does not match the expected shape
    /// (this includes unparsable durations)
    Parse(serde_json::Error),

    /// The file parsed but describes an unusable configuration
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read config file {}: {}", path.display(), source)
            }
            ConfigError::Parse(err) => write!(f, "invalid configuration file: {}", err),
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse(err) => Some(err),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub alerts: AlertingConfig,

    #[serde(default)]
    pub collectors: CollectorsConfig,

    #[serde(default)]
    pub api: ApiConfig,
}

/// SQLite store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default)]
    pub retention: RetentionSettings,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
            retention: RetentionSettings::default(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./watchtower.db")
}

fn default_max_connections() -> u32 {
    5
}

/// Retention windows, TTLs and cleanup cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionSettings {
    #[serde(default = "default_events_days")]
    pub events_days: u32,

    #[serde(default = "default_raw_metrics_days")]
    pub raw_metrics_days: u32,

    #[serde(default = "default_aggregated_metrics_days")]
    pub aggregated_metrics_days: u32,

    /// Expiry stamped on raw samples when they are written
    #[serde(default = "default_raw_metrics_ttl")]
    pub raw_metrics_ttl: HumanDuration,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: HumanDuration,

    /// Run `VACUUM` once a cleanup leaves more than this many free bytes
    #[serde(default = "default_vacuum_threshold")]
    pub vacuum_threshold_bytes: u64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            events_days: default_events_days(),
            raw_metrics_days: default_raw_metrics_days(),
            aggregated_metrics_days: default_aggregated_metrics_days(),
            raw_metrics_ttl: default_raw_metrics_ttl(),
            cleanup_interval: default_cleanup_interval(),
            vacuum_threshold_bytes: default_vacuum_threshold(),
        }
    }
}

impl RetentionSettings {
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            events_days: self.events_days,
            raw_metrics_days: self.raw_metrics_days,
            aggregated_metrics_days: self.aggregated_metrics_days,
        }
    }
}

fn default_events_days() -> u32 {
    30
}

fn default_raw_metrics_days() -> u32 {
    30
}

fn default_aggregated_metrics_days() -> u32 {
    365
}

fn default_raw_metrics_ttl() -> HumanDuration {
    HumanDuration::from_days(30)
}

fn default_cleanup_interval() -> HumanDuration {
    HumanDuration::from_hours(1)
}

fn default_vacuum_threshold() -> u64 {
    1024 * 1024
}

/// Rule engine and notification channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_evaluation_interval")]
    pub evaluation_interval: HumanDuration,

    /// Resolved alerts kept in memory
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Applied to rules without their own `min_interval`
    #[serde(default = "default_min_interval")]
    pub default_min_interval: HumanDuration,

    /// Applied to rules without their own `max_notifications`
    #[serde(default = "default_max_notifications")]
    pub default_max_notifications: u32,

    #[serde(default)]
    pub rules: Vec<AlertRule>,

    #[serde(default)]
    pub notifiers: Vec<NotifierConfig>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            evaluation_interval: default_evaluation_interval(),
            max_history: default_max_history(),
            default_min_interval: default_min_interval(),
            default_max_notifications: default_max_notifications(),
            rules: Vec::new(),
            notifiers: Vec::new(),
        }
    }
}

fn default_evaluation_interval() -> HumanDuration {
    HumanDuration::from_secs(30)
}

fn default_max_history() -> usize {
    100
}

fn default_min_interval() -> HumanDuration {
    HumanDuration::from_mins(5)
}

fn default_max_notifications() -> u32 {
    10
}

/// A named notification channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Referenced from `AlertRule::notify`
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(flatten)]
    pub kind: NotifierKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifierKind {
    Webhook {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    Discord {
        url: String,
        /// Mentioned in the message content when set
        user_id: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectorsConfig {
    #[serde(default)]
    pub system: SystemCollectorConfig,

    #[serde(default)]
    pub services: ServiceCollectorConfig,

    #[serde(default)]
    pub http: HttpCollectorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemCollectorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_system_interval")]
    pub interval: HumanDuration,
}

impl Default for SystemCollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_system_interval(),
        }
    }
}

fn default_system_interval() -> HumanDuration {
    HumanDuration::from_secs(30)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCollectorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_service_interval")]
    pub interval: HumanDuration,

    /// systemd units to query; `.service` is appended when missing
    #[serde(default)]
    pub units: Vec<String>,
}

impl Default for ServiceCollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_service_interval(),
            units: Vec::new(),
        }
    }
}

fn default_service_interval() -> HumanDuration {
    HumanDuration::from_secs(60)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpCollectorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_http_interval")]
    pub interval: HumanDuration,

    /// Per-request timeout for checks without their own
    #[serde(default = "default_http_timeout")]
    pub timeout: HumanDuration,

    #[serde(default)]
    pub checks: Vec<HttpCheckConfig>,
}

impl Default for HttpCollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_http_interval(),
            timeout: default_http_timeout(),
            checks: Vec::new(),
        }
    }
}

fn default_http_interval() -> HumanDuration {
    HumanDuration::from_secs(60)
}

fn default_http_timeout() -> HumanDuration {
    HumanDuration::from_secs(10)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpCheckConfig {
    pub name: String,
    pub url: String,
    pub timeout: Option<HumanDuration>,
    /// A response with a different status counts as failed; without it any 2xx/3xx passes
    pub expected_status: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Time granted to in-flight requests on shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: HumanDuration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_listen(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_shutdown_grace() -> HumanDuration {
    HumanDuration::from_secs(5)
}

impl Config {
    /// Parse a configuration document, then apply environment overrides and validate it
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_json::from_str(content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(path) = util::get_db_path() {
            trace!("database path overridden from environment: {}", path.display());
            self.storage.path = path;
        }

        if let Some(addr) = util::get_api_addr() {
            self.api.listen = addr.parse().map_err(|_| {
                ConfigError::Invalid(format!("WATCHTOWER_API_ADDR '{}' is not a socket address", addr))
            })?;
        }

        Ok(())
    }

    /// Reject configurations the agent cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.storage.max_connections == 0 {
            return invalid("storage.max_connections must be at least 1".to_string());
        }

        let intervals = [
            ("storage.retention.cleanup_interval", self.storage.retention.cleanup_interval),
            ("alerts.evaluation_interval", self.alerts.evaluation_interval),
            ("collectors.system.interval", self.collectors.system.interval),
            ("collectors.services.interval", self.collectors.services.interval),
            ("collectors.http.interval", self.collectors.http.interval),
            ("collectors.http.timeout", self.collectors.http.timeout),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return invalid(format!("{} must be greater than zero", name));
            }
        }

        let retention = &self.storage.retention;
        if retention.raw_metrics_ttl > MAX_RETENTION {
            return invalid(format!(
                "storage.retention.raw_metrics_ttl must not exceed {}",
                MAX_RETENTION
            ));
        }
        let windows = [
            ("storage.retention.events_days", retention.events_days),
            ("storage.retention.raw_metrics_days", retention.raw_metrics_days),
            ("storage.retention.aggregated_metrics_days", retention.aggregated_metrics_days),
        ];
        for (name, days) in windows {
            if u64::from(days) > MAX_RETENTION_DAYS {
                return invalid(format!("{} must not exceed {}", name, MAX_RETENTION_DAYS));
            }
        }

        if self.alerts.max_history == 0 {
            return invalid("alerts.max_history must be at least 1".to_string());
        }

        let mut notifier_names = HashSet::new();
        for notifier in &self.alerts.notifiers {
            if !notifier_names.insert(notifier.name.as_str()) {
                return invalid(format!("duplicate notifier name '{}'", notifier.name));
            }
        }

        let mut rule_ids = HashSet::new();
        for rule in &self.alerts.rules {
            if !rule_ids.insert(rule.id.as_str()) {
                return invalid(format!("duplicate alert rule id '{}'", rule.id));
            }
            if let Some(unknown) = rule
                .notify
                .iter()
                .find(|name| !notifier_names.contains(name.as_str()))
            {
                return invalid(format!(
                    "alert rule '{}' references unknown notifier '{}'",
                    rule.id, unknown
                ));
            }
        }

        let mut check_names = HashSet::new();
        for check in &self.collectors.http.checks {
            if !check_names.insert(check.name.as_str()) {
                return invalid(format!("duplicate http check name '{}'", check.name));
            }
        }

        Ok(())
    }
}

pub fn read_config_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Config::from_json(&file_content).inspect(|config| trace!("loaded config: {config:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::RuleCondition;
    use assert_matches::assert_matches;
    use std::time::Duration;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.storage.retention.raw_metrics_ttl.as_duration(), Duration::from_secs(30 * 86_400));
        assert_eq!(config.alerts.max_history, 100);
        assert_eq!(config.alerts.default_max_notifications, 10);
        assert_eq!(config.api.shutdown_grace.as_duration(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config_parses() {
        let config: Config = serde_json::from_str(
            r#"{
                "storage": { "path": "/tmp/w.db", "retention": { "events_days": 7, "cleanup_interval": "15m" } },
                "alerts": {
                    "evaluation_interval": "10s",
                    "notifiers": [
                        { "name": "ops", "type": "discord", "url": "https://discord.example/hook", "user_id": "42" },
                        { "name": "hook", "type": "webhook", "url": "https://hooks.example/alert" }
                    ],
                    "rules": [
                        { "id": "cpu", "name": "CPU high", "severity": "critical", "notify": ["ops"],
                          "min_interval": "10m", "condition": { "type": "system", "cpu_threshold": 90.0 } },
                        { "id": "nginx", "name": "nginx down",
                          "condition": { "type": "service", "service": "nginx" } }
                    ]
                },
                "collectors": { "http": { "checks": [ { "name": "site", "url": "https://example.com", "timeout": "3s" } ] } },
                "api": { "listen": "0.0.0.0:9000" }
            }"#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.storage.retention.events_days, 7);
        assert_eq!(config.storage.retention.cleanup_interval, HumanDuration::from_mins(15));
        assert_eq!(config.alerts.rules.len(), 2);
        assert_eq!(config.alerts.rules[0].min_interval, Some(HumanDuration::from_mins(10)));
        assert_matches!(
            &config.alerts.rules[1].condition,
            RuleCondition::Service { service, expected_state: None } if service == "nginx"
        );
        assert_matches!(
            &config.alerts.notifiers[0].kind,
            NotifierKind::Discord { user_id: Some(id), .. } if id == "42"
        );
        assert_eq!(config.api.listen.port(), 9000);
    }

    #[test]
    fn test_bad_duration_is_rejected_at_load() {
        let result = Config::from_json(r#"{ "alerts": { "evaluation_interval": "every now and then" } }"#);
        assert_matches!(result, Err(ConfigError::Parse(_)));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let result = Config::from_json(r#"{ "collectors": { "system": { "interval": "0s" } } }"#);
        assert_matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("collectors.system.interval"));
    }

    #[test]
    fn test_retention_beyond_limit_is_rejected() {
        let result = Config::from_json(r#"{ "storage": { "retention": { "raw_metrics_ttl": "200years" } } }"#);
        assert_matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("raw_metrics_ttl"));

        let result = Config::from_json(r#"{ "storage": { "retention": { "events_days": 4000000000 } } }"#);
        assert_matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("events_days"));

        assert!(Config::from_json(r#"{ "storage": { "retention": { "raw_metrics_ttl": "90years" } } }"#).is_ok());
    }

    #[test]
    fn test_rule_referencing_unknown_notifier() {
        let config: Config = serde_json::from_str(
            r#"{ "alerts": { "rules": [ { "id": "r", "name": "r", "notify": ["pager"],
                 "condition": { "type": "system", "load_threshold": 4.0 } } ] } }"#,
        )
        .unwrap();
        assert_matches!(config.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("pager"));
    }

    #[test]
    fn test_duplicate_rule_ids() {
        let config: Config = serde_json::from_str(
            r#"{ "alerts": { "rules": [
                 { "id": "r", "name": "a", "condition": { "type": "system" } },
                 { "id": "r", "name": "b", "condition": { "type": "system" } } ] } }"#,
        )
        .unwrap();
        assert_matches!(config.validate(), Err(ConfigError::Invalid(_)));
    }

    #[test]
    fn test_unknown_top_level_section() {
        assert_matches!(
            serde_json::from_str::<Config>(r#"{ "servers": [] }"#),
            Err(_)
        );
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_config_file(dir.path().join("missing.json"));
        assert_matches!(result, Err(ConfigError::Io { .. }));
    }

    #[test]
    fn test_read_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "storage": { "max_connections": 2 } }"#).unwrap();

        let config = read_config_file(&path).unwrap();
        assert_eq!(config.storage.max_connections, 2);
    }
}
