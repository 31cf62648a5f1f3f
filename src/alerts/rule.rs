//! Alert rules and their conditions

use serde::{Deserialize, Serialize};

use crate::snapshot::Snapshot;
use crate::storage::{Attributes, Severity};
use crate::util::HumanDuration;

use super::alert::AlertType;

/// Mount point checked by the system disk threshold
pub const ROOT_MOUNT: &str = "/";

fn default_severity() -> Severity {
    Severity::Warning
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,

    #[serde(default = "default_severity")]
    pub severity: Severity,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    pub condition: RuleCondition,

    /// Notifier names to dispatch to; empty means every enabled notifier
    #[serde(default)]
    pub notify: Vec<String>,

    /// Minimum time between two notifications of the same alert
    #[serde(default)]
    pub min_interval: Option<HumanDuration>,

    /// Notifications sent per alert instance before it goes quiet
    #[serde(default)]
    pub max_notifications: Option<u32>,
}

impl AlertRule {
    pub fn alert_id(&self) -> String {
        format!("{}-current", self.id)
    }

    /// Whether `notifier` is one of this rule's targets
    pub fn targets(&self, notifier: &str) -> bool {
        self.notify.is_empty() || self.notify.iter().any(|n| n == notifier)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleCondition {
    /// Host resource thresholds; checked in the order cpu, memory, root disk, load
    System {
        cpu_threshold: Option<f64>,
        memory_threshold: Option<f64>,
        disk_threshold: Option<f64>,
        load_threshold: Option<f64>,
    },

    /// A systemd unit not in its expected active state
    Service {
        service: String,
        /// Defaults to `active`
        expected_state: Option<String>,
    },

    /// An HTTP check that failed, was slow, or answered with the wrong status
    Http {
        check: String,
        timeout_ms: Option<u64>,
        expected_status: Option<u16>,
    },
}

/// Why a condition currently holds
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub message: String,
    pub details: Attributes,
}

impl Trigger {
    fn new(message: String, details: Attributes) -> Self {
        Self { message, details }
    }

    fn threshold(metric: &str, label: &str, value: f64, threshold: f64, unit: &str) -> Self {
        Self::new(
            format!(
                "{} is {:.1}{} (threshold {:.1}{})",
                label, value, unit, threshold, unit
            ),
            Attributes::new()
                .with("metric", metric)
                .with("value", value)
                .with("threshold", threshold),
        )
    }
}

impl RuleCondition {
    pub fn alert_type(&self) -> AlertType {
        match self {
            RuleCondition::System { .. } => AlertType::System,
            RuleCondition::Service { .. } => AlertType::Service,
            RuleCondition::Http { .. } => AlertType::Http,
        }
    }

    /// Evaluate against a snapshot; `None` means the condition does not hold
    ///
    /// Missing data (no system sample yet, unknown service or check) never
    /// triggers.
    pub fn evaluate(&self, snapshot: &Snapshot) -> Option<Trigger> {
        match self {
            RuleCondition::System {
                cpu_threshold,
                memory_threshold,
                disk_threshold,
                load_threshold,
            } => {
                let system = snapshot.system.as_ref()?;

                if let Some(threshold) = *cpu_threshold
                    && system.cpu.usage_percent > threshold
                {
                    return Some(Trigger::threshold(
                        "cpu_usage",
                        "CPU usage",
                        system.cpu.usage_percent,
                        threshold,
                        "%",
                    ));
                }

                if let Some(threshold) = *memory_threshold
                    && system.memory.usage_percent > threshold
                {
                    return Some(Trigger::threshold(
                        "memory_usage",
                        "Memory usage",
                        system.memory.usage_percent,
                        threshold,
                        "%",
                    ));
                }

                if let Some(threshold) = *disk_threshold
                    && let Some(root) = system.disks.iter().find(|d| d.mount_point == ROOT_MOUNT)
                    && root.usage_percent > threshold
                {
                    let mut trigger = Trigger::threshold(
                        "disk_usage",
                        "Root disk usage",
                        root.usage_percent,
                        threshold,
                        "%",
                    );
                    trigger.details.insert("mount_point", ROOT_MOUNT);
                    return Some(trigger);
                }

                if let Some(threshold) = *load_threshold
                    && system.load.one > threshold
                {
                    return Some(Trigger::threshold(
                        "load_1m",
                        "1 minute load",
                        system.load.one,
                        threshold,
                        "",
                    ));
                }

                None
            }

            RuleCondition::Service {
                service,
                expected_state,
            } => {
                let status = snapshot.service(service)?;
                let expected = expected_state.as_deref().unwrap_or("active");

                (status.active != expected).then(|| {
                    Trigger::new(
                        format!(
                            "service {} is {} ({}), expected {}",
                            service, status.active, status.sub, expected
                        ),
                        Attributes::new()
                            .with("service", service.as_str())
                            .with("active", status.active.as_str())
                            .with("sub", status.sub.as_str())
                            .with("expected", expected),
                    )
                })
            }

            RuleCondition::Http {
                check,
                timeout_ms,
                expected_status,
            } => {
                let result = snapshot.http_check(check)?;
                let details = || {
                    let mut details = Attributes::new()
                        .with("check", check.as_str())
                        .with("url", result.url.as_str())
                        .with("response_time_ms", result.response_time_ms);
                    if let Some(code) = result.status_code {
                        details.insert("status_code", code);
                    }
                    details
                };

                if !result.success {
                    let reason = result.error.as_deref().unwrap_or("request failed");
                    return Some(Trigger::new(
                        format!("check {} failed: {}", check, reason),
                        details().with("reason", "failed"),
                    ));
                }

                if let Some(timeout) = *timeout_ms
                    && result.response_time_ms > timeout
                {
                    return Some(Trigger::new(
                        format!(
                            "check {} took {}ms (limit {}ms)",
                            check, result.response_time_ms, timeout
                        ),
                        details().with("reason", "slow"),
                    ));
                }

                if let Some(expected) = *expected_status
                    && result.status_code != Some(expected)
                {
                    let got = result
                        .status_code
                        .map_or_else(|| "no status".to_string(), |c| c.to_string());
                    return Some(Trigger::new(
                        format!("check {} returned {} (expected {})", check, got, expected),
                        details().with("reason", "status_mismatch"),
                    ));
                }

                None
            }
        }
    }
}
