//! Alert instances and their lifecycle

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{Attributes, Severity};

use super::rule::{AlertRule, Trigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    System,
    Service,
    Http,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::System => "system",
            AlertType::Service => "service",
            AlertType::Http => "http",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Firing,
    /// Still firing, but its notification budget is spent
    Suppressed,
    /// Still firing; an operator took ownership. Repeats follow the throttle as usual
    Acknowledged,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub name: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub status: AlertStatus,
    pub message: String,
    pub details: Attributes,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub last_notified: Option<DateTime<Utc>>,
    pub notification_count: u32,
    /// Notifiers that accepted at least one notification
    pub sent_to: Vec<String>,
}

impl Alert {
    pub fn fire(rule: &AlertRule, trigger: Trigger, now: DateTime<Utc>) -> Self {
        Self {
            id: rule.alert_id(),
            rule_id: rule.id.clone(),
            name: rule.name.clone(),
            alert_type: rule.condition.alert_type(),
            severity: rule.severity,
            status: AlertStatus::Firing,
            message: trigger.message,
            details: trigger.details,
            started_at: now,
            updated_at: now,
            ended_at: None,
            acknowledged_at: None,
            last_notified: None,
            notification_count: 0,
            sent_to: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status != AlertStatus::Resolved
    }

    /// Refresh message and details while the condition keeps holding
    pub fn update(&mut self, trigger: Trigger, now: DateTime<Utc>) {
        self.message = trigger.message;
        self.details = trigger.details;
        self.updated_at = now;
    }

    pub fn acknowledge(&mut self, now: DateTime<Utc>) {
        if self.is_active() {
            self.status = AlertStatus::Acknowledged;
            self.acknowledged_at = Some(now);
            self.updated_at = now;
        }
    }

    pub fn resolve(&mut self, now: DateTime<Utc>) {
        self.status = AlertStatus::Resolved;
        self.ended_at = Some(now);
        self.updated_at = now;
    }

    /// Record one dispatch attempt and the notifiers that accepted it
    pub fn record_notification(&mut self, accepted: impl IntoIterator<Item = String>, now: DateTime<Utc>) {
        self.notification_count += 1;
        self.last_notified = Some(now);
        for name in accepted {
            if !self.sent_to.contains(&name) {
                self.sent_to.push(name);
            }
        }
    }

    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        self.ended_at.unwrap_or(now) - self.started_at
    }
}

/// Rate limit applied to repeat notifications of one alert instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    pub min_interval: Duration,
    pub max_notifications: u32,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::minutes(5),
            max_notifications: 10,
        }
    }
}

impl ThrottlePolicy {
    /// Policy for `rule`, falling back to `self` for unset fields
    pub fn for_rule(&self, rule: &AlertRule) -> Self {
        Self {
            min_interval: rule
                .min_interval
                .map(|d| d.to_chrono())
                .unwrap_or(self.min_interval),
            max_notifications: rule.max_notifications.unwrap_or(self.max_notifications),
        }
    }

    /// The first notification is always allowed
    pub fn allows(&self, alert: &Alert, now: DateTime<Utc>) -> bool {
        let Some(last) = alert.last_notified else {
            return true;
        };
        if alert.notification_count == 0 {
            return true;
        }
        if alert.notification_count >= self.max_notifications {
            return false;
        }
        now - last >= self.min_interval
    }

    pub fn exhausted(&self, alert: &Alert) -> bool {
        alert.notification_count > 0 && alert.notification_count >= self.max_notifications
    }
}
