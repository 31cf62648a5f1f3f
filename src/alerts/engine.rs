use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::config::AlertingConfig;
use crate::notify::{Notification, NotificationKind, Notifier};
use crate::snapshot::Snapshot;
use crate::storage::{Attributes, NewEvent, Severity, StorageBackend};

use super::AlertError;
use super::alert::{Alert, AlertStatus, ThrottlePolicy};
use super::rule::AlertRule;

const DEFAULT_MAX_HISTORY: usize = 100;

/// A rule and the alert it currently owns
struct RuleSlot {
    rule: AlertRule,
    alert: Mutex<Option<Alert>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Quiet,
    Fired,
    Renotified,
    Throttled,
    Resolved,
}

/// Counts from one evaluation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvaluationSummary {
    pub evaluated: usize,
    pub fired: usize,
    pub renotified: usize,
    pub throttled: usize,
    pub resolved: usize,
}

impl EvaluationSummary {
    fn record(&mut self, outcome: Outcome) {
        self.evaluated += 1;
        match outcome {
            Outcome::Quiet => {}
            Outcome::Fired => self.fired += 1,
            Outcome::Renotified => self.renotified += 1,
            Outcome::Throttled => self.throttled += 1,
            Outcome::Resolved => self.resolved += 1,
        }
    }
}

pub struct AlertEngine {
    slots: Vec<RuleSlot>,
    notifiers: Vec<Arc<dyn Notifier>>,
    history: RwLock<VecDeque<Alert>>,
    max_history: usize,
    throttle: ThrottlePolicy,
    events: Option<Arc<dyn StorageBackend>>,
}

impl AlertEngine {
    pub fn new(rules: Vec<AlertRule>, notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self {
            slots: rules
                .into_iter()
                .map(|rule| RuleSlot {
                    rule,
                    alert: Mutex::new(None),
                })
                .collect(),
            notifiers,
            history: RwLock::new(VecDeque::new()),
            max_history: DEFAULT_MAX_HISTORY,
            throttle: ThrottlePolicy::default(),
            events: None,
        }
    }

    pub fn from_config(config: &AlertingConfig, notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self::new(config.rules.clone(), notifiers)
            .with_max_history(config.max_history)
            .with_throttle(ThrottlePolicy {
                min_interval: config.default_min_interval.to_chrono(),
                max_notifications: config.default_max_notifications,
            })
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history.max(1);
        self
    }

    /// Throttle used by rules without their own limits
    pub fn with_throttle(mut self, throttle: ThrottlePolicy) -> Self {
        self.throttle = throttle;
        self
    }

    /// Record `alert_fired` / `alert_resolved` events in `store`
    pub fn with_event_store(mut self, store: Arc<dyn StorageBackend>) -> Self {
        self.events = Some(store);
        self
    }

    pub fn rules(&self) -> impl Iterator<Item = &AlertRule> {
        self.slots.iter().map(|slot| &slot.rule)
    }

    pub async fn evaluate_rules(&self, snapshot: &Snapshot) -> EvaluationSummary {
        self.evaluate_rules_at(snapshot, Utc::now()).await
    }

    /// Evaluate every enabled rule concurrently against `snapshot`
    #[instrument(skip_all, fields(rules = self.slots.len()))]
    pub async fn evaluate_rules_at(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> EvaluationSummary {
        let outcomes = join_all(
            self.slots
                .iter()
                .filter(|slot| slot.rule.enabled)
                .map(|slot| self.evaluate_slot(slot, snapshot, now)),
        )
        .await;

        let mut summary = EvaluationSummary::default();
        for outcome in outcomes {
            summary.record(outcome);
        }

        debug!(?summary, "evaluated alert rules");
        summary
    }

    async fn evaluate_slot(&self, slot: &RuleSlot, snapshot: &Snapshot, now: DateTime<Utc>) -> Outcome {
        let rule = &slot.rule;
        let policy = self.throttle.for_rule(rule);

        let Some(trigger) = rule.condition.evaluate(snapshot) else {
            let taken = slot.alert.lock().await.take();
            return match taken {
                Some(alert) => {
                    self.close(rule, alert, now).await;
                    Outcome::Resolved
                }
                None => Outcome::Quiet,
            };
        };

        // the slot lock never spans notifier I/O
        let (kind, alert) = {
            let mut current = slot.alert.lock().await;
            if let Some(alert) = current.as_mut() {
                alert.update(trigger, now);
                if !policy.allows(alert, now) {
                    if policy.exhausted(alert) {
                        alert.status = AlertStatus::Suppressed;
                    }
                    return Outcome::Throttled;
                }
                (NotificationKind::Repeat, alert.clone())
            } else {
                let alert = Alert::fire(rule, trigger, now);
                info!(rule = %rule.id, "alert fired: {}", alert.message);
                *current = Some(alert.clone());
                (NotificationKind::Firing, alert)
            }
        };

        let accepted = self
            .send(rule, &Notification::new(kind, alert.clone(), now))
            .await;
        let recorded = self
            .record_dispatch(slot, &policy, &alert, accepted, now)
            .await;

        match kind {
            NotificationKind::Firing => {
                let alert = recorded.unwrap_or(alert);
                self.record_event(&alert, "alert_fired", alert.severity, now)
                    .await;
                Outcome::Fired
            }
            _ => Outcome::Renotified,
        }
    }

    /// Apply a finished dispatch to the slot, unless `sent` was resolved or
    /// replaced while the notifiers were running
    async fn record_dispatch(
        &self,
        slot: &RuleSlot,
        policy: &ThrottlePolicy,
        sent: &Alert,
        accepted: Vec<String>,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let mut current = slot.alert.lock().await;
        let Some(alert) = current
            .as_mut()
            .filter(|alert| alert.started_at == sent.started_at)
        else {
            debug!(alert = %sent.id, "alert closed during dispatch, dropping delivery record");
            return None;
        };

        alert.record_notification(accepted, now);
        if policy.exhausted(alert) {
            alert.status = AlertStatus::Suppressed;
        }
        Some(alert.clone())
    }

    /// Resolve `alert`, notify if anyone heard about it, and move it to history
    ///
    /// The alert must already be detached from its slot.
    async fn close(&self, rule: &AlertRule, mut alert: Alert, now: DateTime<Utc>) -> Alert {
        alert.resolve(now);
        info!(rule = %rule.id, "alert resolved after {}s", alert.duration(now).num_seconds());

        {
            let mut history = self.history.write().await;
            history.push_back(alert.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        if alert.notification_count > 0 {
            let accepted = self
                .send(rule, &Notification::new(NotificationKind::Resolved, alert.clone(), now))
                .await;
            alert.record_notification(accepted, now);

            let mut history = self.history.write().await;
            if let Some(entry) = history
                .iter_mut()
                .rev()
                .find(|entry| entry.id == alert.id && entry.started_at == alert.started_at)
            {
                *entry = alert.clone();
            }
        }

        self.record_event(&alert, "alert_resolved", Severity::Info, now)
            .await;

        alert
    }

    /// Send to every enabled, targeted channel; returns the ones that accepted
    async fn send(&self, rule: &AlertRule, notification: &Notification) -> Vec<String> {
        let results = join_all(
            self.notifiers
                .iter()
                .filter(|n| n.is_enabled() && rule.targets(n.name()))
                .map(|notifier| async move {
                    (notifier.name().to_string(), notifier.send(notification).await)
                }),
        )
        .await;

        let mut accepted = Vec::with_capacity(results.len());
        for (name, result) in results {
            match result {
                Ok(()) => accepted.push(name),
                Err(e) => warn!(
                    notifier = %name,
                    alert = %notification.alert.id,
                    "failed to send notification: {:#}",
                    e
                ),
            }
        }
        accepted
    }

    async fn record_event(&self, alert: &Alert, event_type: &str, severity: Severity, now: DateTime<Utc>) {
        let Some(store) = &self.events else {
            return;
        };

        let event = NewEvent::new(
            event_type,
            severity,
            format!("{}: {}", alert.name, alert.message),
        )
        .at(now)
        .with_details(
            Attributes::new()
                .with("alert_id", alert.id.as_str())
                .with("rule_id", alert.rule_id.as_str())
                .with("alert_type", alert.alert_type.as_str())
                .with("notification_count", alert.notification_count),
        );

        if let Err(e) = store.create_event(event).await {
            warn!(alert = %alert.id, "failed to record {} event: {}", event_type, e);
        }
    }

    /// Currently firing (including acknowledged and suppressed) alerts
    pub async fn active_alerts(&self) -> Vec<Alert> {
        let mut active = Vec::new();
        for slot in &self.slots {
            if let Some(alert) = slot.alert.lock().await.as_ref() {
                active.push(alert.clone());
            }
        }
        active
    }

    /// Resolved alerts, newest first
    pub async fn history(&self) -> Vec<Alert> {
        self.history.read().await.iter().rev().cloned().collect()
    }

    /// Look up an alert, preferring the active instance over history
    pub async fn get_alert(&self, id: &str) -> Result<Alert, AlertError> {
        for slot in &self.slots {
            if let Some(alert) = slot.alert.lock().await.as_ref()
                && alert.id == id
            {
                return Ok(alert.clone());
            }
        }

        self.history
            .read()
            .await
            .iter()
            .rev()
            .find(|alert| alert.id == id)
            .cloned()
            .ok_or_else(|| AlertError::NotFound(id.to_string()))
    }

    pub async fn acknowledge(&self, id: &str) -> Result<Alert, AlertError> {
        for slot in &self.slots {
            let mut current = slot.alert.lock().await;
            if let Some(alert) = current.as_mut()
                && alert.id == id
            {
                alert.acknowledge(Utc::now());
                info!(alert = %id, "alert acknowledged");
                return Ok(alert.clone());
            }
        }
        Err(AlertError::NotFound(id.to_string()))
    }

    /// Resolve an active alert by hand; it fires again if the condition still holds
    pub async fn resolve(&self, id: &str) -> Result<Alert, AlertError> {
        for slot in &self.slots {
            let taken = {
                let mut current = slot.alert.lock().await;
                if current.as_ref().is_some_and(|alert| alert.id == id) {
                    current.take()
                } else {
                    None
                }
            };
            if let Some(alert) = taken {
                return Ok(self.close(&slot.rule, alert, Utc::now()).await);
            }
        }
        Err(AlertError::NotFound(id.to_string()))
    }
}
