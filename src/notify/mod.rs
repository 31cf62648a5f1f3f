//! Notification dispatch
//!
//! Every channel implements [`Notifier`]. The alert engine builds one
//! [`Notification`] per dispatch and hands it to each targeted channel; a
//! channel error is logged by the engine and never stops the others.

pub mod discord;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::alerts::Alert;
use crate::config::{NotifierConfig, NotifierKind};

pub use discord::DiscordNotifier;
pub use webhook::WebhookNotifier;

/// Timeout applied to every outbound notification request
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// First notification of a new alert instance
    Firing,
    /// The condition still holds and the throttle allowed another send
    Repeat,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub alert: Alert,
    pub sent_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationKind, alert: Alert, sent_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            alert,
            sent_at,
        }
    }

    pub fn title(&self) -> String {
        let severity = self.alert.severity.as_str().to_uppercase();
        match self.kind {
            NotificationKind::Firing => format!("[{}] {} is firing", severity, self.alert.name),
            NotificationKind::Repeat => format!("[{}] {} is still firing", severity, self.alert.name),
            NotificationKind::Resolved => format!("[RESOLVED] {}", self.alert.name),
        }
    }

    pub fn body(&self) -> String {
        let elapsed = self.alert.duration(self.sent_at);
        let minutes = elapsed.num_minutes();
        match self.kind {
            NotificationKind::Resolved => format!(
                "{}\nResolved after {} minute(s).",
                self.alert.message, minutes
            ),
            _ => format!(
                "{}\nFiring since {} ({} minute(s)).",
                self.alert.message,
                self.alert.started_at.to_rfc3339(),
                minutes
            ),
        }
    }

    /// Generic JSON representation used by the webhook channel
    pub fn payload(&self) -> serde_json::Value {
        json!({
            "kind": self.kind,
            "title": self.title(),
            "message": self.body(),
            "alert": self.alert,
            "timestamp": self.sent_at.to_rfc3339(),
        })
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Name used by alert rules to target this channel
    fn name(&self) -> &str;

    fn is_enabled(&self) -> bool {
        true
    }

    async fn send(&self, notification: &Notification) -> anyhow::Result<()>;
}

fn http_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(SEND_TIMEOUT)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {}", e))
}

/// Instantiate every configured channel
pub fn build_notifiers(configs: &[NotifierConfig]) -> anyhow::Result<Vec<Arc<dyn Notifier>>> {
    let client = http_client()?;

    Ok(configs
        .iter()
        .map(|config| -> Arc<dyn Notifier> {
            match &config.kind {
                NotifierKind::Webhook { url, headers } => Arc::new(
                    WebhookNotifier::new(&config.name, url, client.clone())
                        .with_headers(headers.clone())
                        .enabled(config.enabled),
                ),
                NotifierKind::Discord { url, user_id } => Arc::new(
                    DiscordNotifier::new(&config.name, url, client.clone())
                        .mention(user_id.clone())
                        .enabled(config.enabled),
                ),
            }
        })
        .collect())
}
