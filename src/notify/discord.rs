use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::storage::Severity;

use super::{Notification, NotificationKind, Notifier};

const RED: u32 = 15158332;
const ORANGE: u32 = 15105570;
const GREEN: u32 = 3066993;
const LIGHT_BLUE: u32 = 5793266;

/// Discord limits an embed to 25 fields
const MAX_DETAIL_FIELDS: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

impl EmbedField {
    fn inline(name: impl ToString, value: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            inline: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

/// Posts alert embeds to a Discord webhook
#[derive(Debug, Clone)]
pub struct DiscordNotifier {
    name: String,
    url: String,
    user_id: Option<String>,
    enabled: bool,
    client: Client,
}

impl DiscordNotifier {
    pub fn new(name: impl Into<String>, url: impl Into<String>, client: Client) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            user_id: None,
            enabled: true,
            client,
        }
    }

    /// Mention this Discord user in the message content
    pub fn mention(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn color(notification: &Notification) -> u32 {
        match (notification.kind, notification.alert.severity) {
            (NotificationKind::Resolved, _) => GREEN,
            (_, Severity::Critical | Severity::Error) => RED,
            (_, Severity::Warning) => ORANGE,
            (_, Severity::Info) => LIGHT_BLUE,
        }
    }

    fn emoji(notification: &Notification) -> &'static str {
        match (notification.kind, notification.alert.severity) {
            (NotificationKind::Resolved, _) => "✅",
            (_, Severity::Critical | Severity::Error) => "🔴",
            (_, Severity::Warning) => "⚠️",
            (_, Severity::Info) => "ℹ️",
        }
    }

    pub fn build_embed(&self, notification: &Notification) -> Embed {
        let alert = &notification.alert;

        let mut fields = vec![
            EmbedField::inline("Severity", alert.severity),
            EmbedField::inline("Type", alert.alert_type.as_str()),
            EmbedField::inline("Notifications", alert.notification_count + 1),
        ];

        fields.extend(alert.details.iter().take(MAX_DETAIL_FIELDS).map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            EmbedField::inline(key, value)
        }));

        Embed {
            title: Some(format!("{} {}", Self::emoji(notification), notification.title())),
            description: Some(notification.body()),
            color: Some(Self::color(notification)),
            fields,
            footer: Some(EmbedFooter {
                text: format!("rule: {} | alert: {}", alert.rule_id, alert.id),
            }),
            timestamp: Some(notification.sent_at.to_rfc3339()),
        }
    }

    pub fn build_message(&self, notification: &Notification) -> Message {
        let mut builder = MessageBuilder::new().add_embed(self.build_embed(notification));
        if let Some(user_id) = &self.user_id {
            builder = builder.content(format!(
                "{} `{}` <@{user_id}>",
                Self::emoji(notification),
                notification.alert.name
            ));
        }
        builder.build()
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[instrument(skip_all, fields(notifier = %self.name, alert = %notification.alert.id))]
    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        let message = self.build_message(notification);

        let response = self
            .client
            .post(&self.url)
            .json(&message)
            .send()
            .await
            .context("failed to send Discord message")?;

        let status = response.status();
        if !status.is_success() {
            if let Ok(error_text) = response.text().await {
                error!("Discord API error response: {}", error_text);
            }
            anyhow::bail!("Discord message failed with status: {}", status);
        }

        info!("successfully sent Discord message");
        Ok(())
    }
}
