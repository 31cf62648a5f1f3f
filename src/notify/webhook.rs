use std::collections::BTreeMap;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use tracing::{info, instrument};

use super::{Notification, Notifier};

/// Posts the generic JSON payload to an arbitrary URL
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    name: String,
    url: String,
    headers: BTreeMap<String, String>,
    enabled: bool,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(name: impl Into<String>, url: impl Into<String>, client: Client) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            headers: BTreeMap::new(),
            enabled: true,
            client,
        }
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[instrument(skip_all, fields(notifier = %self.name, alert = %notification.alert.id))]
    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        let mut request = self.client.post(&self.url).json(&notification.payload());
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("failed to send webhook to {}", self.url))?;

        if !response.status().is_success() {
            anyhow::bail!("webhook {} answered with status {}", self.name, response.status());
        }

        info!("successfully sent webhook notification");
        Ok(())
    }
}
