use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use reqwest::Client;
use tracing::{debug, instrument};

use crate::HttpCheckResult;
use crate::config::HttpCheckConfig;

use super::{Collected, Collector};

/// Probes the configured sites concurrently, each with its own timeout
pub struct HttpChecker {
    client: Client,
    checks: Vec<HttpCheckConfig>,
    default_timeout: Duration,
}

impl HttpChecker {
    pub fn new(client: Client, checks: Vec<HttpCheckConfig>, default_timeout: Duration) -> Self {
        Self {
            client,
            checks,
            default_timeout,
        }
    }

    #[instrument(skip_all, fields(check = %check.name))]
    async fn probe(&self, check: &HttpCheckConfig) -> HttpCheckResult {
        let timeout = check
            .timeout
            .map(|t| t.as_duration())
            .unwrap_or(self.default_timeout);

        let started = Instant::now();
        let response = self.client.get(&check.url).timeout(timeout).send().await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        let mut result = HttpCheckResult {
            name: check.name.clone(),
            url: check.url.clone(),
            status_code: None,
            response_time_ms,
            success: false,
            error: None,
            timestamp: Utc::now(),
            ssl_expiry: None,
        };

        match response {
            Ok(response) => {
                let status = response.status();
                result.status_code = Some(status.as_u16());
                result.success = match check.expected_status {
                    Some(expected) => status.as_u16() == expected,
                    None => status.is_success() || status.is_redirection(),
                };
                if !result.success {
                    result.error = Some(format!("unexpected status {}", status.as_u16()));
                }
            }
            Err(e) if e.is_timeout() => {
                result.error = Some(format!("timed out after {}ms", timeout.as_millis()));
            }
            Err(e) => {
                result.error = Some(e.to_string());
            }
        }

        debug!(
            success = result.success,
            status = ?result.status_code,
            elapsed_ms = result.response_time_ms,
            "http check finished"
        );
        result
    }

    pub async fn run_checks(&self) -> Vec<HttpCheckResult> {
        join_all(self.checks.iter().map(|check| self.probe(check))).await
    }
}

#[async_trait]
impl Collector for HttpChecker {
    fn name(&self) -> &str {
        "http"
    }

    async fn collect(&mut self) -> Result<Collected> {
        Ok(Collected::Http(self.run_checks().await))
    }
}
