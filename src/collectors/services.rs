use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::ServiceStatus;

use super::{Collected, Collector};

const PROPERTIES: &str =
    "ActiveState,SubState,LoadState,NRestarts,ActiveEnterTimestamp,Description,MainPID";

/// systemd units via `systemctl show`
pub struct ServiceCollector {
    units: Vec<String>,
}

impl ServiceCollector {
    pub fn new(units: impl IntoIterator<Item = String>) -> Self {
        Self {
            units: units
                .into_iter()
                .map(|unit| {
                    if unit.contains('.') {
                        unit
                    } else {
                        format!("{unit}.service")
                    }
                })
                .collect(),
        }
    }

    pub fn units(&self) -> &[String] {
        &self.units
    }

    #[instrument(skip(self))]
    async fn query(&self, unit: &str) -> Result<ServiceStatus> {
        let output = Command::new("systemctl")
            .args(["show", unit, "--no-pager", "--property", PROPERTIES])
            .output()
            .await
            .context("failed to run systemctl")?;

        if !output.status.success() {
            anyhow::bail!(
                "systemctl show {} exited with {}: {}",
                unit,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_systemctl_show(unit, &stdout))
    }
}

#[async_trait]
impl Collector for ServiceCollector {
    fn name(&self) -> &str {
        "services"
    }

    async fn collect(&mut self) -> Result<Collected> {
        let mut services = Vec::with_capacity(self.units.len());
        for unit in &self.units {
            let status = self
                .query(unit)
                .await
                .with_context(|| format!("failed to query unit {unit}"))?;
            debug!(unit = %unit, active = %status.active, sub = %status.sub, "queried unit");
            services.push(status);
        }
        Ok(Collected::Services(services))
    }
}

/// Parse systemd timestamps: `@1700000000` or `Mon 2024-01-15 10:30:00 UTC`
fn parse_systemd_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() || value == "n/a" {
        return None;
    }

    if let Some(secs) = value.strip_prefix('@') {
        return secs
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0));
    }

    let parts: Vec<&str> = value.split_whitespace().collect();
    let [_weekday, date, time, zone @ ..] = parts.as_slice() else {
        return None;
    };

    let naive = NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S").ok()?;
    match zone.first() {
        Some(&"UTC") => Some(naive.and_utc()),
        _ => Local
            .from_local_datetime(&naive)
            .single()
            .map(|local| local.with_timezone(&Utc)),
    }
}

/// Build a [`ServiceStatus`] from `systemctl show` key=value output
pub fn parse_systemctl_show(unit: &str, output: &str) -> ServiceStatus {
    let properties: BTreeMap<&str, &str> = output
        .lines()
        .filter_map(|line| line.split_once('='))
        .collect();

    let get = |key: &str| properties.get(key).copied().unwrap_or_default().to_string();

    let active = get("ActiveState");
    let sub = get("SubState");
    let restart_count = properties
        .get("NRestarts")
        .and_then(|n| n.trim().parse().ok())
        .unwrap_or(0);
    let since = properties
        .get("ActiveEnterTimestamp")
        .and_then(|ts| parse_systemd_timestamp(ts));

    let status = match active.as_str() {
        "active" => sub.clone(),
        "" => "unknown".to_string(),
        _ => active.clone(),
    };

    let mut metadata = BTreeMap::new();
    for key in ["LoadState", "Description", "MainPID"] {
        if let Some(value) = properties.get(key).filter(|v| !v.is_empty()) {
            metadata.insert(key.to_string(), value.to_string());
        }
    }

    ServiceStatus {
        name: unit.strip_suffix(".service").unwrap_or(unit).to_string(),
        status,
        active,
        sub,
        restart_count,
        since,
        last_restart: if restart_count > 0 { since } else { None },
        metadata,
    }
}
