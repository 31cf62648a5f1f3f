use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sysinfo::{Disks, Networks, System};
use tracing::trace;

use crate::{
    CpuMetrics, DiskMetrics, LoadAverage, MemoryMetrics, NetworkMetrics, SystemMetricsSample,
};

use super::{Collected, Collector};

fn percent(part: u64, total: u64) -> f64 {
    if total > 0 {
        part as f64 / total as f64 * 100.0
    } else {
        0.0
    }
}

const PROC_STAT: &str = "/proc/stat";

/// Aggregate tick counters from the first line of `/proc/stat`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CpuTimes {
    user: u64,
    nice: u64,
    system: u64,
    idle: u64,
    iowait: u64,
    irq: u64,
    softirq: u64,
    steal: u64,
}

/// Share of each mode between two readings, in percent
#[derive(Debug, Clone, Copy, PartialEq)]
struct CpuBreakdown {
    user: f64,
    system: f64,
    idle: f64,
    iowait: f64,
}

impl CpuTimes {
    /// Format: `cpu user nice system idle iowait irq softirq steal ...`
    fn parse(content: &str) -> Option<Self> {
        let line = content.lines().next()?;
        let mut fields = line.split_whitespace();
        if fields.next()? != "cpu" {
            return None;
        }

        let mut next = || fields.next().and_then(|field| field.parse::<u64>().ok());
        let user = next()?;
        let nice = next()?;
        let system = next()?;
        let idle = next()?;
        Some(Self {
            user,
            nice,
            system,
            idle,
            iowait: next().unwrap_or(0),
            irq: next().unwrap_or(0),
            softirq: next().unwrap_or(0),
            steal: next().unwrap_or(0),
        })
    }

    fn read() -> Option<Self> {
        std::fs::read_to_string(PROC_STAT)
            .ok()
            .and_then(|content| Self::parse(&content))
    }

    fn total(&self) -> u64 {
        self.user + self.nice + self.system + self.idle + self.iowait + self.irq + self.softirq + self.steal
    }

    /// `None` when no ticks elapsed or the counters went backwards
    fn breakdown_since(&self, prev: &Self) -> Option<CpuBreakdown> {
        let elapsed = self.total().checked_sub(prev.total()).filter(|&d| d > 0)? as f64;
        let share = |now: u64, then: u64| now.saturating_sub(then) as f64 * 100.0 / elapsed;
        Some(CpuBreakdown {
            // nice time is user-mode work
            user: share(self.user + self.nice, prev.user + prev.nice),
            system: share(
                self.system + self.irq + self.softirq,
                prev.system + prev.irq + prev.softirq,
            ),
            idle: share(self.idle, prev.idle),
            iowait: share(self.iowait, prev.iowait),
        })
    }
}

/// Host resources via `sysinfo`, plus the per-mode CPU split from
/// `/proc/stat` where it exists
///
/// CPU usage is a delta between two refreshes, so the very first sample
/// after startup reports whatever `sysinfo` measured since construction.
pub struct SystemCollector {
    system: System,
    disks: Disks,
    networks: Networks,
    cpu_times: Option<CpuTimes>,
}

impl SystemCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        system.refresh_memory();

        Self {
            system,
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            cpu_times: CpuTimes::read(),
        }
    }

    /// Split since the previous reading; `None` off Linux
    fn cpu_breakdown(&mut self) -> Option<CpuBreakdown> {
        let current = CpuTimes::read()?;
        let previous = self.cpu_times.replace(current)?;
        current.breakdown_since(&previous)
    }

    pub fn sample(&mut self) -> SystemMetricsSample {
        self.system.refresh_cpu_all();
        self.system.refresh_memory();
        self.disks.refresh(true);
        self.networks.refresh(true);

        let usage = self.system.global_cpu_usage() as f64;
        let breakdown = self.cpu_breakdown();
        let cpu = CpuMetrics {
            usage_percent: usage,
            idle_percent: breakdown.map_or((100.0 - usage).max(0.0), |b| b.idle),
            user_percent: breakdown.map(|b| b.user),
            system_percent: breakdown.map(|b| b.system),
            iowait_percent: breakdown.map(|b| b.iowait),
            cores: self.system.cpus().len(),
        };

        let total = self.system.total_memory();
        let used = self.system.used_memory();
        let memory = MemoryMetrics {
            total_bytes: total,
            used_bytes: used,
            available_bytes: self.system.available_memory(),
            swap_total_bytes: self.system.total_swap(),
            swap_used_bytes: self.system.used_swap(),
            usage_percent: percent(used, total),
        };

        let disks = self
            .disks
            .iter()
            .map(|disk| {
                let total = disk.total_space();
                let used = total.saturating_sub(disk.available_space());
                DiskMetrics {
                    device: disk.name().to_string_lossy().to_string(),
                    mount_point: disk.mount_point().to_string_lossy().to_string(),
                    filesystem: disk.file_system().to_string_lossy().to_string(),
                    total_bytes: total,
                    used_bytes: used,
                    usage_percent: percent(used, total),
                }
            })
            .collect();

        let network = self
            .networks
            .iter()
            .map(|(name, data)| NetworkMetrics {
                interface: name.clone(),
                bytes_sent: data.total_transmitted(),
                bytes_recv: data.total_received(),
            })
            .collect();

        let load = System::load_average();

        SystemMetricsSample {
            cpu,
            memory,
            disks,
            network,
            load: LoadAverage {
                one: load.one,
                five: load.five,
                fifteen: load.fifteen,
            },
            timestamp: Utc::now(),
        }
    }
}

impl Default for SystemCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for SystemCollector {
    fn name(&self) -> &str {
        "system"
    }

    async fn collect(&mut self) -> Result<Collected> {
        let sample = self.sample();
        trace!(
            cpu = sample.cpu.usage_percent,
            memory = sample.memory.usage_percent,
            "collected system sample"
        );
        Ok(Collected::System(sample))
    }
}
