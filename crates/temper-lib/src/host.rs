//! Host statistics from procfs
//!
//! Reads `/proc/stat`, `/proc/meminfo`, `/proc/loadavg` and `/proc/uptime`.
//! CPU usage is the busy share of jiffies since the previous sample, so the
//! first sample after construction reports 0%.

use crate::models::HostSnapshot;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

/// Cumulative CPU jiffies from the aggregate `cpu` line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub total: u64,
    pub idle: u64,
}

/// Samples host statistics, keeping the previous CPU counters for deltas
pub struct HostMonitor {
    proc_path: PathBuf,
    prev_cpu: Option<CpuTimes>,
    snapshot: HostSnapshot,
}

impl Default for HostMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMonitor {
    pub fn new() -> Self {
        Self::with_proc_path("/proc")
    }

    /// Create a monitor reading from a custom proc root (for testing)
    pub fn with_proc_path(proc_path: impl Into<PathBuf>) -> Self {
        Self {
            proc_path: proc_path.into(),
            prev_cpu: None,
            snapshot: HostSnapshot::default(),
        }
    }

    /// Latest sampled values
    pub fn snapshot(&self) -> &HostSnapshot {
        &self.snapshot
    }

    /// Refresh every statistic. Unreadable files keep their previous values.
    pub async fn sample(&mut self) -> &HostSnapshot {
        match self.read("stat").await {
            Ok(content) => {
                if let Some(times) = Self::parse_cpu_times(&content) {
                    if let Some(prev) = self.prev_cpu {
                        if let Some(usage) = Self::cpu_usage_percent(prev, times) {
                            self.snapshot.cpu_usage_percent = usage;
                        }
                    }
                    self.prev_cpu = Some(times);
                }
            }
            Err(e) => debug!(error = %e, "Failed to sample CPU usage"),
        }

        match self.read("meminfo").await {
            Ok(content) => {
                let (total, available) = Self::parse_meminfo(&content);
                self.snapshot.mem_total_bytes = total;
                self.snapshot.mem_available_bytes = available;
            }
            Err(e) => debug!(error = %e, "Failed to sample memory"),
        }

        match self.read("loadavg").await {
            Ok(content) => {
                if let Some((one, five, fifteen)) = Self::parse_loadavg(&content) {
                    self.snapshot.load_avg_1m = one;
                    self.snapshot.load_avg_5m = five;
                    self.snapshot.load_avg_15m = fifteen;
                }
            }
            Err(e) => debug!(error = %e, "Failed to sample load average"),
        }

        match self.read("uptime").await {
            Ok(content) => {
                if let Some(uptime) = Self::parse_uptime(&content) {
                    self.snapshot.uptime_secs = uptime;
                }
            }
            Err(e) => debug!(error = %e, "Failed to sample uptime"),
        }

        &self.snapshot
    }

    async fn read(&self, name: &str) -> Result<String> {
        let path = self.proc_path.join(name);
        fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    /// Parse the aggregate `cpu` line of `/proc/stat`.
    ///
    /// Total covers user through steal; idle includes iowait.
    pub fn parse_cpu_times(content: &str) -> Option<CpuTimes> {
        let line = content.lines().find(|l| l.starts_with("cpu "))?;
        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .take(8)
            .map(|v| v.parse().unwrap_or(0))
            .collect();
        if fields.len() < 4 {
            return None;
        }

        let total = fields.iter().sum();
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        Some(CpuTimes { total, idle })
    }

    /// Busy percentage between two samples, `None` if no time elapsed
    pub fn cpu_usage_percent(prev: CpuTimes, current: CpuTimes) -> Option<f64> {
        let total = current.total.checked_sub(prev.total)?;
        if total == 0 {
            return None;
        }
        let idle = current.idle.saturating_sub(prev.idle).min(total);
        Some((total - idle) as f64 / total as f64 * 100.0)
    }

    /// Returns (MemTotal, MemAvailable) in bytes
    pub fn parse_meminfo(content: &str) -> (u64, u64) {
        let mut total = 0u64;
        let mut available = 0u64;

        for line in content.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 2 {
                let kib: u64 = parts[1].parse().unwrap_or(0);
                match parts[0] {
                    "MemTotal:" => total = kib * 1024,
                    "MemAvailable:" => available = kib * 1024,
                    _ => {}
                }
            }
        }

        (total, available)
    }

    pub fn parse_loadavg(content: &str) -> Option<(f64, f64, f64)> {
        let mut parts = content.split_whitespace().map(|v| v.parse::<f64>().ok());
        Some((parts.next()??, parts.next()??, parts.next()??))
    }

    pub fn parse_uptime(content: &str) -> Option<u64> {
        let secs: f64 = content.split_whitespace().next()?.parse().ok()?;
        Some(secs as u64)
    }
}
