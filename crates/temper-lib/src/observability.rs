//! Structured event logging for the control daemon
//!
//! Well-known events carry a fixed `event` field so they can be filtered
//! out of the JSON log stream without parsing messages.

use tracing::{info, warn};

/// Which temperature drove a chassis fan decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChassisSource {
    /// Hottest chassis CPU sensor
    Cpu,
    /// Hottest GPU, chosen because a GPU is in thermal distress
    GpuHelp,
    /// Hottest GPU, because the chassis reports no CPU sensors
    GpuFallback,
}

impl ChassisSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChassisSource::Cpu => "cpu",
            ChassisSource::GpuHelp => "gpu_help",
            ChassisSource::GpuFallback => "gpu_fallback",
        }
    }
}

/// Structured logger for daemon events
#[derive(Clone)]
pub struct EventLogger {
    node_name: String,
}

impl EventLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Log daemon startup
    pub fn log_startup(&self, version: &str, gpu_count: u32, chassis_enabled: bool) {
        info!(
            event = "daemon_started",
            node = %self.node_name,
            version = %version,
            gpu_count = gpu_count,
            chassis_enabled = chassis_enabled,
            "Thermal control daemon started"
        );
    }

    /// Log daemon shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "daemon_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Thermal control daemon shutting down"
        );
    }

    /// Log a chassis fan decision and the temperature source behind it
    pub fn log_chassis_decision(
        &self,
        source: ChassisSource,
        cpu_temp: Option<u32>,
        gpu_temp: u32,
        target_percent: u32,
        dispatched: bool,
    ) {
        info!(
            event = "chassis_fan_decision",
            node = %self.node_name,
            source = source.as_str(),
            cpu_temp = ?cpu_temp,
            gpu_temp = gpu_temp,
            target_percent = target_percent,
            dispatched = dispatched,
            "Chassis fan target evaluated"
        );
    }

    /// Log a reactive power clamp on a throttling GPU
    pub fn log_reactive_override(
        &self,
        gpu: u32,
        temperature: u32,
        throttle_reasons: u64,
        curve_watts: u32,
        safety_watts: u32,
    ) {
        warn!(
            event = "reactive_power_override",
            node = %self.node_name,
            gpu = gpu,
            temperature = temperature,
            throttle_reasons = format_args!("{:#x}", throttle_reasons),
            curve_watts = curve_watts,
            safety_watts = safety_watts,
            "GPU thermal throttling, clamping power limit"
        );
    }

    /// Log a reactive override clearing
    pub fn log_override_cleared(&self, gpu: u32, temperature: u32) {
        info!(
            event = "reactive_power_override_cleared",
            node = %self.node_name,
            gpu = gpu,
            temperature = temperature,
            "GPU throttling cleared, power curve resumed"
        );
    }
}
