//! Telemetry snapshot types and the unified metrics document

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Host statistics sampled from procfs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostSnapshot {
    pub cpu_usage_percent: f64,
    pub mem_total_bytes: u64,
    pub mem_available_bytes: u64,
    pub load_avg_1m: f64,
    pub load_avg_5m: f64,
    pub load_avg_15m: f64,
    pub uptime_secs: u64,
}

/// One power supply's current/voltage pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PsuReading {
    pub current_amps: f32,
    pub voltage_volts: f32,
}

/// Chassis sensors read through the baseboard management controller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChassisSnapshot {
    #[serde(rename = "ipmi_available")]
    pub available: bool,
    pub inlet_temp: u32,
    pub exhaust_temp: u32,
    pub power_consumption_watts: u32,
    pub fan_speeds_rpm: Vec<u32>,
    pub cpu_temps: Vec<u32>,
    pub psus: Vec<PsuReading>,
    /// Last fan percentage commanded by the control loop
    pub target_fan_percent: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ChassisSnapshot {
    /// Hottest CPU sensor, if any were reported
    pub fn max_cpu_temp(&self) -> Option<u32> {
        self.cpu_temps.iter().copied().max()
    }
}

/// Inference service lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InferenceStatus {
    #[default]
    Offline,
    Loading,
    Ready,
    Idle,
}

impl InferenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InferenceStatus::Offline => "OFFLINE",
            InferenceStatus::Loading => "LOADING",
            InferenceStatus::Ready => "READY",
            InferenceStatus::Idle => "IDLE",
        }
    }
}

impl std::fmt::Display for InferenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-slot execution context on the inference service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotMetrics {
    pub id: i64,
    pub n_ctx: i64,
    pub state: String,
    pub tokens_cached: i64,

    pub prompt_n: i64,
    pub prompt_ms: f64,
    pub predicted_n: i64,
    pub predicted_ms: f64,
    pub cache_n: i64,

    pub kv_pos_min: i64,
    pub kv_pos_max: i64,
    pub kv_cells_used: i64,
    pub kv_utilization: f64,
    pub kv_cache_efficiency: f64,

    pub prompt_tokens_per_sec: f64,
    pub generation_tokens_per_sec: f64,
    pub speculative_acceptance_rate: f64,
    pub draft_tokens_total: i64,
    pub draft_tokens_accepted: i64,
}

impl Default for SlotMetrics {
    fn default() -> Self {
        Self {
            id: -1,
            n_ctx: 0,
            state: "unknown".to_string(),
            tokens_cached: 0,
            prompt_n: 0,
            prompt_ms: 0.0,
            predicted_n: 0,
            predicted_ms: 0.0,
            cache_n: 0,
            kv_pos_min: -1,
            kv_pos_max: -1,
            kv_cells_used: 0,
            kv_utilization: 0.0,
            kv_cache_efficiency: 0.0,
            prompt_tokens_per_sec: 0.0,
            generation_tokens_per_sec: 0.0,
            speculative_acceptance_rate: 0.0,
            draft_tokens_total: 0,
            draft_tokens_accepted: 0,
        }
    }
}

impl SlotMetrics {
    pub fn is_busy(&self) -> bool {
        !matches!(self.state.as_str(), "idle" | "unknown" | "")
    }
}

/// Latest known state of the locally hosted inference service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceSnapshot {
    pub status: InferenceStatus,
    pub model: Option<String>,
    pub model_path: Option<String>,
    pub load_progress: f64,
    pub n_ctx: i64,
    pub slots_used: usize,
    pub slots_total: usize,
    pub slots: Vec<SlotMetrics>,

    pub prompt_tokens_total: u64,
    pub tokens_predicted_total: u64,
    pub prompt_seconds_total: f64,
    pub tokens_predicted_seconds_total: f64,
    pub n_decode_total: u64,
    pub n_busy_slots_per_decode: f64,
    pub prompt_tokens_seconds: f64,
    pub predicted_tokens_seconds: f64,
    pub kv_cache_usage_ratio: f64,
    pub kv_cache_tokens: u64,
    pub requests_processing: u64,
    pub requests_deferred: u64,
    pub n_tokens_max: u64,
}

/// A process holding memory on a GPU
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuProcess {
    pub pid: u32,
    #[serde(rename = "used_memory")]
    pub used_memory_bytes: u64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuUtilization {
    pub gpu: u32,
    pub memory: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuMemory {
    #[serde(rename = "total")]
    pub total_bytes: u64,
    #[serde(rename = "used")]
    pub used_bytes: u64,
}

/// Current and maximum clocks in MHz
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuClocks {
    pub graphics: u32,
    pub memory: u32,
    pub sm: u32,
    pub video: u32,
    pub max_graphics: u32,
    pub max_memory: u32,
    pub max_sm: u32,
    pub max_video: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcieStatus {
    pub tx_throughput_kbs: u32,
    pub rx_throughput_kbs: u32,
    pub gen: u32,
    pub width: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EccCounts {
    pub volatile_single: u64,
    pub volatile_double: u64,
    pub aggregate_single: u64,
    pub aggregate_double: u64,
}

/// Full per-device GPU telemetry for one control tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuTelemetry {
    pub index: u32,
    pub name: String,
    pub serial: String,
    pub vbios: String,
    pub p_state: u32,
    pub p_state_description: String,
    pub temperature: u32,
    pub fan_speed_percent: u32,
    pub target_fan_percent: u32,
    pub power_usage_mw: u32,
    pub power_limit_mw: u32,
    pub utilization: GpuUtilization,
    pub memory: GpuMemory,
    pub clocks: GpuClocks,
    pub pcie: PcieStatus,
    pub ecc: EccCounts,
    pub processes: Vec<GpuProcess>,
    pub throttle_reasons: u64,
    pub throttle_alert: String,
}

/// The document served to dashboards: one join of every subsystem
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsDocument {
    pub timestamp: i64,
    pub host: HostSnapshot,
    pub ai_service: InferenceSnapshot,
    pub chassis: ChassisSnapshot,
    pub gpus: Vec<GpuTelemetry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_top_level_schema() {
        let doc = MetricsDocument::default();
        let value = serde_json::to_value(&doc).unwrap();

        assert!(value["host"].is_object());
        assert!(value["ai_service"]["slots"].is_array());
        assert_eq!(value["ai_service"]["status"], "OFFLINE");
        assert_eq!(value["chassis"]["ipmi_available"], false);
        assert!(value["gpus"].is_array());
    }

    #[test]
    fn test_document_round_trips_for_clients() {
        let mut doc = MetricsDocument::default();
        doc.ai_service.status = InferenceStatus::Ready;
        doc.ai_service.model = Some("qwen".to_string());
        doc.chassis.cpu_temps = vec![41, 47];

        let json = serde_json::to_string(&doc).unwrap();
        let parsed: MetricsDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn test_gpu_memory_keys() {
        let gpu = GpuTelemetry {
            memory: GpuMemory {
                total_bytes: 48 << 30,
                used_bytes: 12 << 30,
            },
            processes: vec![GpuProcess {
                pid: 4242,
                used_memory_bytes: 10 << 30,
                name: "llama-server".to_string(),
            }],
            ..GpuTelemetry::default()
        };
        let value = serde_json::to_value(&gpu).unwrap();

        assert_eq!(value["memory"]["total"], 48u64 << 30);
        assert_eq!(value["memory"]["used"], 12u64 << 30);
        assert_eq!(value["processes"][0]["used_memory"], 10u64 << 30);
        assert!(value["memory"].get("total_bytes").is_none());
    }

    #[test]
    fn test_slot_busy() {
        let mut slot = SlotMetrics::default();
        assert!(!slot.is_busy());
        slot.state = "processing".to_string();
        assert!(slot.is_busy());
        slot.state = "idle".to_string();
        assert!(!slot.is_busy());
    }

    #[test]
    fn test_max_cpu_temp() {
        let mut chassis = ChassisSnapshot::default();
        assert_eq!(chassis.max_cpu_temp(), None);
        chassis.cpu_temps = vec![40, 52, 47];
        assert_eq!(chassis.max_cpu_temp(), Some(52));
    }
}
