//! GPU management interface
//!
//! The control loop talks to GPUs only through [`GpuBackend`]. The
//! production implementation is [`NvmlBackend`]; tests substitute their own.

mod nvml;

pub use nvml::NvmlBackend;

use crate::models::GpuTelemetry;
use thiserror::Error;

/// Clocks reduced by the software power cap
pub const THROTTLE_SW_POWER_CAP: u64 = 0x04;
/// Hardware slowdown (thermal or power brake)
pub const THROTTLE_HW_SLOWDOWN: u64 = 0x08;
/// Driver-initiated thermal slowdown
pub const THROTTLE_SW_THERMAL: u64 = 0x20;
/// Hardware thermal slowdown
pub const THROTTLE_HW_THERMAL: u64 = 0x40;

const THERMAL_DISTRESS_MASK: u64 = THROTTLE_HW_SLOWDOWN | THROTTLE_SW_THERMAL | THROTTLE_HW_THERMAL;

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("GPU management library unavailable: {0}")]
    Init(String),

    #[error("GPU {index}: {action} failed: {message}")]
    Device {
        index: u32,
        action: &'static str,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, GpuError>;

/// Synchronous per-device reads and writes against the vendor library.
///
/// Power values are in milliwatts except [`GpuBackend::set_power_limit`],
/// which takes whole watts.
pub trait GpuBackend: Send + Sync {
    fn device_count(&self) -> Result<u32>;

    fn temperature(&self, index: u32) -> Result<u32>;

    /// Speed of the first fan in percent
    fn fan_speed(&self, index: u32) -> Result<u32>;

    /// Set every fan on the device to `percent`
    fn set_fan_speed(&self, index: u32, percent: u32) -> Result<()>;

    /// Hand every fan back to the driver's automatic policy
    fn restore_auto_fans(&self, index: u32) -> Result<()>;

    fn power_usage_mw(&self, index: u32) -> Result<u32>;

    fn power_limit_mw(&self, index: u32) -> Result<u32>;

    fn set_power_limit(&self, index: u32, watts: u32) -> Result<()>;

    fn throttle_reasons(&self, index: u32) -> Result<u64>;

    /// Identity, utilization, memory, clocks, PCIe, ECC and processes.
    ///
    /// Best effort: fields the device cannot report stay at their defaults.
    /// Control fields (temperature, fans, power, throttle) are left for the
    /// caller.
    fn device_details(&self, index: u32) -> GpuTelemetry;
}

/// Any slowdown bit that indicates the device is fighting heat
pub fn is_thermal_distress(reasons: u64) -> bool {
    reasons & THERMAL_DISTRESS_MASK != 0
}

/// Human-readable alert for the dominant thermal throttle reason
pub fn throttle_alert(reasons: u64) -> &'static str {
    if reasons & THROTTLE_SW_THERMAL != 0 {
        "SW Thermal Slowdown"
    } else if reasons & (THROTTLE_HW_SLOWDOWN | THROTTLE_HW_THERMAL) != 0 {
        "HW Thermal Slowdown"
    } else {
        ""
    }
}

pub fn p_state_description(p_state: u32) -> &'static str {
    match p_state {
        0 => "Maximum Performance",
        1 => "Performance",
        2 => "Balanced",
        5 => "Compute/Video",
        8 => "Idle/Low Power",
        15 => "Minimum Power",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thermal_distress_bits() {
        assert!(!is_thermal_distress(0));
        assert!(!is_thermal_distress(THROTTLE_SW_POWER_CAP));
        assert!(is_thermal_distress(THROTTLE_HW_SLOWDOWN));
        assert!(is_thermal_distress(THROTTLE_SW_THERMAL | THROTTLE_SW_POWER_CAP));
        assert!(is_thermal_distress(THROTTLE_HW_THERMAL));
    }

    #[test]
    fn test_throttle_alert() {
        assert_eq!(throttle_alert(0), "");
        assert_eq!(throttle_alert(THROTTLE_SW_POWER_CAP), "");
        assert_eq!(throttle_alert(THROTTLE_SW_THERMAL | THROTTLE_HW_SLOWDOWN), "SW Thermal Slowdown");
        assert_eq!(throttle_alert(THROTTLE_HW_THERMAL), "HW Thermal Slowdown");
    }

    #[test]
    fn test_p_state_description() {
        assert_eq!(p_state_description(0), "Maximum Performance");
        assert_eq!(p_state_description(8), "Idle/Low Power");
        assert_eq!(p_state_description(3), "Unknown");
        assert_eq!(p_state_description(999), "Unknown");
    }
}
