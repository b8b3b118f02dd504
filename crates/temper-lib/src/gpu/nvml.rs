//! NVML pass-through backend

use super::{p_state_description, GpuBackend, GpuError, Result};
use crate::models::{EccCounts, GpuClocks, GpuMemory, GpuProcess, GpuTelemetry, GpuUtilization, PcieStatus};
use nvml_wrapper::enum_wrappers::device::{
    Clock, EccCounter, MemoryError, PcieUtilCounter, PerformanceState, TemperatureSensor,
};
use nvml_wrapper::enums::device::UsedGpuMemory;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::struct_wrappers::device::ProcessInfo;
use nvml_wrapper::{Device, Nvml};
use tracing::{debug, info};

const PROCESS_NAME_LEN: usize = 256;

/// Thin wrapper over the NVIDIA Management Library.
///
/// Device handles are looked up per call; NVML caches them internally.
pub struct NvmlBackend {
    nvml: Nvml,
}

impl NvmlBackend {
    /// Initialize NVML. Failure here is fatal for the daemon.
    pub fn init() -> Result<Self> {
        let nvml = Nvml::init().map_err(|e| GpuError::Init(e.to_string()))?;
        if let Ok(version) = nvml.sys_driver_version() {
            info!(driver_version = %version, "NVML initialized");
        }
        Ok(Self { nvml })
    }

    fn device(&self, index: u32) -> Result<Device<'_>> {
        self.nvml
            .device_by_index(index)
            .map_err(device_error(index, "get device handle"))
    }

    fn processes(&self, device: &Device<'_>) -> Vec<GpuProcess> {
        let mut infos: Vec<ProcessInfo> = device.running_compute_processes().unwrap_or_default();
        infos.extend(device.running_graphics_processes().unwrap_or_default());

        infos
            .into_iter()
            .map(|info| GpuProcess {
                pid: info.pid,
                used_memory_bytes: match info.used_gpu_memory {
                    UsedGpuMemory::Used(bytes) => bytes,
                    UsedGpuMemory::Unavailable => 0,
                },
                name: self
                    .nvml
                    .sys_process_name(info.pid, PROCESS_NAME_LEN)
                    .unwrap_or_else(|_| "Unknown".to_string()),
            })
            .collect()
    }
}

impl GpuBackend for NvmlBackend {
    fn device_count(&self) -> Result<u32> {
        self.nvml
            .device_count()
            .map_err(|e| GpuError::Init(e.to_string()))
    }

    fn temperature(&self, index: u32) -> Result<u32> {
        self.device(index)?
            .temperature(TemperatureSensor::Gpu)
            .map_err(device_error(index, "read temperature"))
    }

    fn fan_speed(&self, index: u32) -> Result<u32> {
        self.device(index)?
            .fan_speed(0)
            .map_err(device_error(index, "read fan speed"))
    }

    fn set_fan_speed(&self, index: u32, percent: u32) -> Result<()> {
        let mut device = self.device(index)?;
        let fans = device.num_fans().map_err(device_error(index, "count fans"))?;
        for fan in 0..fans {
            device
                .set_fan_speed(fan, percent.min(100))
                .map_err(device_error(index, "set fan speed"))?;
        }
        Ok(())
    }

    fn restore_auto_fans(&self, index: u32) -> Result<()> {
        let mut device = self.device(index)?;
        let fans = device.num_fans().map_err(device_error(index, "count fans"))?;
        for fan in 0..fans {
            device
                .set_default_fan_speed(fan)
                .map_err(device_error(index, "restore fan policy"))?;
        }
        debug!(gpu = index, fans, "Fan policy restored");
        Ok(())
    }

    fn power_usage_mw(&self, index: u32) -> Result<u32> {
        self.device(index)?
            .power_usage()
            .map_err(device_error(index, "read power usage"))
    }

    fn power_limit_mw(&self, index: u32) -> Result<u32> {
        self.device(index)?
            .enforced_power_limit()
            .map_err(device_error(index, "read power limit"))
    }

    fn set_power_limit(&self, index: u32, watts: u32) -> Result<()> {
        let mut device = self.device(index)?;
        let mut limit_mw = watts.saturating_mul(1000);

        // Out-of-range limits are rejected by the driver, so clamp first
        if let Ok(constraints) = device.power_management_limit_constraints() {
            limit_mw = limit_mw.clamp(constraints.min_limit, constraints.max_limit.max(constraints.min_limit));
        }

        device
            .set_power_management_limit(limit_mw)
            .map_err(device_error(index, "set power limit"))
    }

    fn throttle_reasons(&self, index: u32) -> Result<u64> {
        self.device(index)?
            .current_throttle_reasons()
            .map(|reasons| reasons.bits())
            .map_err(device_error(index, "read throttle reasons"))
    }

    fn device_details(&self, index: u32) -> GpuTelemetry {
        let mut telemetry = GpuTelemetry {
            index,
            ..GpuTelemetry::default()
        };
        let Ok(device) = self.device(index) else {
            return telemetry;
        };

        telemetry.name = device.name().unwrap_or_default();
        telemetry.serial = device.serial().unwrap_or_else(|_| "Unknown".to_string());
        telemetry.vbios = device.vbios_version().unwrap_or_else(|_| "Unknown".to_string());
        telemetry.p_state = device
            .performance_state()
            .map(p_state_number)
            .unwrap_or(u32::MAX);
        telemetry.p_state_description = p_state_description(telemetry.p_state).to_string();

        if let Ok(util) = device.utilization_rates() {
            telemetry.utilization = GpuUtilization {
                gpu: util.gpu,
                memory: util.memory,
            };
        }
        if let Ok(mem) = device.memory_info() {
            telemetry.memory = GpuMemory {
                total_bytes: mem.total,
                used_bytes: mem.used,
            };
        }

        let clock = |c: Clock| device.clock_info(c).unwrap_or(0);
        let max_clock = |c: Clock| device.max_clock_info(c).unwrap_or(0);
        telemetry.clocks = GpuClocks {
            graphics: clock(Clock::Graphics),
            memory: clock(Clock::Memory),
            sm: clock(Clock::SM),
            video: clock(Clock::Video),
            max_graphics: max_clock(Clock::Graphics),
            max_memory: max_clock(Clock::Memory),
            max_sm: max_clock(Clock::SM),
            max_video: max_clock(Clock::Video),
        };

        telemetry.pcie = PcieStatus {
            tx_throughput_kbs: device.pcie_throughput(PcieUtilCounter::Send).unwrap_or(0),
            rx_throughput_kbs: device.pcie_throughput(PcieUtilCounter::Receive).unwrap_or(0),
            gen: device.current_pcie_link_gen().unwrap_or(0),
            width: device.current_pcie_link_width().unwrap_or(0),
        };

        let ecc = |error: MemoryError, counter: EccCounter| {
            device.total_ecc_errors(error, counter).unwrap_or(0)
        };
        telemetry.ecc = EccCounts {
            volatile_single: ecc(MemoryError::Corrected, EccCounter::Volatile),
            volatile_double: ecc(MemoryError::Uncorrected, EccCounter::Volatile),
            aggregate_single: ecc(MemoryError::Corrected, EccCounter::Aggregate),
            aggregate_double: ecc(MemoryError::Uncorrected, EccCounter::Aggregate),
        };

        telemetry.processes = self.processes(&device);
        telemetry
    }
}

fn device_error(index: u32, action: &'static str) -> impl Fn(NvmlError) -> GpuError {
    move |e| GpuError::Device {
        index,
        action,
        message: e.to_string(),
    }
}

fn p_state_number(state: PerformanceState) -> u32 {
    match state {
        PerformanceState::Zero => 0,
        PerformanceState::One => 1,
        PerformanceState::Two => 2,
        PerformanceState::Three => 3,
        PerformanceState::Four => 4,
        PerformanceState::Five => 5,
        PerformanceState::Six => 6,
        PerformanceState::Seven => 7,
        PerformanceState::Eight => 8,
        PerformanceState::Nine => 9,
        PerformanceState::Ten => 10,
        PerformanceState::Eleven => 11,
        PerformanceState::Twelve => 12,
        PerformanceState::Thirteen => 13,
        PerformanceState::Fourteen => 14,
        PerformanceState::Fifteen => 15,
        PerformanceState::Unknown => u32::MAX,
    }
}
