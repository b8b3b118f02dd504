//! Fixed-period control loop
//!
//! Each tick reads every GPU, drives its fans and power limit from the
//! configured curves, and publishes the joined metrics document. Host
//! statistics and the chassis fan decision run on a slower cadence, and the
//! chassis sensor poll is kicked off in the background when due.

use crate::chassis::ChassisController;
use crate::curve::ControlCurve;
use crate::gpu::{is_thermal_distress, throttle_alert, GpuBackend, GpuError};
use crate::host::HostMonitor;
use crate::inference::InferenceMonitor;
use crate::models::{GpuTelemetry, InferenceSnapshot, MetricsDocument};
use crate::observability::{ChassisSource, EventLogger};
use crate::server::SnapshotStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Host statistics are refreshed every this many ticks
pub const HOST_SAMPLE_TICKS: u64 = 10;
/// Chassis fan target is re-evaluated every this many ticks
pub const CHASSIS_DECISION_TICKS: u64 = 10;
/// A GPU fan at or above this percentage counts as thermal distress
pub const DISTRESS_FAN_PERCENT: u32 = 95;
/// How long shutdown waits for the BMC before giving up
const CHASSIS_RESTORE_WAIT: Duration = Duration::from_secs(30);

/// Curves and timing for the control loop
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Per-GPU fan curve (°C -> %). Empty disables fan actuation.
    pub fan_curve: ControlCurve,
    /// Per-GPU power curve (°C -> W). Empty leaves power limits alone.
    pub power_curve: ControlCurve,
    /// Chassis fan curve (°C -> %). Empty disables chassis actuation.
    pub chassis_curve: ControlCurve,
    pub interval: Duration,
    pub chassis_poll_interval: Duration,
    /// Power limit forced while a GPU reports thermal throttling
    pub safety_power_watts: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            fan_curve: ControlCurve::default(),
            power_curve: ControlCurve::default(),
            chassis_curve: ControlCurve::default(),
            interval: Duration::from_millis(100),
            chassis_poll_interval: Duration::from_secs(30),
            safety_power_watts: 100,
        }
    }
}

/// Power limit for one GPU: the curve's answer unless the device is
/// thermally throttling, in which case the safety wattage always wins.
///
/// Returns the watts to apply and whether the override fired.
pub fn power_target(curve_watts: u32, throttle_reasons: u64, safety_watts: u32) -> (u32, bool) {
    if is_thermal_distress(throttle_reasons) {
        (safety_watts, true)
    } else {
        (curve_watts, false)
    }
}

/// Pick the temperature that drives the chassis fans.
///
/// CPU sensors lead. A GPU in distress takes over when it is hotter, and
/// without CPU readings the hottest GPU is used.
pub fn chassis_source(cpu_temp: Option<u32>, gpu_temp: u32, gpu_distress: bool) -> (ChassisSource, u32) {
    match cpu_temp {
        None => (ChassisSource::GpuFallback, gpu_temp),
        Some(cpu) if gpu_distress && gpu_temp > cpu => (ChassisSource::GpuHelp, gpu_temp),
        Some(cpu) => (ChassisSource::Cpu, cpu),
    }
}

fn gpu_in_distress(gpu: &GpuTelemetry) -> bool {
    gpu.fan_speed_percent >= DISTRESS_FAN_PERCENT || is_thermal_distress(gpu.throttle_reasons)
}

/// The control loop and everything it actuates
pub struct ControlLoop {
    config: ControlConfig,
    gpu: Arc<dyn GpuBackend>,
    device_count: u32,
    host: HostMonitor,
    chassis: Arc<ChassisController>,
    inference: Option<Arc<InferenceMonitor>>,
    store: Arc<SnapshotStore>,
    logger: EventLogger,
    tick_count: u64,
    last_chassis_poll: Option<Instant>,
    last_chassis_decision: Option<(ChassisSource, u32)>,
    overridden: Vec<bool>,
}

impl ControlLoop {
    /// Create the loop, enumerating GPUs once
    pub fn new(
        config: ControlConfig,
        gpu: Arc<dyn GpuBackend>,
        chassis: Arc<ChassisController>,
        inference: Option<Arc<InferenceMonitor>>,
        store: Arc<SnapshotStore>,
        logger: EventLogger,
    ) -> Result<Self, GpuError> {
        let device_count = gpu.device_count()?;

        Ok(Self {
            config,
            gpu,
            device_count,
            host: HostMonitor::new(),
            chassis,
            inference,
            store,
            logger,
            tick_count: 0,
            last_chassis_poll: None,
            last_chassis_decision: None,
            overridden: vec![false; device_count as usize],
        })
    }

    /// Replace the host monitor (for a non-default proc root)
    pub fn with_host_monitor(mut self, host: HostMonitor) -> Self {
        self.host = host;
        self
    }

    pub fn device_count(&self) -> u32 {
        self.device_count
    }

    /// Run until shutdown is signalled, then restore automatic fan control
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            gpus = self.device_count,
            interval_ms = self.config.interval.as_millis() as u64,
            fan_curve = !self.config.fan_curve.is_empty(),
            power_curve = !self.config.power_curve.is_empty(),
            chassis = self.chassis.is_enabled(),
            "Starting control loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    self.tick().await;

                    let elapsed = start.elapsed();
                    if elapsed > self.config.interval {
                        debug!(elapsed_ms = elapsed.as_millis() as u64, "Control tick overran its period");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down control loop");
                    break;
                }
            }
        }

        self.shutdown().await;
    }

    /// One control period. Returns the published document.
    pub async fn tick(&mut self) -> MetricsDocument {
        let tick = self.tick_count;
        self.tick_count += 1;

        let mut gpus = Vec::with_capacity(self.device_count as usize);
        for index in 0..self.device_count {
            match self.control_gpu(index) {
                Ok(telemetry) => gpus.push(telemetry),
                Err(e) => warn!(gpu = index, error = %e, "GPU control failed"),
            }
        }

        if tick % HOST_SAMPLE_TICKS == 0 {
            self.host.sample().await;
        }

        self.maybe_poll_chassis();

        if tick % CHASSIS_DECISION_TICKS == 0 {
            self.decide_chassis_fan(&gpus).await;
        }

        let ai_service = match &self.inference {
            Some(monitor) => monitor.snapshot().await,
            None => InferenceSnapshot::default(),
        };

        let document = MetricsDocument {
            timestamp: Utc::now().timestamp(),
            host: self.host.snapshot().clone(),
            ai_service,
            chassis: self.chassis.snapshot().await,
            gpus,
        };
        self.store.publish(&document).await;
        document
    }

    /// Read one GPU, actuate it, and build its telemetry
    fn control_gpu(&mut self, index: u32) -> Result<GpuTelemetry, GpuError> {
        let temperature = self.gpu.temperature(index)?;
        let reasons = self.gpu.throttle_reasons(index).unwrap_or_else(|e| {
            debug!(gpu = index, error = %e, "Failed to read throttle reasons");
            0
        });

        let target_fan = if self.config.fan_curve.is_empty() {
            0
        } else {
            let target = self.config.fan_curve.evaluate(temperature);
            if let Err(e) = self.gpu.set_fan_speed(index, target) {
                debug!(gpu = index, error = %e, "Failed to set fan speed");
            }
            target
        };

        let power_limit_mw = if self.config.power_curve.is_empty() {
            self.gpu.power_limit_mw(index).unwrap_or(0)
        } else {
            let curve_watts = self.config.power_curve.evaluate(temperature);
            let (watts, overridden) =
                power_target(curve_watts, reasons, self.config.safety_power_watts);
            self.track_override(index, overridden, temperature, reasons, curve_watts);

            if let Err(e) = self.gpu.set_power_limit(index, watts) {
                debug!(gpu = index, error = %e, "Failed to set power limit");
            }
            watts.saturating_mul(1000)
        };

        let mut telemetry = self.gpu.device_details(index);
        telemetry.index = index;
        telemetry.temperature = temperature;
        telemetry.fan_speed_percent = self.gpu.fan_speed(index).unwrap_or(0);
        telemetry.target_fan_percent = target_fan;
        telemetry.power_usage_mw = self.gpu.power_usage_mw(index).unwrap_or(0);
        telemetry.power_limit_mw = power_limit_mw;
        telemetry.throttle_reasons = reasons;
        telemetry.throttle_alert = throttle_alert(reasons).to_string();
        Ok(telemetry)
    }

    /// Log override transitions only, not every tick spent throttled
    fn track_override(&mut self, index: u32, active: bool, temperature: u32, reasons: u64, curve_watts: u32) {
        let Some(was_active) = self.overridden.get_mut(index as usize) else {
            return;
        };
        if active && !*was_active {
            self.logger.log_reactive_override(
                index,
                temperature,
                reasons,
                curve_watts,
                self.config.safety_power_watts,
            );
        } else if !active && *was_active {
            self.logger.log_override_cleared(index, temperature);
        }
        *was_active = active;
    }

    fn maybe_poll_chassis(&mut self) {
        if !self.chassis.is_enabled() {
            return;
        }
        let due = self
            .last_chassis_poll
            .map_or(true, |last| last.elapsed() >= self.config.chassis_poll_interval);
        if due && self.chassis.start_async_poll() {
            self.last_chassis_poll = Some(Instant::now());
        }
    }

    async fn decide_chassis_fan(&mut self, gpus: &[GpuTelemetry]) {
        if !self.chassis.is_enabled() || self.config.chassis_curve.is_empty() {
            return;
        }

        let chassis = self.chassis.snapshot().await;
        let cpu_temp = if chassis.available {
            chassis.max_cpu_temp()
        } else {
            None
        };
        let gpu_temp = gpus.iter().map(|g| g.temperature).max().unwrap_or(0);
        let distress = gpus.iter().any(gpu_in_distress);

        let (source, temperature) = chassis_source(cpu_temp, gpu_temp, distress);
        let target = self.config.chassis_curve.evaluate(temperature);
        let dispatched = self.chassis.request_fan_speed(target).await;

        if self.last_chassis_decision != Some((source, target)) {
            self.logger
                .log_chassis_decision(source, cpu_temp, gpu_temp, target, dispatched);
            self.last_chassis_decision = Some((source, target));
        } else {
            debug!(
                source = source.as_str(),
                target_percent = target,
                dispatched,
                "Chassis fan target unchanged"
            );
        }
    }

    /// Hand every fan back to automatic control and let background work finish
    pub async fn shutdown(&self) {
        for index in 0..self.device_count {
            if let Err(e) = self.gpu.restore_auto_fans(index) {
                warn!(gpu = index, error = %e, "Failed to restore automatic fan control");
            }
        }

        if self.chassis.is_enabled() {
            self.chassis.wait_for_poll().await;
            self.chassis.restore_automatic(CHASSIS_RESTORE_WAIT).await;
        }

        info!(gpus = self.device_count, "Automatic fan control restored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chassis::{BackendSelection, ChassisConfig};
    use crate::gpu::{THROTTLE_HW_THERMAL, THROTTLE_SW_POWER_CAP, THROTTLE_SW_THERMAL};
    use crate::process::{CommandOutput, CommandRunner, ProcessError, ProcessRunner};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every actuation against a fixed set of fake GPUs
    #[derive(Default)]
    struct MockGpu {
        temps: Mutex<Vec<u32>>,
        reasons: Mutex<Vec<u64>>,
        fan_sets: Mutex<Vec<(u32, u32)>>,
        power_sets: Mutex<Vec<(u32, u32)>>,
        restored: Mutex<Vec<u32>>,
    }

    impl MockGpu {
        fn new(temps: Vec<u32>) -> Self {
            let reasons = vec![0; temps.len()];
            Self {
                temps: Mutex::new(temps),
                reasons: Mutex::new(reasons),
                ..Default::default()
            }
        }

        fn set_reasons(&self, index: usize, reasons: u64) {
            self.reasons.lock().unwrap()[index] = reasons;
        }
    }

    impl GpuBackend for MockGpu {
        fn device_count(&self) -> crate::gpu::Result<u32> {
            Ok(self.temps.lock().unwrap().len() as u32)
        }

        fn temperature(&self, index: u32) -> crate::gpu::Result<u32> {
            self.temps
                .lock()
                .unwrap()
                .get(index as usize)
                .copied()
                .ok_or(GpuError::Device {
                    index,
                    action: "read temperature",
                    message: "no such device".to_string(),
                })
        }

        fn fan_speed(&self, index: u32) -> crate::gpu::Result<u32> {
            let sets = self.fan_sets.lock().unwrap();
            Ok(sets
                .iter()
                .rev()
                .find(|(i, _)| *i == index)
                .map(|(_, p)| *p)
                .unwrap_or(30))
        }

        fn set_fan_speed(&self, index: u32, percent: u32) -> crate::gpu::Result<()> {
            self.fan_sets.lock().unwrap().push((index, percent));
            Ok(())
        }

        fn restore_auto_fans(&self, index: u32) -> crate::gpu::Result<()> {
            self.restored.lock().unwrap().push(index);
            Ok(())
        }

        fn power_usage_mw(&self, _index: u32) -> crate::gpu::Result<u32> {
            Ok(250_000)
        }

        fn power_limit_mw(&self, _index: u32) -> crate::gpu::Result<u32> {
            Ok(350_000)
        }

        fn set_power_limit(&self, index: u32, watts: u32) -> crate::gpu::Result<()> {
            self.power_sets.lock().unwrap().push((index, watts));
            Ok(())
        }

        fn throttle_reasons(&self, index: u32) -> crate::gpu::Result<u64> {
            Ok(self.reasons.lock().unwrap()[index as usize])
        }

        fn device_details(&self, index: u32) -> GpuTelemetry {
            GpuTelemetry {
                index,
                name: "Mock RTX 6000".to_string(),
                ..GpuTelemetry::default()
            }
        }
    }

    /// BMC stand-in reporting one CPU sensor. Sensor reads take `delay`.
    struct MockBmc {
        cpu_temp: u32,
        delay: Duration,
        calls: Mutex<Vec<String>>,
    }

    impl MockBmc {
        fn new(cpu_temp: u32, delay: Duration) -> Self {
            Self {
                cpu_temp,
                delay,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn sensor_reads(&self) -> usize {
            self.calls().iter().filter(|c| *c == "sensors done").count()
        }
    }

    #[async_trait]
    impl CommandRunner for MockBmc {
        async fn run(&self, argv: &[String], _timeout: Duration) -> Result<CommandOutput, ProcessError> {
            let stdout = if argv[0] == "ipmi-sensors" {
                self.calls.lock().unwrap().push("sensors start".to_string());
                tokio::time::sleep(self.delay).await;
                self.calls.lock().unwrap().push("sensors done".to_string());
                format!(
                    "3,Inlet Temp,Temperature,Nominal,22.00,C,'OK'\n5,Temp,Temperature,Nominal,{}.00,C,'OK'\n",
                    self.cpu_temp
                )
            } else {
                let bytes = &argv[argv.len().saturating_sub(4)..];
                self.calls.lock().unwrap().push(bytes.join(" "));
                String::new()
            };
            Ok(CommandOutput {
                exit_code: Some(0),
                stdout,
                stderr: String::new(),
            })
        }
    }

    fn fan_config() -> ControlConfig {
        ControlConfig {
            fan_curve: ControlCurve::parse("30:20 60:50 80:100"),
            ..ControlConfig::default()
        }
    }

    fn build(config: ControlConfig, gpu: Arc<MockGpu>, chassis: Arc<ChassisController>) -> (ControlLoop, Arc<SnapshotStore>) {
        let store = Arc::new(SnapshotStore::new());
        let control = ControlLoop::new(config, gpu, chassis, None, store.clone(), EventLogger::new("test-node"))
            .unwrap()
            .with_host_monitor(HostMonitor::with_proc_path("/nonexistent-proc-root"));
        (control, store)
    }

    fn no_chassis() -> Arc<ChassisController> {
        Arc::new(ChassisController::disabled(Arc::new(ProcessRunner)))
    }

    async fn bmc_chassis(cpu_temp: u32) -> Arc<ChassisController> {
        recording_chassis(cpu_temp, Duration::ZERO).await.0
    }

    async fn recording_chassis(cpu_temp: u32, delay: Duration) -> (Arc<ChassisController>, Arc<MockBmc>) {
        let config = ChassisConfig {
            host: "10.0.0.5".to_string(),
            user: "root".to_string(),
            password: "calvin".to_string(),
            backend: BackendSelection::FreeIpmi,
        };
        let bmc = Arc::new(MockBmc::new(cpu_temp, delay));
        let chassis = Arc::new(ChassisController::init(config, bmc.clone()).await);
        (chassis, bmc)
    }

    #[test]
    fn test_power_target_override_wins_for_every_temperature() {
        let curve = ControlCurve::parse("40:200 70:300 85:400");
        for temp in [0, 40, 55, 70, 85, 120] {
            let (watts, overridden) = power_target(curve.evaluate(temp), THROTTLE_SW_THERMAL, 100);
            assert_eq!(watts, 100);
            assert!(overridden);
        }
        assert_eq!(power_target(300, THROTTLE_SW_POWER_CAP, 100), (300, false));
        assert_eq!(power_target(300, 0, 100), (300, false));
    }

    #[test]
    fn test_chassis_source() {
        assert_eq!(chassis_source(Some(50), 80, false), (ChassisSource::Cpu, 50));
        assert_eq!(chassis_source(Some(50), 80, true), (ChassisSource::GpuHelp, 80));
        assert_eq!(chassis_source(Some(85), 80, true), (ChassisSource::Cpu, 85));
        assert_eq!(chassis_source(None, 64, false), (ChassisSource::GpuFallback, 64));
    }

    #[tokio::test]
    async fn test_tick_drives_fans_and_publishes() {
        let gpu = Arc::new(MockGpu::new(vec![45, 90]));
        let (mut control, store) = build(fan_config(), gpu.clone(), no_chassis());

        let doc = control.tick().await;

        assert_eq!(*gpu.fan_sets.lock().unwrap(), vec![(0, 35), (1, 100)]);
        assert_eq!(doc.gpus.len(), 2);
        assert_eq!(doc.gpus[0].target_fan_percent, 35);
        assert_eq!(doc.gpus[1].fan_speed_percent, 100);
        assert_eq!(doc.gpus[0].name, "Mock RTX 6000");
        // No power curve: limit read back from the device
        assert_eq!(doc.gpus[0].power_limit_mw, 350_000);
        assert!(gpu.power_sets.lock().unwrap().is_empty());

        let published: MetricsDocument = serde_json::from_slice(&store.current().await).unwrap();
        assert_eq!(published.gpus, doc.gpus);
    }

    #[tokio::test]
    async fn test_empty_fan_curve_does_not_actuate() {
        let gpu = Arc::new(MockGpu::new(vec![70]));
        let (mut control, _store) = build(ControlConfig::default(), gpu.clone(), no_chassis());

        let doc = control.tick().await;
        assert!(gpu.fan_sets.lock().unwrap().is_empty());
        assert_eq!(doc.gpus[0].target_fan_percent, 0);
    }

    #[tokio::test]
    async fn test_reactive_override_clamps_power() {
        let gpu = Arc::new(MockGpu::new(vec![60, 60]));
        gpu.set_reasons(1, THROTTLE_HW_THERMAL);

        let config = ControlConfig {
            power_curve: ControlCurve::parse("40:300 80:400"),
            safety_power_watts: 100,
            ..fan_config()
        };
        let (mut control, _store) = build(config, gpu.clone(), no_chassis());

        let doc = control.tick().await;
        assert_eq!(*gpu.power_sets.lock().unwrap(), vec![(0, 350), (1, 100)]);
        assert_eq!(doc.gpus[1].power_limit_mw, 100_000);
        assert_eq!(doc.gpus[1].throttle_alert, "HW Thermal Slowdown");
        assert_eq!(doc.gpus[0].throttle_alert, "");

        // Throttling clears, curve resumes
        gpu.set_reasons(1, 0);
        control.tick().await;
        assert_eq!(gpu.power_sets.lock().unwrap()[3], (1, 350));
    }

    #[tokio::test]
    async fn test_failed_gpu_is_skipped() {
        let gpu = Arc::new(MockGpu::new(vec![50, 50]));
        let (mut control, _store) = build(fan_config(), gpu.clone(), no_chassis());

        gpu.temps.lock().unwrap().truncate(1);
        let doc = control.tick().await;
        assert_eq!(doc.gpus.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_restores_every_gpu() {
        let gpu = Arc::new(MockGpu::new(vec![40, 50, 60]));
        let (control, _store) = build(fan_config(), gpu.clone(), no_chassis());

        control.shutdown().await;
        assert_eq!(*gpu.restored.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_shutdown_joins_poll_before_restoring_chassis() {
        let gpu = Arc::new(MockGpu::new(vec![55]));
        let (chassis, bmc) = recording_chassis(45, Duration::from_millis(50)).await;
        let (mut control, _store) = build(fan_config(), gpu.clone(), chassis.clone());

        // First tick leaves a slow sensor poll in flight
        control.tick().await;
        assert!(chassis.is_busy());

        control.shutdown().await;

        assert_eq!(*gpu.restored.lock().unwrap(), vec![0]);
        assert_eq!(
            bmc.calls(),
            vec!["sensors start", "sensors done", "0x30 0x30 0x01 0x01"]
        );
        assert!(!chassis.is_busy());
    }

    #[tokio::test]
    async fn test_chassis_poll_repeats_after_interval() {
        let gpu = Arc::new(MockGpu::new(vec![55]));
        let (chassis, bmc) = recording_chassis(45, Duration::ZERO).await;
        let config = ControlConfig {
            chassis_poll_interval: Duration::from_millis(50),
            ..fan_config()
        };
        let (mut control, _store) = build(config, gpu, chassis.clone());

        control.tick().await;
        chassis.wait_for_poll().await;
        assert_eq!(bmc.sensor_reads(), 1);

        // Not due yet
        control.tick().await;
        chassis.wait_for_poll().await;
        assert_eq!(bmc.sensor_reads(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        control.tick().await;
        chassis.wait_for_poll().await;
        assert_eq!(bmc.sensor_reads(), 2);
    }

    #[tokio::test]
    async fn test_chassis_follows_cpu_without_distress() {
        let gpu = Arc::new(MockGpu::new(vec![70]));
        let chassis = bmc_chassis(50).await;
        let config = ControlConfig {
            chassis_curve: ControlCurve::parse("30:20 60:50 80:100"),
            ..ControlConfig::default()
        };
        let (mut control, _store) = build(config, gpu.clone(), chassis.clone());

        // First tick starts the sensor poll
        control.tick().await;
        chassis.wait_for_poll().await;
        assert!(chassis.snapshot().await.available);

        let gpus = vec![GpuTelemetry {
            temperature: 70,
            ..GpuTelemetry::default()
        }];
        control.decide_chassis_fan(&gpus).await;
        assert_eq!(chassis.snapshot().await.target_fan_percent, 40);
        assert_eq!(control.last_chassis_decision, Some((ChassisSource::Cpu, 40)));
    }

    #[tokio::test]
    async fn test_chassis_helps_distressed_gpu() {
        let gpu = Arc::new(MockGpu::new(vec![80]));
        let chassis = bmc_chassis(50).await;
        let config = ControlConfig {
            chassis_curve: ControlCurve::parse("30:20 60:50 80:100"),
            ..ControlConfig::default()
        };
        let (mut control, _store) = build(config, gpu.clone(), chassis.clone());

        control.tick().await;
        chassis.wait_for_poll().await;

        let gpus = vec![GpuTelemetry {
            temperature: 80,
            throttle_reasons: THROTTLE_SW_THERMAL,
            ..GpuTelemetry::default()
        }];
        control.decide_chassis_fan(&gpus).await;
        assert_eq!(chassis.snapshot().await.target_fan_percent, 100);
        assert_eq!(control.last_chassis_decision, Some((ChassisSource::GpuHelp, 100)));

        // Fan pinned at maximum also counts as distress
        let gpus = vec![GpuTelemetry {
            temperature: 70,
            fan_speed_percent: 97,
            ..GpuTelemetry::default()
        }];
        assert!(gpu_in_distress(&gpus[0]));
    }
}
