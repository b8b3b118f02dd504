//! Guarded chassis poll and actuation

use super::backend::{
    fan_speed_byte, Backend, BackendSelection, RAW_AUTOMATIC_FAN_CONTROL, RAW_MANUAL_FAN_CONTROL,
    RAW_SET_FAN_SPEED,
};
use super::parse::{parse_freeipmi_sensors, parse_ipmitool_sensors};
use crate::models::ChassisSnapshot;
use crate::process::{argv, CommandRunner};
use chrono::Utc;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Deadline for a full sensor dump
pub const SENSOR_TIMEOUT: Duration = Duration::from_secs(25);
/// Deadline for a single raw command
pub const RAW_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for the FreeIPMI availability probe
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// BMC connection settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChassisConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub backend: BackendSelection,
}

impl ChassisConfig {
    /// An empty host disables the chassis subsystem
    pub fn is_enabled(&self) -> bool {
        !self.host.trim().is_empty()
    }
}

/// Releases the shared operation flag on drop
struct OperationGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Reads chassis sensors and drives chassis fans through one BMC session
/// at a time.
pub struct ChassisController {
    config: ChassisConfig,
    backend: Option<Backend>,
    runner: Arc<dyn CommandRunner>,
    snapshot: RwLock<ChassisSnapshot>,
    busy: Arc<AtomicBool>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChassisController {
    /// Create a controller, resolving the backend once.
    ///
    /// With [`BackendSelection::Auto`] this probes for FreeIPMI and falls
    /// back to ipmitool.
    pub async fn init(config: ChassisConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let backend = if config.is_enabled() {
            let backend = resolve_backend(config.backend, runner.as_ref()).await;
            info!(host = %config.host, backend = %backend, "Chassis controller initialized");
            Some(backend)
        } else {
            debug!("No chassis host configured, chassis control disabled");
            None
        };

        Self {
            config,
            backend,
            runner,
            snapshot: RwLock::new(ChassisSnapshot::default()),
            busy: Arc::new(AtomicBool::new(false)),
            poll_task: Mutex::new(None),
        }
    }

    /// A controller that never touches the BMC
    pub fn disabled(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config: ChassisConfig::default(),
            backend: None,
            runner,
            snapshot: RwLock::new(ChassisSnapshot::default()),
            busy: Arc::new(AtomicBool::new(false)),
            poll_task: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backend(&self) -> Option<Backend> {
        self.backend
    }

    /// True while a poll or fan command holds the BMC session
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Copy of the latest published snapshot
    pub async fn snapshot(&self) -> ChassisSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Launch a background sensor poll.
    ///
    /// Returns false without spawning anything when the controller is
    /// disabled or another BMC operation is in flight.
    pub fn start_async_poll(self: &Arc<Self>) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let Some(guard) = self.try_begin() else {
            debug!("Chassis operation in flight, skipping poll");
            return false;
        };

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _guard = guard;
            this.poll_sensors().await;
        });

        if let Ok(mut slot) = self.poll_task.lock() {
            *slot = Some(handle);
        }
        true
    }

    /// Wait for the most recently launched poll to finish
    pub async fn wait_for_poll(&self) {
        let handle = self.poll_task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Chassis poll task failed");
            }
        }
    }

    /// Command chassis fans inline, waiting for both raw commands.
    ///
    /// The target is recorded even when the command is dropped because the
    /// BMC is busy; the control loop retries on its own schedule.
    pub async fn set_chassis_fan_speed(&self, percent: u32) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.record_target(percent).await;

        let Some(_guard) = self.try_begin() else {
            debug!(percent, "Chassis operation in flight, dropping fan command");
            return false;
        };
        self.apply_fan_speed(percent).await;
        true
    }

    /// Command chassis fans from a background task without blocking
    pub async fn request_fan_speed(self: &Arc<Self>, percent: u32) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.record_target(percent).await;

        let Some(guard) = self.try_begin() else {
            debug!(percent, "Chassis operation in flight, dropping fan command");
            return false;
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            this.apply_fan_speed(percent).await;
        });
        true
    }

    /// Hand fan control back to the BMC.
    ///
    /// Waits up to `wait` for an in-flight operation to release the session.
    pub async fn restore_automatic(&self, wait: Duration) -> bool {
        if !self.is_enabled() {
            return false;
        }

        let deadline = Instant::now() + wait;
        let guard = loop {
            if let Some(guard) = self.try_begin() {
                break guard;
            }
            if Instant::now() >= deadline {
                warn!("Chassis still busy, automatic fan control not restored");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        };

        self.send_raw(&argv(RAW_AUTOMATIC_FAN_CONTROL)).await;
        drop(guard);
        info!("Chassis fan control returned to BMC");
        true
    }

    fn try_begin(&self) -> Option<OperationGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| OperationGuard {
                flag: Arc::clone(&self.busy),
            })
    }

    async fn record_target(&self, percent: u32) {
        self.snapshot.write().await.target_fan_percent = percent;
    }

    async fn apply_fan_speed(&self, percent: u32) {
        self.send_raw(&argv(RAW_MANUAL_FAN_CONTROL)).await;

        let mut bytes = argv(RAW_SET_FAN_SPEED);
        bytes.push(fan_speed_byte(percent));
        self.send_raw(&bytes).await;

        debug!(percent, "Chassis fan speed set");
    }

    async fn send_raw(&self, bytes: &[String]) {
        let Some(backend) = self.backend else {
            return;
        };
        let cmd = backend.raw_command(
            &self.config.host,
            &self.config.user,
            &self.config.password,
            bytes,
        );

        match self.runner.run(&cmd, RAW_TIMEOUT).await {
            Ok(output) if output.success() => {}
            Ok(output) => debug!(
                exit_code = ?output.exit_code,
                stderr = %output.stderr.trim(),
                "Chassis raw command failed"
            ),
            Err(e) => debug!(error = %e, "Chassis raw command failed"),
        }
    }

    async fn poll_sensors(&self) {
        let Some(backend) = self.backend else {
            return;
        };
        let start = Instant::now();

        let cmd = backend.sensor_command(&self.config.host, &self.config.user, &self.config.password);
        let parsed = match self.runner.run(&cmd, SENSOR_TIMEOUT).await {
            Ok(output) if output.success() => Some(match backend {
                Backend::FreeIpmi => parse_freeipmi_sensors(&output.stdout),
                Backend::IpmiTool | Backend::Ssh => parse_ipmitool_sensors(&output.stdout),
            }),
            Ok(output) => {
                debug!(
                    exit_code = ?output.exit_code,
                    stderr = %output.stderr.trim(),
                    "Chassis sensor query failed"
                );
                None
            }
            Err(e) => {
                debug!(error = %e, "Chassis sensor query failed");
                None
            }
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match parsed.filter(|s| s.inlet_temp > 0) {
            Some(mut next) => {
                next.available = true;
                next.backend = Some(backend.name().to_string());
                next.updated_at = Some(Utc::now());
                info!(
                    event = "chassis_poll",
                    success = true,
                    elapsed_ms,
                    inlet_temp = next.inlet_temp,
                    exhaust_temp = next.exhaust_temp,
                    power_watts = next.power_consumption_watts,
                    fans = next.fan_speeds_rpm.len(),
                    cpus = next.cpu_temps.len(),
                    "Chassis poll successful"
                );
                self.publish(next).await;
            }
            None => {
                warn!(
                    event = "chassis_poll",
                    success = false,
                    elapsed_ms,
                    "Chassis poll failed, keeping last readings"
                );
                self.snapshot.write().await.available = false;
            }
        }
    }

    /// Swap in a fresh snapshot, carrying over the commanded fan target
    async fn publish(&self, mut next: ChassisSnapshot) {
        let mut current = self.snapshot.write().await;
        next.target_fan_percent = current.target_fan_percent;
        *current = next;
    }
}

async fn resolve_backend(selection: BackendSelection, runner: &dyn CommandRunner) -> Backend {
    match selection {
        BackendSelection::FreeIpmi => Backend::FreeIpmi,
        BackendSelection::IpmiTool => Backend::IpmiTool,
        BackendSelection::Ssh => Backend::Ssh,
        BackendSelection::Auto => {
            match runner.run(&argv(["ipmi-sensors", "--version"]), PROBE_TIMEOUT).await {
                Ok(output) if output.success() => {
                    debug!(version = %output.stdout.lines().next().unwrap_or(""), "FreeIPMI detected");
                    Backend::FreeIpmi
                }
                _ => Backend::IpmiTool,
            }
        }
    }
}
