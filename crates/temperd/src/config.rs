//! Daemon configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use temper_lib::chassis::{BackendSelection, ChassisConfig};
use temper_lib::inference::InferenceConfig;
use temper_lib::orchestrator::ControlConfig;
use temper_lib::ControlCurve;

/// Environment variable naming an optional configuration file
pub const CONFIG_FILE_ENV: &str = "TEMPER_CONFIG";

/// Daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Host name reported in structured events
    #[serde(default = "default_node_name")]
    pub node_name: String,

    #[serde(default = "default_server_port")]
    pub server_port: u16,

    #[serde(default = "default_server_bind")]
    pub server_bind: String,

    /// Shared secret for the snapshot server. Unset or empty leaves it open.
    #[serde(default)]
    pub server_token: Option<String>,

    /// Per-GPU fan curve, `temp:percent` pairs
    #[serde(default)]
    pub fan_setpoints: String,

    /// Per-GPU power curve, `temp:watts` pairs
    #[serde(default)]
    pub power_setpoints: String,

    /// Chassis fan curve. Empty reuses the GPU fan curve.
    #[serde(default)]
    pub chassis_fan_setpoints: String,

    /// BMC address. Empty disables chassis control.
    #[serde(default)]
    pub chassis_host: String,

    #[serde(default)]
    pub chassis_user: String,

    #[serde(default)]
    pub chassis_password: String,

    /// `auto`, `freeipmi`, `ipmitool` or `ssh`
    #[serde(default = "default_chassis_backend")]
    pub chassis_backend: String,

    #[serde(default = "default_llama_enabled")]
    pub llama_enabled: bool,

    #[serde(default = "default_llama_host")]
    pub llama_host: String,

    #[serde(default = "default_llama_port")]
    pub llama_port: u16,

    #[serde(default)]
    pub llama_api_prefix: String,

    #[serde(default)]
    pub llama_api_key: Option<String>,

    #[serde(default = "default_control_interval")]
    pub control_interval_ms: u64,

    #[serde(default = "default_chassis_poll_interval")]
    pub chassis_poll_interval_secs: u64,

    /// Power limit forced on a thermally throttling GPU
    #[serde(default = "default_safety_power")]
    pub safety_power_watts: u32,

    #[serde(default)]
    pub verbose: bool,
}

fn default_node_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
        })
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn default_server_port() -> u16 {
    3001
}

fn default_server_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_chassis_backend() -> String {
    "auto".to_string()
}

fn default_llama_enabled() -> bool {
    true
}

fn default_llama_host() -> String {
    "localhost".to_string()
}

fn default_llama_port() -> u16 {
    8081
}

fn default_control_interval() -> u64 {
    100
}

fn default_chassis_poll_interval() -> u64 {
    30
}

fn default_safety_power() -> u32 {
    100
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            server_port: default_server_port(),
            server_bind: default_server_bind(),
            server_token: None,
            fan_setpoints: String::new(),
            power_setpoints: String::new(),
            chassis_fan_setpoints: String::new(),
            chassis_host: String::new(),
            chassis_user: String::new(),
            chassis_password: String::new(),
            chassis_backend: default_chassis_backend(),
            llama_enabled: default_llama_enabled(),
            llama_host: default_llama_host(),
            llama_port: default_llama_port(),
            llama_api_prefix: String::new(),
            llama_api_key: None,
            control_interval_ms: default_control_interval(),
            chassis_poll_interval_secs: default_chassis_poll_interval(),
            safety_power_watts: default_safety_power(),
            verbose: false,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the optional `TEMPER_CONFIG` file and
    /// `TEMPER_*` environment variables, the environment taking precedence
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_FILE_ENV).ok().filter(|f| !f.is_empty());
        Self::load_from(file.as_deref(), None)
    }

    /// Load from an explicit file and environment map (for testing)
    pub fn load_from(
        file: Option<&str>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let config = builder
            .add_source(config::Environment::with_prefix("TEMPER").source(env))
            .build()
            .context("Failed to read configuration sources")?;

        config
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    pub fn fan_curve(&self) -> ControlCurve {
        ControlCurve::parse(&self.fan_setpoints)
    }

    pub fn power_curve(&self) -> ControlCurve {
        ControlCurve::parse(&self.power_setpoints)
    }

    pub fn chassis_curve(&self) -> ControlCurve {
        let curve = ControlCurve::parse(&self.chassis_fan_setpoints);
        if curve.is_empty() {
            self.fan_curve()
        } else {
            curve
        }
    }

    pub fn control_config(&self) -> ControlConfig {
        ControlConfig {
            fan_curve: self.fan_curve(),
            power_curve: self.power_curve(),
            chassis_curve: self.chassis_curve(),
            interval: Duration::from_millis(self.control_interval_ms.max(1)),
            chassis_poll_interval: Duration::from_secs(self.chassis_poll_interval_secs),
            safety_power_watts: self.safety_power_watts,
        }
    }

    pub fn chassis_backend(&self) -> Result<BackendSelection> {
        self.chassis_backend
            .parse::<BackendSelection>()
            .map_err(anyhow::Error::msg)
    }

    pub fn chassis_config(&self, backend: BackendSelection) -> ChassisConfig {
        ChassisConfig {
            host: self.chassis_host.clone(),
            user: self.chassis_user.clone(),
            password: self.chassis_password.clone(),
            backend,
        }
    }

    pub fn inference_config(&self) -> InferenceConfig {
        InferenceConfig {
            host: self.llama_host.clone(),
            port: self.llama_port,
            api_prefix: self.llama_api_prefix.clone(),
            api_key: self.llama_api_key.clone().filter(|k| !k.is_empty()),
        }
    }
}
