//! Chassis telemetry and fan actuation through the BMC
//!
//! The baseboard management controller is reached only through external
//! tooling. Three backends are supported:
//! - FreeIPMI (`ipmi-sensors` / `ipmi-raw`), fast CSV bulk queries
//! - ipmitool over `lanplus`, slower pipe-delimited tables
//! - ipmitool executed on a remote host over ssh
//!
//! The BMC tolerates a single in-flight session, so sensor polls and fan
//! commands share one operation guard and contending requests are dropped.

mod backend;
mod controller;
mod parse;

pub use backend::{Backend, BackendSelection};
pub use controller::{ChassisConfig, ChassisController};
pub use parse::{parse_freeipmi_sensors, parse_ipmitool_sensors};
