//! Thermal and power control for GPU inference hosts
//!
//! This crate provides the core functionality for:
//! - Per-GPU fan and power-limit curves
//! - Chassis telemetry and fan control through the BMC
//! - Inference service monitoring
//! - Host statistics
//! - The metrics snapshot server and the control loop that feeds it

pub mod chassis;
pub mod curve;
pub mod gpu;
pub mod host;
pub mod inference;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod process;
pub mod server;

pub use curve::ControlCurve;
pub use models::*;
pub use observability::{ChassisSource, EventLogger};
pub use orchestrator::{ControlConfig, ControlLoop};
pub use server::{ServerState, SnapshotStore};
