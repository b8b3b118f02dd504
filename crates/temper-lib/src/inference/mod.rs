//! Monitoring of the locally hosted inference service
//!
//! Each poll cycle probes liveness, reads the model catalog, and for a
//! ready model fetches per-slot state, Prometheus metrics and model
//! properties. The published snapshot is replaced wholesale, and stages that
//! fail keep the last known-good values instead of resetting them.

mod monitor;
mod parse;
mod prom_text;

pub use monitor::{InferenceConfig, InferenceMonitor, POLL_INTERVAL};
pub use parse::{parse_catalog, parse_props, parse_slots, CatalogState, ModelProps};
pub use prom_text::parse_samples;
