//! Lenient readers for the inference service's JSON endpoints
//!
//! Responses are decoded into [`serde_json::Value`] and fields are picked
//! out individually, so a missing or mistyped field falls back to its
//! default instead of rejecting the whole document.

use crate::models::SlotMetrics;
use serde_json::Value;

/// What the model catalog says about the active model
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogState {
    Loading { model: String, progress: f64 },
    Ready { model: String },
    Idle,
}

/// Fields read from the properties endpoint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelProps {
    pub model_alias: Option<String>,
    pub model_path: Option<String>,
    pub n_ctx: Option<i64>,
}

/// Interpret the model catalog.
///
/// Returns `None` when the body is not a recognizable catalog.
pub fn parse_catalog(body: &str) -> Option<CatalogState> {
    let value: Value = serde_json::from_str(body).ok()?;
    let entries = match &value {
        Value::Array(entries) => entries,
        Value::Object(map) => map
            .get("data")
            .or_else(|| map.get("models"))
            .and_then(Value::as_array)?,
        _ => return None,
    };

    let mut ready = None;
    for entry in entries {
        let (status, progress) = entry_status(entry);
        match status {
            Some("loading") => {
                return Some(CatalogState::Loading {
                    model: entry_id(entry),
                    progress,
                })
            }
            Some("loaded") | Some("ready") if ready.is_none() => ready = Some(entry_id(entry)),
            _ => {}
        }
    }

    Some(match ready {
        Some(model) => CatalogState::Ready { model },
        None => CatalogState::Idle,
    })
}

fn entry_id(entry: &Value) -> String {
    ["id", "name", "model"]
        .iter()
        .find_map(|key| entry.get(*key).and_then(Value::as_str))
        .filter(|id| !id.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

/// `status` is either `{"value": "...", "load_progress": f}` or a bare string
fn entry_status(entry: &Value) -> (Option<&str>, f64) {
    match entry.get("status") {
        Some(Value::String(s)) => (Some(s.as_str()), 0.0),
        Some(Value::Object(status)) => (
            status.get("value").and_then(Value::as_str),
            status
                .get("load_progress")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
        ),
        _ => (None, 0.0),
    }
}

/// Read the per-slot array. Returns `None` when the body is not an array.
pub fn parse_slots(body: &str) -> Option<Vec<SlotMetrics>> {
    let value: Value = serde_json::from_str(body).ok()?;
    let slots = value.as_array()?;
    Some(slots.iter().map(parse_slot).collect())
}

fn parse_slot(slot: &Value) -> SlotMetrics {
    let mut out = SlotMetrics {
        id: int(slot, "id", -1),
        n_ctx: int(slot, "n_ctx", 0),
        state: slot_state(slot),
        prompt_n: int(slot, "prompt_n", 0),
        prompt_ms: float(slot, "prompt_ms"),
        predicted_n: int(slot, "predicted_n", 0),
        predicted_ms: float(slot, "predicted_ms"),
        cache_n: int(slot, "cache_n", 0),
        ..SlotMetrics::default()
    };

    if let Some(kv) = slot.get("kv_cache").filter(|v| v.is_object()) {
        out.kv_pos_min = int(kv, "pos_min", -1);
        out.kv_pos_max = int(kv, "pos_max", -1);
        out.kv_cells_used = int(kv, "cells_used", 0);
        out.kv_utilization = float(kv, "utilization");
        out.kv_cache_efficiency = float(kv, "cache_efficiency");
        out.tokens_cached = if out.kv_pos_max >= 0 {
            out.kv_pos_max + 1
        } else {
            out.kv_cells_used
        };
    }

    if let Some(perf) = slot.get("performance").filter(|v| v.is_object()) {
        out.prompt_tokens_per_sec = float(perf, "prompt_tokens_per_sec");
        out.generation_tokens_per_sec = float(perf, "generation_tokens_per_sec");
        out.speculative_acceptance_rate = float(perf, "speculative_acceptance_rate");
        out.draft_tokens_total = int(perf, "draft_tokens_total", 0);
        out.draft_tokens_accepted = int(perf, "draft_tokens_accepted", 0);
    }

    out
}

/// Older servers report a numeric state (0 = idle), newer ones a string or
/// an `is_processing` flag.
fn slot_state(slot: &Value) -> String {
    match slot.get("state") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => {
            if n.as_i64() == Some(0) {
                "idle".to_string()
            } else {
                "processing".to_string()
            }
        }
        _ => match slot.get("is_processing").and_then(Value::as_bool) {
            Some(true) => "processing".to_string(),
            Some(false) => "idle".to_string(),
            None => "unknown".to_string(),
        },
    }
}

/// Read the properties endpoint. Returns `None` when the body is not an object.
pub fn parse_props(body: &str) -> Option<ModelProps> {
    let value: Value = serde_json::from_str(body).ok()?;
    if !value.is_object() {
        return None;
    }

    let text = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let n_ctx = value
        .get("n_ctx")
        .or_else(|| value.pointer("/default_generation_settings/n_ctx"))
        .and_then(Value::as_i64);

    Some(ModelProps {
        model_alias: text("model_alias"),
        model_path: text("model_path"),
        n_ctx,
    })
}

fn int(value: &Value, key: &str, default: i64) -> i64 {
    match value.get(key) {
        Some(v) => v
            .as_i64()
            .or_else(|| v.as_f64().map(|f| f as i64))
            .unwrap_or(default),
        None => default,
    }
}

fn float(value: &Value, key: &str) -> f64 {
    value.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}
