//! Inference service command

use anyhow::Result;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};
use temper_lib::models::{InferenceStatus, SlotMetrics};

use crate::client::SnapshotClient;
use crate::output::{color_status, print_heading, print_json, OutputFormat};

/// Row for the slot table
#[derive(Tabled)]
struct SlotRow {
    #[tabled(rename = "Slot")]
    id: i64,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Context")]
    n_ctx: i64,
    #[tabled(rename = "Cached")]
    tokens_cached: i64,
    #[tabled(rename = "Prompt tok/s")]
    prompt_rate: String,
    #[tabled(rename = "Gen tok/s")]
    generation_rate: String,
}

impl From<&SlotMetrics> for SlotRow {
    fn from(slot: &SlotMetrics) -> Self {
        let state = if slot.is_busy() {
            slot.state.green().to_string()
        } else {
            slot.state.clone()
        };
        Self {
            id: slot.id,
            state,
            n_ctx: slot.n_ctx,
            tokens_cached: slot.tokens_cached,
            prompt_rate: format!("{:.1}", slot.prompt_tokens_per_sec),
            generation_rate: format!("{:.1}", slot.generation_tokens_per_sec),
        }
    }
}

/// Show inference service state, throughput and slots
pub async fn show_ai(client: &SnapshotClient, format: OutputFormat) -> Result<()> {
    let doc = client.fetch().await?;
    let ai = &doc.ai_service;

    if format == OutputFormat::Json {
        return print_json(ai);
    }

    print_heading("Inference Service");
    println!("Status:       {}", color_status(ai.status));
    println!("Model:        {}", ai.model.as_deref().unwrap_or("-").cyan());
    if let Some(path) = &ai.model_path {
        println!("Path:         {}", path);
    }

    match ai.status {
        InferenceStatus::Loading => {
            println!("Progress:     {:.0}%", ai.load_progress * 100.0);
            return Ok(());
        }
        InferenceStatus::Ready => {}
        _ => return Ok(()),
    }

    println!("Context:      {}", ai.n_ctx);
    println!("Slots:        {}/{} busy", ai.slots_used, ai.slots_total);
    println!(
        "Throughput:   {:.1} prompt tok/s, {:.1} gen tok/s",
        ai.prompt_tokens_seconds, ai.predicted_tokens_seconds
    );
    println!(
        "KV cache:     {:.0}% ({} tokens)",
        ai.kv_cache_usage_ratio * 100.0,
        ai.kv_cache_tokens
    );
    println!(
        "Requests:     {} processing, {} deferred",
        ai.requests_processing, ai.requests_deferred
    );
    println!();

    if !ai.slots.is_empty() {
        let rows: Vec<SlotRow> = ai.slots.iter().map(SlotRow::from).collect();
        println!("{}", Table::new(rows).with(Style::rounded()));
    }

    Ok(())
}
