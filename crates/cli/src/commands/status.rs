//! Overview and raw document commands

use anyhow::Result;
use colored::Colorize;

use crate::client::SnapshotClient;
use crate::output::{
    color_alert, color_status, color_temp, format_bytes, format_uptime, format_watts, print_heading,
    print_json, OutputFormat,
};

/// Show a one-screen overview
pub async fn show_status(client: &SnapshotClient, format: OutputFormat) -> Result<()> {
    let doc = client.fetch().await?;

    if format == OutputFormat::Json {
        return print_json(&doc);
    }

    print_heading("Host");
    let host = &doc.host;
    println!("CPU:        {:.1}%", host.cpu_usage_percent);
    println!(
        "Memory:     {} / {}",
        format_bytes(host.mem_total_bytes.saturating_sub(host.mem_available_bytes)),
        format_bytes(host.mem_total_bytes)
    );
    println!(
        "Load:       {:.2} {:.2} {:.2}",
        host.load_avg_1m, host.load_avg_5m, host.load_avg_15m
    );
    println!("Uptime:     {}", format_uptime(host.uptime_secs));
    println!();

    print_heading("GPUs");
    for gpu in &doc.gpus {
        println!(
            "[{}] {:<28} {}  fan {}%  {} / {}  {}",
            gpu.index,
            gpu.name,
            color_temp(gpu.temperature),
            gpu.fan_speed_percent,
            format_watts(gpu.power_usage_mw),
            format_watts(gpu.power_limit_mw),
            color_alert(&gpu.throttle_alert)
        );
    }
    if doc.gpus.is_empty() {
        println!("{}", "No GPUs reported".yellow());
    }
    println!();

    print_heading("Chassis");
    if doc.chassis.available {
        println!(
            "Inlet {}  Exhaust {}  {}W  fans -> {}%",
            color_temp(doc.chassis.inlet_temp),
            color_temp(doc.chassis.exhaust_temp),
            doc.chassis.power_consumption_watts,
            doc.chassis.target_fan_percent
        );
    } else {
        println!("{}", "BMC unavailable".yellow());
    }
    println!();

    print_heading("Inference");
    let ai = &doc.ai_service;
    println!(
        "{}  {}  slots {}/{}",
        color_status(ai.status),
        ai.model.as_deref().unwrap_or("-").cyan(),
        ai.slots_used,
        ai.slots_total
    );

    Ok(())
}

/// Print the document exactly as served
pub async fn show_raw(client: &SnapshotClient) -> Result<()> {
    let doc = client.fetch_raw().await?;
    print_json(&doc)
}
