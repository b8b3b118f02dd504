//! GPU commands

use anyhow::Result;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};
use temper_lib::models::GpuTelemetry;

use crate::client::SnapshotClient;
use crate::output::{
    color_alert, color_temp, format_bytes, format_watts, print_heading, print_json, print_warning,
    OutputFormat,
};

/// Row for the GPU table
#[derive(Tabled)]
struct GpuRow {
    #[tabled(rename = "GPU")]
    index: u32,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Temp")]
    temperature: String,
    #[tabled(rename = "Fan")]
    fan: String,
    #[tabled(rename = "Power")]
    power: String,
    #[tabled(rename = "Util")]
    utilization: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "P-State")]
    p_state: String,
    #[tabled(rename = "Throttle")]
    alert: String,
}

impl From<&GpuTelemetry> for GpuRow {
    fn from(gpu: &GpuTelemetry) -> Self {
        Self {
            index: gpu.index,
            name: gpu.name.clone(),
            temperature: color_temp(gpu.temperature),
            fan: format!("{}% (target {}%)", gpu.fan_speed_percent, gpu.target_fan_percent),
            power: format!(
                "{} / {}",
                format_watts(gpu.power_usage_mw),
                format_watts(gpu.power_limit_mw)
            ),
            utilization: format!("{}%", gpu.utilization.gpu),
            memory: format!(
                "{} / {}",
                format_bytes(gpu.memory.used_bytes),
                format_bytes(gpu.memory.total_bytes)
            ),
            p_state: format!("P{}", gpu.p_state),
            alert: color_alert(&gpu.throttle_alert),
        }
    }
}

/// Row for the per-GPU process table
#[derive(Tabled)]
struct ProcessRow {
    #[tabled(rename = "PID")]
    pid: u32,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Memory")]
    memory: String,
}

/// Show every GPU, or one in detail
pub async fn show_gpus(
    client: &SnapshotClient,
    index: Option<u32>,
    format: OutputFormat,
) -> Result<()> {
    let doc = client.fetch().await?;

    if let Some(index) = index {
        let Some(gpu) = doc.gpus.iter().find(|g| g.index == index) else {
            anyhow::bail!("GPU {} not found ({} reported)", index, doc.gpus.len());
        };
        return match format {
            OutputFormat::Json => print_json(gpu),
            OutputFormat::Table => {
                print_gpu_detail(gpu);
                Ok(())
            }
        };
    }

    match format {
        OutputFormat::Json => print_json(&doc.gpus),
        OutputFormat::Table => {
            if doc.gpus.is_empty() {
                print_warning("No GPUs reported");
                return Ok(());
            }
            let rows: Vec<GpuRow> = doc.gpus.iter().map(GpuRow::from).collect();
            println!("{}", Table::new(rows).with(Style::rounded()));
            Ok(())
        }
    }
}

fn print_gpu_detail(gpu: &GpuTelemetry) {
    print_heading(&format!("GPU {}: {}", gpu.index, gpu.name));
    println!("Serial:       {}", gpu.serial);
    println!("VBIOS:        {}", gpu.vbios);
    println!("P-State:      P{} ({})", gpu.p_state, gpu.p_state_description);
    println!("Temperature:  {}", color_temp(gpu.temperature));
    println!(
        "Fan:          {}% (target {}%)",
        gpu.fan_speed_percent, gpu.target_fan_percent
    );
    println!(
        "Power:        {} / {}",
        format_watts(gpu.power_usage_mw),
        format_watts(gpu.power_limit_mw)
    );
    println!(
        "Clocks:       {} MHz gfx / {} MHz mem (max {} / {})",
        gpu.clocks.graphics, gpu.clocks.memory, gpu.clocks.max_graphics, gpu.clocks.max_memory
    );
    println!(
        "PCIe:         Gen{} x{}  tx {} KB/s  rx {} KB/s",
        gpu.pcie.gen, gpu.pcie.width, gpu.pcie.tx_throughput_kbs, gpu.pcie.rx_throughput_kbs
    );
    println!(
        "ECC:          {} corrected / {} uncorrected (volatile)",
        gpu.ecc.volatile_single, gpu.ecc.volatile_double
    );
    println!(
        "Throttle:     {:#x} {}",
        gpu.throttle_reasons,
        color_alert(&gpu.throttle_alert)
    );
    println!();

    if gpu.processes.is_empty() {
        println!("{}", "No processes".dimmed());
        return;
    }
    let rows: Vec<ProcessRow> = gpu
        .processes
        .iter()
        .map(|p| ProcessRow {
            pid: p.pid,
            name: p.name.clone(),
            memory: format_bytes(p.used_memory_bytes),
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()));
}
