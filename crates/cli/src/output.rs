//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use temper_lib::models::InferenceStatus;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

impl OutputFormat {
    /// Parse a format name from the config file
    pub fn from_name(name: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(name, true).ok()
    }
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a section heading
pub fn print_heading(title: &str) {
    println!("{}", title.bold());
    println!("{}", "=".repeat(50));
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2}Gi", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2}Mi", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}Ki", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Milliwatts as whole watts
pub fn format_watts(milliwatts: u32) -> String {
    format!("{}W", milliwatts / 1000)
}

pub fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else {
        format!("{}h {}m", hours, minutes)
    }
}

/// Temperature colored by how hot it runs
pub fn color_temp(celsius: u32) -> String {
    let formatted = format!("{}°C", celsius);
    if celsius >= 85 {
        formatted.red().bold().to_string()
    } else if celsius >= 70 {
        formatted.yellow().to_string()
    } else {
        formatted.green().to_string()
    }
}

pub fn color_status(status: InferenceStatus) -> String {
    match status {
        InferenceStatus::Ready => status.as_str().green().to_string(),
        InferenceStatus::Loading => status.as_str().yellow().to_string(),
        InferenceStatus::Idle => status.as_str().blue().to_string(),
        InferenceStatus::Offline => status.as_str().red().to_string(),
    }
}

/// Throttle alert, or a dash when the GPU runs free
pub fn color_alert(alert: &str) -> String {
    if alert.is_empty() {
        "-".to_string()
    } else {
        alert.red().bold().to_string()
    }
}
