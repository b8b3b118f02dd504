//! Chassis command

use anyhow::Result;
use colored::Colorize;

use crate::client::SnapshotClient;
use crate::output::{color_temp, print_heading, print_json, print_warning, OutputFormat};

/// Show chassis sensors and the commanded fan speed
pub async fn show_chassis(client: &SnapshotClient, format: OutputFormat) -> Result<()> {
    let doc = client.fetch().await?;
    let chassis = &doc.chassis;

    if format == OutputFormat::Json {
        return print_json(chassis);
    }

    print_heading("Chassis");
    if !chassis.available {
        print_warning("BMC unavailable, showing last known readings");
    }
    println!(
        "Backend:      {}",
        chassis.backend.as_deref().unwrap_or("-").cyan()
    );
    if let Some(updated) = chassis.updated_at {
        println!("Updated:      {}", updated.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("Inlet:        {}", color_temp(chassis.inlet_temp));
    println!("Exhaust:      {}", color_temp(chassis.exhaust_temp));
    println!("Power:        {}W", chassis.power_consumption_watts);
    println!("Fan target:   {}%", chassis.target_fan_percent);

    let cpus: Vec<String> = chassis.cpu_temps.iter().map(|t| color_temp(*t)).collect();
    println!("CPU temps:    {}", if cpus.is_empty() { "-".to_string() } else { cpus.join(" ") });

    let fans: Vec<String> = chassis.fan_speeds_rpm.iter().map(|r| r.to_string()).collect();
    println!("Fans (RPM):   {}", if fans.is_empty() { "-".to_string() } else { fans.join(" ") });

    for (i, psu) in chassis.psus.iter().enumerate() {
        println!(
            "PSU {}:        {:.1}A @ {:.0}V",
            i + 1,
            psu.current_amps,
            psu.voltage_volts
        );
    }

    Ok(())
}
