//! Sensor table parsing
//!
//! Both parsers are lenient: malformed lines, unreadable values and unknown
//! sensors are skipped. Only well-formed numeric readings land in the
//! snapshot.

use crate::models::{ChassisSnapshot, PsuReading};

/// Highest PSU index accepted from a sensor name
const MAX_PSUS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SensorKind {
    Temperature,
    Fan,
    Power,
    Current,
    Voltage,
    Other,
}

impl SensorKind {
    fn from_freeipmi_type(sensor_type: &str) -> Self {
        match sensor_type {
            "Temperature" => SensorKind::Temperature,
            "Fan" => SensorKind::Fan,
            "Power Supply" | "Power Unit" => SensorKind::Power,
            "Current" => SensorKind::Current,
            "Voltage" => SensorKind::Voltage,
            _ => SensorKind::Other,
        }
    }

    fn from_ipmitool_unit(unit: &str) -> Self {
        match unit.to_ascii_lowercase().as_str() {
            "degrees c" => SensorKind::Temperature,
            "rpm" => SensorKind::Fan,
            "watts" => SensorKind::Power,
            "amps" => SensorKind::Current,
            "volts" => SensorKind::Voltage,
            _ => SensorKind::Other,
        }
    }
}

/// Parse `ipmi-sensors --comma-separated-output --output-sensor-state`
///
/// Columns: ID, Name, Type, State, Reading, Units, Event.
pub fn parse_freeipmi_sensors(output: &str) -> ChassisSnapshot {
    let mut snapshot = ChassisSnapshot::default();

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split(',').map(strip_quotes).collect();
        if fields.len() < 6 {
            continue;
        }

        let Some(value) = parse_reading(fields[4]) else {
            continue;
        };
        let kind = SensorKind::from_freeipmi_type(fields[2]);
        apply_reading(&mut snapshot, fields[1], kind, value);
    }

    snapshot
}

/// Parse `ipmitool sensor` pipe-delimited output
///
/// Columns: Name | Reading | Units | Status | thresholds...
pub fn parse_ipmitool_sensors(output: &str) -> ChassisSnapshot {
    let mut snapshot = ChassisSnapshot::default();

    for line in output.lines() {
        let fields: Vec<&str> = line.split('|').map(str::trim).collect();
        if fields.len() < 3 {
            continue;
        }

        let Some(value) = parse_reading(fields[1]) else {
            continue;
        };
        let kind = SensorKind::from_ipmitool_unit(fields[2]);
        apply_reading(&mut snapshot, fields[0], kind, value);
    }

    snapshot
}

fn strip_quotes(field: &str) -> &str {
    let field = field.trim();
    field
        .strip_prefix('\'')
        .and_then(|f| f.strip_suffix('\''))
        .unwrap_or(field)
}

fn parse_reading(reading: &str) -> Option<f32> {
    reading.trim().parse::<f32>().ok().filter(|v| v.is_finite())
}

fn apply_reading(snapshot: &mut ChassisSnapshot, name: &str, kind: SensorKind, value: f32) {
    match name {
        "Inlet Temp" => snapshot.inlet_temp = value as u32,
        "Exhaust Temp" => snapshot.exhaust_temp = value as u32,
        "Pwr Consumption" => snapshot.power_consumption_watts = value as u32,
        _ if kind == SensorKind::Temperature && name.contains("Temp") => {
            snapshot.cpu_temps.push(value as u32)
        }
        _ if kind == SensorKind::Fan => snapshot.fan_speeds_rpm.push(value as u32),
        _ if kind == SensorKind::Current => {
            if let Some(psu) = psu_slot(snapshot, name, "Current") {
                psu.current_amps = value;
            }
        }
        _ if kind == SensorKind::Voltage => {
            if let Some(psu) = psu_slot(snapshot, name, "Voltage") {
                psu.voltage_volts = value;
            }
        }
        _ => {}
    }
}

/// `"Current 2"` -> second PSU entry, growing the list as needed
fn psu_slot<'a>(
    snapshot: &'a mut ChassisSnapshot,
    name: &str,
    prefix: &str,
) -> Option<&'a mut PsuReading> {
    let index: usize = name.strip_prefix(prefix)?.trim().parse().ok()?;
    if index == 0 || index > MAX_PSUS {
        return None;
    }
    if snapshot.psus.len() < index {
        snapshot.psus.resize(index, PsuReading::default());
    }
    snapshot.psus.get_mut(index - 1)
}
