//! Backend-specific command construction

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Raw bytes: hand fan control to the host
pub const RAW_MANUAL_FAN_CONTROL: [&str; 4] = ["0x30", "0x30", "0x01", "0x00"];
/// Raw bytes: return fan control to the BMC
pub const RAW_AUTOMATIC_FAN_CONTROL: [&str; 4] = ["0x30", "0x30", "0x01", "0x01"];
/// Raw prefix for setting all fans; the percentage byte follows
pub const RAW_SET_FAN_SPEED: [&str; 4] = ["0x30", "0x30", "0x02", "0xff"];

const FREEIPMI_WORKAROUNDS: &str = "--workaround-flags=authcap,idzero,unexpectedauth,forcepermsg";

/// Backend requested in configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendSelection {
    /// Probe for FreeIPMI, fall back to ipmitool
    #[default]
    Auto,
    FreeIpmi,
    IpmiTool,
    Ssh,
}

impl FromStr for BackendSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(BackendSelection::Auto),
            "freeipmi" => Ok(BackendSelection::FreeIpmi),
            "ipmitool" => Ok(BackendSelection::IpmiTool),
            "ssh" => Ok(BackendSelection::Ssh),
            other => Err(format!("unknown chassis backend: {other}")),
        }
    }
}

/// Backend resolved at initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    FreeIpmi,
    IpmiTool,
    Ssh,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::FreeIpmi => "freeipmi",
            Backend::IpmiTool => "ipmitool",
            Backend::Ssh => "ssh",
        }
    }

    /// Command that dumps every sensor in the backend's text format
    pub fn sensor_command(&self, host: &str, user: &str, password: &str) -> Vec<String> {
        match self {
            Backend::FreeIpmi => {
                let mut args = freeipmi_session("ipmi-sensors", host, user, password);
                args.extend(
                    [
                        "--sdr-cache-recreate",
                        "--comma-separated-output",
                        "--output-sensor-state",
                        "--no-header-output",
                        "--quiet-cache",
                        "--ignore-not-available-sensors",
                        "--ignore-unrecognized-events",
                    ]
                    .map(String::from),
                );
                args
            }
            Backend::IpmiTool => {
                let mut args = ipmitool_session(host, user, password);
                args.push("sensor".to_string());
                args
            }
            Backend::Ssh => {
                let mut args = ssh_session(host, user);
                args.extend(["ipmitool", "sensor"].map(String::from));
                args
            }
        }
    }

    /// Command that sends raw bytes to the BMC
    pub fn raw_command(&self, host: &str, user: &str, password: &str, bytes: &[String]) -> Vec<String> {
        let mut args = match self {
            Backend::FreeIpmi => freeipmi_session("ipmi-raw", host, user, password),
            Backend::IpmiTool => {
                let mut args = ipmitool_session(host, user, password);
                args.push("raw".to_string());
                args
            }
            Backend::Ssh => {
                let mut args = ssh_session(host, user);
                args.extend(["ipmitool", "raw"].map(String::from));
                args
            }
        };
        args.extend(bytes.iter().cloned());
        args
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encode a fan percentage as the trailing raw byte
pub fn fan_speed_byte(percent: u32) -> String {
    format!("0x{:02x}", percent.min(100))
}

fn freeipmi_session(tool: &str, host: &str, user: &str, password: &str) -> Vec<String> {
    vec![
        tool.to_string(),
        "-h".to_string(),
        host.to_string(),
        "-u".to_string(),
        user.to_string(),
        "-p".to_string(),
        password.to_string(),
        "--driver-type=LAN_2_0".to_string(),
        "-l".to_string(),
        "OPERATOR".to_string(),
        FREEIPMI_WORKAROUNDS.to_string(),
        "--session-timeout=20000".to_string(),
        "--retransmission-timeout=2000".to_string(),
    ]
}

fn ipmitool_session(host: &str, user: &str, password: &str) -> Vec<String> {
    vec![
        "ipmitool".to_string(),
        "-I".to_string(),
        "lanplus".to_string(),
        "-H".to_string(),
        host.to_string(),
        "-U".to_string(),
        user.to_string(),
        "-P".to_string(),
        password.to_string(),
    ]
}

fn ssh_session(host: &str, user: &str) -> Vec<String> {
    let target = if user.is_empty() {
        host.to_string()
    } else {
        format!("{user}@{host}")
    };
    vec![
        "ssh".to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "ConnectTimeout=10".to_string(),
        target,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_from_str() {
        assert_eq!("auto".parse::<BackendSelection>(), Ok(BackendSelection::Auto));
        assert_eq!("".parse::<BackendSelection>(), Ok(BackendSelection::Auto));
        assert_eq!("FreeIPMI".parse::<BackendSelection>(), Ok(BackendSelection::FreeIpmi));
        assert_eq!("ipmitool".parse::<BackendSelection>(), Ok(BackendSelection::IpmiTool));
        assert_eq!("ssh".parse::<BackendSelection>(), Ok(BackendSelection::Ssh));
        assert!("redfish".parse::<BackendSelection>().is_err());
    }

    #[test]
    fn test_fan_speed_byte() {
        assert_eq!(fan_speed_byte(0), "0x00");
        assert_eq!(fan_speed_byte(30), "0x1e");
        assert_eq!(fan_speed_byte(100), "0x64");
        assert_eq!(fan_speed_byte(250), "0x64");
    }

    #[test]
    fn test_freeipmi_sensor_command() {
        let cmd = Backend::FreeIpmi.sensor_command("10.0.0.5", "root", "calvin");
        assert_eq!(cmd[0], "ipmi-sensors");
        assert!(cmd.windows(2).any(|w| w[0] == "-h" && w[1] == "10.0.0.5"));
        assert!(cmd.contains(&"--comma-separated-output".to_string()));
        assert!(cmd.contains(&"--no-header-output".to_string()));
    }

    #[test]
    fn test_raw_command_appends_bytes() {
        let bytes: Vec<String> = RAW_MANUAL_FAN_CONTROL.iter().map(|s| s.to_string()).collect();

        let cmd = Backend::IpmiTool.raw_command("bmc", "admin", "pw", &bytes);
        assert_eq!(&cmd[..3], &["ipmitool", "-I", "lanplus"]);
        assert_eq!(&cmd[cmd.len() - 5..], &["raw", "0x30", "0x30", "0x01", "0x00"]);

        let cmd = Backend::FreeIpmi.raw_command("bmc", "admin", "pw", &bytes);
        assert_eq!(cmd[0], "ipmi-raw");
        assert_eq!(cmd.last().map(String::as_str), Some("0x00"));
    }

    #[test]
    fn test_ssh_commands() {
        let cmd = Backend::Ssh.sensor_command("node7", "ops", "ignored");
        assert_eq!(cmd[0], "ssh");
        assert!(cmd.contains(&"ops@node7".to_string()));
        assert!(!cmd.contains(&"ignored".to_string()));
        assert_eq!(&cmd[cmd.len() - 2..], &["ipmitool", "sensor"]);

        let cmd = Backend::Ssh.sensor_command("node7", "", "");
        assert!(cmd.contains(&"node7".to_string()));
    }
}
