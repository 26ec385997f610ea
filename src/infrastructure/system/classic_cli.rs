//! Classic Bluetooth via OS tooling
//!
//! Linux drives `bluetoothctl`; macOS reads `system_profiler` and has no
//! programmatic connect or disconnect, so those are no-ops there. Other
//! platforms report no devices. None of these expose an RFCOMM data
//! channel, so writes are accepted and counted but not transmitted.

use crate::domain::models::ClassicDeviceInfo;
use crate::error::{BridgeError, Result};
use crate::infrastructure::bluetooth::platform::ClassicPlatform;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostOs {
    Linux,
    MacOs,
    Other,
}

pub struct SystemClassicPlatform {
    os: HostOs,
}

impl SystemClassicPlatform {
    pub fn detect() -> Self {
        let os = match std::env::consts::OS {
            "linux" => HostOs::Linux,
            "macos" => HostOs::MacOs,
            _ => HostOs::Other,
        };
        info!("Classic Bluetooth backend: {:?}", os);
        Self { os }
    }

    async fn discover_linux(&self) -> Result<Vec<ClassicDeviceInfo>> {
        let listing = run("bluetoothctl", &["devices"]).await?;
        let mut devices = Vec::new();

        for (address, name) in parse_bluetoothctl_devices(&listing) {
            let (paired, connected) = match run("bluetoothctl", &["info", &address]).await {
                Ok(info) => parse_bluetoothctl_info(&info),
                Err(e) => {
                    debug!("bluetoothctl info {} failed: {}", address, e);
                    (false, false)
                }
            };
            devices.push(ClassicDeviceInfo {
                name,
                address,
                paired,
                connected,
            });
        }

        Ok(devices)
    }

    async fn discover_macos(&self) -> Result<Vec<ClassicDeviceInfo>> {
        // Optional active inquiry; system_profiler alone only lists known devices
        if let Err(e) = run_with_timeout("blueutil", &["--inquiry", "5"], Duration::from_secs(6)).await {
            debug!("blueutil not available, using system_profiler only: {}", e);
        }

        let report = run("system_profiler", &["SPBluetoothDataType", "-json"]).await?;
        let devices = parse_system_profiler(&report);
        info!("macOS discovery found {} devices", devices.len());
        Ok(devices)
    }
}

#[async_trait]
impl ClassicPlatform for SystemClassicPlatform {
    async fn discover(&self) -> Result<Vec<ClassicDeviceInfo>> {
        match self.os {
            HostOs::Linux => self.discover_linux().await,
            HostOs::MacOs => self.discover_macos().await,
            HostOs::Other => {
                debug!("Classic discovery unsupported on this platform");
                Ok(Vec::new())
            }
        }
    }

    async fn connect(&self, address: &str) -> Result<()> {
        match self.os {
            HostOs::Linux => run("bluetoothctl", &["connect", address]).await.map(|_| ()),
            HostOs::MacOs => {
                if !self.is_connected(address).await.unwrap_or(false) {
                    info!(
                        "Cannot force a classic connection to {} on macOS; assuming it is made out-of-band",
                        address
                    );
                }
                Ok(())
            }
            HostOs::Other => Ok(()),
        }
    }

    async fn disconnect(&self, address: &str) -> Result<()> {
        match self.os {
            HostOs::Linux => run("bluetoothctl", &["disconnect", address]).await.map(|_| ()),
            // No radio-level disconnect available; bookkeeping only
            HostOs::MacOs | HostOs::Other => {
                info!("Disconnecting from device: {}", address);
                Ok(())
            }
        }
    }

    async fn is_connected(&self, address: &str) -> Result<bool> {
        match self.os {
            HostOs::Linux => {
                let info = run("bluetoothctl", &["info", address]).await?;
                Ok(parse_bluetoothctl_info(&info).1)
            }
            HostOs::MacOs => {
                let report = run("system_profiler", &["SPBluetoothDataType", "-json"]).await?;
                Ok(parse_system_profiler(&report)
                    .iter()
                    .any(|d| d.connected && d.address.eq_ignore_ascii_case(address)))
            }
            HostOs::Other => Ok(true),
        }
    }

    async fn write(&self, address: &str, data: &[u8]) -> Result<()> {
        debug!("Accepted {} bytes for {} (no classic data channel)", data.len(), address);
        Ok(())
    }
}

async fn run(program: &str, args: &[&str]) -> Result<String> {
    run_with_timeout(program, args, COMMAND_TIMEOUT).await
}

async fn run_with_timeout(program: &str, args: &[&str], timeout: Duration) -> Result<String> {
    let output = tokio::time::timeout(timeout, Command::new(program).args(args).output())
        .await
        .map_err(|_| BridgeError::adapter(format!("{} timed out", program)))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!("{} {:?} failed: {}", program, args, stderr.trim());
        return Err(BridgeError::adapter(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `bluetoothctl devices` lines (`Device AA:BB:CC:DD:EE:FF Name`).
fn parse_bluetoothctl_devices(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("Device ")?;
            let (address, name) = rest.split_once(' ')?;
            is_mac_address(address).then(|| (address.to_uppercase(), name.trim().to_string()))
        })
        .collect()
}

/// Extract `(paired, connected)` from `bluetoothctl info` output.
fn parse_bluetoothctl_info(output: &str) -> (bool, bool) {
    let flag = |key: &str| {
        output
            .lines()
            .any(|line| line.trim().strip_prefix(key).map(str::trim) == Some("yes"))
    };
    (flag("Paired:"), flag("Connected:"))
}

fn is_mac_address(s: &str) -> bool {
    let parts: Vec<&str> = s.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Parse `system_profiler SPBluetoothDataType -json`. Malformed input
/// yields an empty list.
fn parse_system_profiler(json: &str) -> Vec<ClassicDeviceInfo> {
    let Ok(report) = serde_json::from_str::<Value>(json) else {
        warn!("Unreadable system_profiler output");
        return Vec::new();
    };
    let Some(section) = report
        .get("SPBluetoothDataType")
        .and_then(|v| v.get(0))
    else {
        return Vec::new();
    };

    let mut devices = Vec::new();
    for (key, connected) in [("device_connected", true), ("device_not_connected", false)] {
        let Some(entries) = section.get(key).and_then(Value::as_array) else {
            continue;
        };
        for entry in entries.iter().filter_map(Value::as_object) {
            for (name, info) in entry {
                if let Some(address) = info.get("device_address").and_then(Value::as_str) {
                    devices.push(ClassicDeviceInfo {
                        name: name.clone(),
                        address: address.to_string(),
                        paired: true,
                        connected,
                    });
                }
            }
        }
    }
    devices
}
