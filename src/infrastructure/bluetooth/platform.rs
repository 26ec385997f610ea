//! Platform Capabilities
//!
//! The narrow interface the adapters call into. Concrete implementations
//! live in [`crate::infrastructure::system`]; tests substitute in-memory
//! fakes. Implementations return structured results or a typed error and
//! never leak their transport format (shell output, native handles) upward.

use crate::domain::models::{BleDeviceInfo, ClassicDeviceInfo};
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

/// Classic (RFCOMM-style) capability
#[async_trait]
pub trait ClassicPlatform: Send + Sync {
    /// Enumerate paired or visible devices.
    async fn discover(&self) -> Result<Vec<ClassicDeviceInfo>>;

    /// Best-effort connect. Platforms that cannot force a classic link
    /// return `Ok` and leave the connection to happen out-of-band.
    async fn connect(&self, address: &str) -> Result<()>;

    async fn disconnect(&self, address: &str) -> Result<()>;

    /// Platform-reported link state, used as the liveness probe.
    async fn is_connected(&self, address: &str) -> Result<bool>;

    async fn write(&self, address: &str, data: &[u8]) -> Result<()>;
}

/// Power state of the BLE radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    PoweredOn,
    PoweredOff,
    Unknown,
}

impl fmt::Display for RadioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PoweredOn => "poweredOn",
            Self::PoweredOff => "poweredOff",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// How a characteristic write is acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

/// GATT characteristic summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub service: String,
    pub uuid: String,
    pub write: bool,
    pub write_without_response: bool,
}

impl CharacteristicInfo {
    pub fn is_writable(&self) -> bool {
        self.write || self.write_without_response
    }

    /// Unacknowledged writes avoid a round-trip per chunk, so prefer them.
    pub fn preferred_write_mode(&self) -> WriteMode {
        if self.write_without_response {
            WriteMode::WithoutResponse
        } else {
            WriteMode::WithResponse
        }
    }
}

/// BLE GATT capability. Peripherals are addressed by adapter-local id.
#[async_trait]
pub trait BleRadio: Send + Sync {
    async fn state(&self) -> Result<RadioState>;

    /// Start scanning. Advertisements arrive on the returned channel
    /// until [`BleRadio::stop_scan`] is called.
    async fn start_scan(&self) -> Result<mpsc::UnboundedReceiver<BleDeviceInfo>>;

    async fn stop_scan(&self) -> Result<()>;

    async fn connect(&self, id: &str) -> Result<()>;

    async fn disconnect(&self, id: &str) -> Result<()>;

    /// Discover services and list every characteristic.
    async fn characteristics(&self, id: &str) -> Result<Vec<CharacteristicInfo>>;

    async fn write(
        &self,
        id: &str,
        characteristic: &CharacteristicInfo,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<()>;

    /// Lightweight round-trip used as the liveness probe.
    async fn read_rssi(&self, id: &str) -> Result<Option<i16>>;

    /// Register the sink for unsolicited link-loss events (adapter-local ids).
    fn subscribe_disconnects(&self, sink: mpsc::UnboundedSender<String>);
}
