//! Error types for the Bluetooth bridge

use std::io;
use thiserror::Error;

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Bridge error taxonomy
///
/// The `Display` text of each variant is what clients see in the
/// `error` field of a failed response.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// No discovery catalog holds the requested id
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The id is already present in the connection table
    #[error("Device already connected: {0}")]
    AlreadyConnected(String),

    /// The id has no live connection
    #[error("Device not connected: {0}")]
    NotConnected(String),

    /// The radio reported a non-ready power state
    #[error("Bluetooth radio unavailable: {0}")]
    RadioUnavailable(String),

    /// The peripheral exposes nothing we can write to
    #[error("No writable characteristic found on {0}")]
    NoWritableCharacteristic(String),

    /// Every port in the retry window was taken
    #[error("Could not bind gateway: ports {first_port}-{last_port} are all in use")]
    BindExhausted { first_port: u16, last_port: u16 },

    /// Any failure reported by the OS or radio layer
    #[error("{0}")]
    AdapterFailure(String),
}

impl BridgeError {
    pub fn adapter(message: impl Into<String>) -> Self {
        Self::AdapterFailure(message.into())
    }
}

impl From<io::Error> for BridgeError {
    fn from(err: io::Error) -> Self {
        Self::AdapterFailure(err.to_string())
    }
}

impl From<btleplug::Error> for BridgeError {
    fn from(err: btleplug::Error) -> Self {
        Self::AdapterFailure(format!("BLE error: {}", err))
    }
}

impl From<anyhow::Error> for BridgeError {
    fn from(err: anyhow::Error) -> Self {
        Self::AdapterFailure(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_device_id() {
        let err = BridgeError::DeviceNotFound("ble_abc".to_string());
        assert_eq!(err.to_string(), "Device not found: ble_abc");

        let err = BridgeError::NotConnected("classic_00:11".to_string());
        assert!(err.to_string().starts_with("Device not connected"));
    }

    #[test]
    fn test_bind_exhausted_names_port_range() {
        let err = BridgeError::BindExhausted {
            first_port: 42123,
            last_port: 42133,
        };
        assert_eq!(
            err.to_string(),
            "Could not bind gateway: ports 42123-42133 are all in use"
        );
    }
}
