use serde::{Deserialize, Serialize};

/// Name reported for devices that advertise no name
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

/// Address reported for injected devices that carry none
pub const UNKNOWN_ADDRESS: &str = "N/A";

/// Transport a device is reached through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Classic,
    Ble,
}

impl DeviceKind {
    /// Namespace prefix of device ids for this transport
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Classic => "classic_",
            Self::Ble => "ble_",
        }
    }

    /// Build the unified id from a transport-local key
    /// (an address for classic, an adapter-local id for BLE)
    pub fn device_id(self, local: &str) -> String {
        format!("{}{}", self.prefix(), local)
    }

    /// Resolve the transport from a namespaced id
    pub fn from_device_id(id: &str) -> Option<Self> {
        [Self::Ble, Self::Classic]
            .into_iter()
            .find(|kind| id.starts_with(kind.prefix()))
    }

    /// Strip this transport's prefix, leaving ids without it untouched
    pub fn local_id(self, id: &str) -> &str {
        id.strip_prefix(self.prefix()).unwrap_or(id)
    }
}

/// Entry of the unified device registry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    pub address: String,
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paired: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i16>,
    pub connected: bool,
}

impl Device {
    pub fn from_classic(info: &ClassicDeviceInfo) -> Self {
        Self {
            id: DeviceKind::Classic.device_id(&info.address),
            name: info.name.clone(),
            address: info.address.clone(),
            kind: DeviceKind::Classic,
            paired: Some(info.paired),
            rssi: None,
            connected: info.connected,
        }
    }

    pub fn from_ble(info: &BleDeviceInfo) -> Self {
        Self {
            id: DeviceKind::Ble.device_id(&info.id),
            name: info.name.clone(),
            address: info.address.clone(),
            kind: DeviceKind::Ble,
            paired: None,
            rssi: info.rssi,
            connected: false,
        }
    }

    pub fn has_placeholder_name(&self) -> bool {
        self.name == UNKNOWN_DEVICE_NAME
    }
}

/// Classic device as reported by the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassicDeviceInfo {
    pub name: String,
    pub address: String,
    pub paired: bool,
    pub connected: bool,
}

/// BLE advertisement as reported by the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BleDeviceInfo {
    /// Adapter-local id (no namespace prefix)
    pub id: String,
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
}

/// Snapshot of a device taken when it was connected
///
/// Never a reference into a discovery catalog: a later refresh must
/// not rewrite what an active connection recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionRecord {
    pub device: Device,
    pub connected_at: i64,
}

impl ConnectionRecord {
    pub fn new(device: Device) -> Self {
        Self {
            device: Device {
                connected: true,
                ..device
            },
            connected_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn kind(&self) -> DeviceKind {
        self.device.kind
    }
}

/// Wire view of a live connection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedDevice {
    pub id: String,
    pub name: String,
    pub address: String,
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    pub connected_at: i64,
}

impl From<&ConnectionRecord> for ConnectedDevice {
    fn from(record: &ConnectionRecord) -> Self {
        Self {
            id: record.device.id.clone(),
            name: record.device.name.clone(),
            address: record.device.address.clone(),
            kind: record.device.kind,
            connected_at: record.connected_at,
        }
    }
}

/// Discovery request options
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryFilters {
    #[serde(default)]
    pub ignore_unknown: bool,
}

/// Device resolved outside the bridge, e.g. by a client-side pairing prompt
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExternalDevice {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

/// Notifications pushed upward by the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    DeviceDisconnected { device_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_namespaces() {
        assert_eq!(
            DeviceKind::Classic.device_id("00:11:22:33:44:55"),
            "classic_00:11:22:33:44:55"
        );
        assert_eq!(DeviceKind::Ble.device_id("abc"), "ble_abc");
        assert_eq!(DeviceKind::from_device_id("ble_abc"), Some(DeviceKind::Ble));
        assert_eq!(
            DeviceKind::from_device_id("classic_00:11"),
            Some(DeviceKind::Classic)
        );
        assert_eq!(DeviceKind::from_device_id("usb_1"), None);
    }

    #[test]
    fn test_local_id_strips_only_own_prefix() {
        assert_eq!(DeviceKind::Ble.local_id("ble_abc"), "abc");
        assert_eq!(DeviceKind::Ble.local_id("abc"), "abc");
        assert_eq!(DeviceKind::Classic.local_id("ble_abc"), "ble_abc");
    }

    #[test]
    fn test_device_serializes_transport_fields() {
        let ble = Device::from_ble(&BleDeviceInfo {
            id: "p1".into(),
            name: "Sensor".into(),
            address: "AA:BB".into(),
            rssi: Some(-60),
        });
        let json = serde_json::to_value(&ble).unwrap();
        assert_eq!(json["type"], "ble");
        assert_eq!(json["rssi"], -60);
        assert!(json.get("paired").is_none());

        let classic = Device::from_classic(&ClassicDeviceInfo {
            name: "Headset".into(),
            address: "00:11".into(),
            paired: true,
            connected: false,
        });
        let json = serde_json::to_value(&classic).unwrap();
        assert_eq!(json["type"], "classic");
        assert_eq!(json["paired"], true);
        assert!(json.get("rssi").is_none());
    }

    #[test]
    fn test_connection_record_is_a_snapshot() {
        let mut device = Device::from_ble(&BleDeviceInfo {
            id: "p1".into(),
            name: "Before".into(),
            address: "AA".into(),
            rssi: None,
        });
        let record = ConnectionRecord::new(device.clone());
        device.name = "After".into();

        assert_eq!(record.device.name, "Before");
        assert!(record.device.connected);
        assert_eq!(record.kind(), DeviceKind::Ble);
    }
}
