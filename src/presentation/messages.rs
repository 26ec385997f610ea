//! Wire envelopes exchanged with gateway clients
//!
//! Requests arrive as `{type, payload, messageId?}`; replies go out as
//! `{type, data}` (or `{type:"error", error}`), echoing `messageId` when
//! the request carried one.

use crate::domain::models::{ConnectedDevice, Device, DeviceKind, DiscoveryFilters, ExternalDevice};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const CONNECTED_MESSAGE: &str = "WebSocket connected successfully";

/// Why an inbound message could not be turned into a [`Request`]
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, rename = "messageId")]
    pub message_id: Option<Value>,
}

impl RequestEnvelope {
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        serde_json::from_str(text).map_err(MessageError::Malformed)
    }
}

/// `send_data` body: UTF-8 text or raw byte values
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DataPayload {
    Text(String),
    Bytes(Vec<u8>),
}

impl DataPayload {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(text) => text.into_bytes(),
            Self::Bytes(bytes) => bytes,
        }
    }
}

#[derive(Deserialize)]
struct DiscoverPayload {
    #[serde(default)]
    filters: DiscoveryFilters,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DevicePayload {
    device_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendDataPayload {
    device_id: String,
    data: DataPayload,
}

#[derive(Deserialize)]
struct AddDevicePayload {
    #[serde(default)]
    device: ExternalDevice,
}

/// A recognised request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Discover { filters: DiscoveryFilters },
    Connect { device_id: String },
    Disconnect { device_id: String },
    GetConnected,
    SendData { device_id: String, data: Vec<u8> },
    AddDevice { device: ExternalDevice },
    ClearDevices,
}

impl Request {
    pub fn from_envelope(envelope: &RequestEnvelope) -> Result<Self, MessageError> {
        let kind = envelope.kind.as_str();
        let payload = &envelope.payload;
        Ok(match kind {
            "discover" => Self::Discover {
                filters: decode::<DiscoverPayload>(kind, payload)?.filters,
            },
            "connect" => Self::Connect {
                device_id: decode::<DevicePayload>(kind, payload)?.device_id,
            },
            "disconnect" => Self::Disconnect {
                device_id: decode::<DevicePayload>(kind, payload)?.device_id,
            },
            "get_connected" => Self::GetConnected,
            "send_data" => {
                let body = decode::<SendDataPayload>(kind, payload)?;
                Self::SendData {
                    device_id: body.device_id,
                    data: body.data.into_bytes(),
                }
            }
            "add_device" => Self::AddDevice {
                device: decode::<AddDevicePayload>(kind, payload)?.device,
            },
            "clear_devices" => Self::ClearDevices,
            other => return Err(MessageError::UnknownType(other.to_string())),
        })
    }

    /// Reply type for this request
    pub fn response_type(&self) -> &'static str {
        match self {
            Self::Discover { .. } => "discover_response",
            Self::Connect { .. } => "connect_response",
            Self::Disconnect { .. } => "disconnect_response",
            Self::GetConnected => "get_connected_response",
            Self::SendData { .. } => "send_data_response",
            Self::AddDevice { .. } => "add_device_response",
            Self::ClearDevices => "clear_devices_response",
        }
    }
}

fn decode<T: DeserializeOwned>(kind: &str, payload: &Value) -> Result<T, MessageError> {
    // A missing payload reads as an empty object
    let payload = match payload {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(payload).map_err(|source| MessageError::InvalidPayload {
        kind: kind.to_string(),
        source,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Value>,
}

impl ResponseEnvelope {
    fn bare(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            data: None,
            error: None,
            message: None,
            message_id: None,
        }
    }

    pub fn response(kind: &str, data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::bare(kind)
        }
    }

    /// Greeting pushed when a client socket opens
    pub fn connected() -> Self {
        Self {
            message: Some(CONNECTED_MESSAGE.to_string()),
            ..Self::bare("connected")
        }
    }

    pub fn device_disconnected(device_id: &str) -> Self {
        Self::response(
            "device_disconnected",
            serde_json::json!({ "deviceId": device_id }),
        )
    }

    pub fn error(error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::bare("error")
        }
    }

    pub fn with_message_id(mut self, message_id: Option<Value>) -> Self {
        self.message_id = message_id;
        self
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Serialize)]
pub struct DiscoverBody {
    pub success: bool,
    pub devices: Vec<Device>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectBody {
    pub success: bool,
    pub device_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DeviceKind,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectBody {
    pub success: bool,
    pub device_id: String,
}

#[derive(Debug, Serialize)]
pub struct ConnectedDevicesBody {
    pub success: bool,
    pub devices: Vec<ConnectedDevice>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendDataBody {
    pub success: bool,
    pub device_id: String,
    pub bytes_sent: usize,
    #[serde(rename = "type")]
    pub kind: DeviceKind,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddDeviceBody {
    pub success: bool,
    pub device_id: String,
}

#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct FailureBody {
    pub success: bool,
    pub error: String,
}

impl FailureBody {
    pub fn new(error: impl ToString) -> Self {
        Self {
            success: false,
            error: error.to_string(),
        }
    }
}
