//! Downlink requests read from the bus.
//!
//! A request is published on `<prefix>/<device id>/<module>/...` with a JSON
//! body carrying `data`, either base64 text or a Node buffer object. The body
//! may also name `deviceId` and `topic` explicitly, which take precedence
//! over the bus topic. Bodies that carry a `receiver` field are uplink
//! traffic seen on the same namespace and are not requests.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::codec::{DeviceAddress, InvalidAddress};
use crate::gateway::wire::NodeBuffer;

/// Buffers must be shorter than this to fit the radio downlink.
pub const MAX_BUFFER_LEN: usize = 96;

/// Module names (first topic level after the device) must be shorter.
pub const MAX_MODULE_LEN: usize = 12;

/// Downlink topics must be shorter.
pub const MAX_TOPIC_LEN: usize = 28;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownlinkRequest {
    pub device: DeviceAddress,
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("invalid message: {0}")]
    InvalidJson(String),

    #[error("message has no data")]
    MissingData,

    #[error("unsupported data shape: {0}")]
    UnsupportedData(String),

    #[error("data is not properly formatted base64")]
    InvalidBase64,

    #[error("buffer of {0} bytes is too large for a downlink")]
    BufferTooLarge(usize),

    #[error("no device id in topic or message")]
    MissingDevice,

    #[error(transparent)]
    InvalidDevice(#[from] InvalidAddress),

    #[error("no downlink topic")]
    MissingTopic,

    #[error("module name `{0}` too long")]
    ModuleNameTooLong(String),

    #[error("topic `{0}` too long")]
    TopicTooLong(String),
}

#[derive(Debug, Deserialize)]
struct RawRequest {
    data: Option<Value>,
    topic: Option<String>,
    #[serde(rename = "deviceId", alias = "device_id")]
    device_id: Option<String>,
    receiver: Option<Value>,
}

impl DownlinkRequest {
    /// Parse a message published on `bus_topic` under `prefix`.
    ///
    /// `Ok(None)` means the message is not a downlink request and should be
    /// ignored without complaint.
    pub fn from_bus(
        prefix: &str,
        bus_topic: &str,
        body: &str,
    ) -> Result<Option<Self>, RequestError> {
        let raw: RawRequest =
            serde_json::from_str(body).map_err(|e| RequestError::InvalidJson(e.to_string()))?;
        if raw.receiver.is_some() {
            return Ok(None);
        }

        let mut levels = bus_topic
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or_default()
            .splitn(2, '/');
        let topic_device = levels.next().filter(|d| !d.is_empty());
        let topic_rest = levels.next().filter(|t| !t.is_empty());

        let device = raw
            .device_id
            .as_deref()
            .or(topic_device)
            .ok_or(RequestError::MissingDevice)?
            .parse::<DeviceAddress>()?;

        let topic = raw
            .topic
            .as_deref()
            .or(topic_rest)
            .map(|t| t.trim_matches('/'))
            .filter(|t| !t.is_empty())
            .ok_or(RequestError::MissingTopic)?;
        let module = topic.split('/').next().unwrap_or_default();
        if module.len() >= MAX_MODULE_LEN {
            return Err(RequestError::ModuleNameTooLong(module.to_string()));
        }
        if topic.len() >= MAX_TOPIC_LEN {
            return Err(RequestError::TopicTooLong(topic.to_string()));
        }

        let payload = decode_data(raw.data.ok_or(RequestError::MissingData)?)?;

        Ok(Some(Self {
            device,
            topic: topic.to_string(),
            payload,
        }))
    }
}

fn decode_data(data: Value) -> Result<Vec<u8>, RequestError> {
    match data {
        Value::String(text) => STANDARD
            .decode(text.as_bytes())
            .map_err(|_| RequestError::InvalidBase64),
        Value::Object(ref map) if map.contains_key("type") => {
            let buffer: NodeBuffer = serde_json::from_value(data.clone())
                .map_err(|e| RequestError::UnsupportedData(e.to_string()))?;
            if buffer.kind != NodeBuffer::KIND {
                return Err(RequestError::UnsupportedData(format!(
                    "type `{}`",
                    buffer.kind
                )));
            }
            if buffer.data.len() >= MAX_BUFFER_LEN {
                return Err(RequestError::BufferTooLarge(buffer.data.len()));
            }
            Ok(buffer.data)
        }
        Value::Null => Err(RequestError::MissingData),
        other => Err(RequestError::UnsupportedData(json_kind(&other).to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
