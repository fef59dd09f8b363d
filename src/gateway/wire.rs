//! JSON shapes shared with existing bus subscribers.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// `{"type":"Buffer","data":[...]}`, the JSON form of a Node.js buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeBuffer {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Vec<u8>,
}

impl NodeBuffer {
    pub const KIND: &'static str = "Buffer";

    pub fn new(data: Vec<u8>) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            data,
        }
    }
}

/// Serde adapter writing bytes as a [`NodeBuffer`].
pub mod node_buffer {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        NodeBuffer::new(bytes.to_vec()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let buffer = NodeBuffer::deserialize(deserializer)?;
        if buffer.kind != NodeBuffer::KIND {
            return Err(serde::de::Error::custom(format!(
                "expected a Buffer, got `{}`",
                buffer.kind
            )));
        }
        Ok(buffer.data)
    }
}

/// Serde adapter for ISO 8601 timestamps with millisecond precision
/// (`2026-10-18T09:30:00.123Z`).
pub mod iso_millis {
    use super::*;

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
