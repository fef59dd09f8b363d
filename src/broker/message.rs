use serde::{Deserialize, Serialize};

/// A message published on the bus.
///
/// This structure is the JSON pushed to WebSocket subscribers, the value
/// handed to in-process subscribers and the record kept for replay.
///
/// # Fields
///
/// - `topic` - The topic the message was published on.
/// - `payload` - The message body. Gateway-produced payloads are JSON documents.
/// - `timestamp` - Milliseconds since the Unix epoch, set when published.
///
/// # Example
///
/// ```rust
/// use signpost_gateway::broker::message::Message;
///
/// let msg = Message {
///     topic: "signpost-preproc/lab11/gps".to_string(),
///     payload: "{\"device_id\":\"c098e5120000\"}".to_string(),
///     timestamp: 1_725_000_000_000,
/// };
/// assert!(msg.topic.ends_with("gps"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub payload: String,
    pub timestamp: i64,
}

impl Message {
    pub fn now(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}
