//! Uplink dispatch: raw frame in, one bus message per segment out.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::broker::Publisher;
use crate::codec::{self, Layout};
use crate::gateway::dedup::SequenceDeduplicator;
use crate::gateway::wire;

/// Which transport adapter delivered a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Receiver {
    Lora,
    Http,
    Ble,
}

impl Receiver {
    /// The radio link carries compact frames. The HTTP bridge, and the BLE
    /// relay that posts through it, carry framed ones.
    pub fn layout(self) -> Layout {
        match self {
            Receiver::Lora => Layout::Compact,
            Receiver::Http | Receiver::Ble => Layout::Framed,
        }
    }
}

impl fmt::Display for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Receiver::Lora => "lora",
            Receiver::Http => "http",
            Receiver::Ble => "ble",
        })
    }
}

/// One decoded segment, enriched with where and when it arrived.
///
/// Serialized with the snake_case keys existing subscribers read:
/// `data`, `receiver`, `received_time`, `device_id`, `sequence_number`.
/// The topic is carried by the bus topic, not the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMessage {
    #[serde(skip)]
    pub topic: String,
    #[serde(rename = "data", with = "wire::node_buffer")]
    pub payload: Vec<u8>,
    pub receiver: Receiver,
    #[serde(with = "wire::iso_millis")]
    pub received_time: DateTime<Utc>,
    pub device_id: String,
    pub sequence_number: u8,
}

/// Decodes frames, drops redeliveries and publishes what is left under
/// `<namespace>/<segment topic>`.
#[derive(Debug)]
pub struct UplinkDispatcher {
    namespace: String,
    dedup: SequenceDeduplicator,
}

impl UplinkDispatcher {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into().trim_end_matches('/').to_string(),
            dedup: SequenceDeduplicator::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn dedup(&self) -> &SequenceDeduplicator {
        &self.dedup
    }

    pub fn bus_topic(&self, message: &TopicMessage) -> String {
        format!("{}/{}", self.namespace, message.topic)
    }

    /// Decode `buf` and build the messages of every surviving segment.
    ///
    /// Returns nothing for frames that are too short or repeat the device's
    /// last sequence number. Corrupt segments are logged and skipped.
    pub fn process(
        &mut self,
        receiver: Receiver,
        buf: &[u8],
        received_time: DateTime<Utc>,
    ) -> Vec<TopicMessage> {
        let decoded = match codec::decode(buf, receiver.layout()) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Dropping {} frame ({}): {}", receiver, hex::encode(buf), e);
                return Vec::new();
            }
        };

        let frame = decoded.frame;
        let device_id = frame.address.to_hex();
        for skipped in &decoded.skipped {
            warn!("Frame from {} via {}: {}", device_id, receiver, skipped);
        }

        if !self.dedup.accept(frame.address, frame.sequence) {
            debug!(
                "Duplicate frame from {} (sequence {}) via {}",
                device_id, frame.sequence, receiver
            );
            return Vec::new();
        }

        frame
            .segments
            .into_iter()
            .map(|segment| TopicMessage {
                topic: segment.topic,
                payload: segment.payload,
                receiver,
                received_time,
                device_id: device_id.clone(),
                sequence_number: frame.sequence,
            })
            .collect()
    }

    /// Process a frame and publish the result. Returns how many messages
    /// were published.
    pub fn dispatch<P: Publisher + ?Sized>(
        &mut self,
        bus: &mut P,
        receiver: Receiver,
        buf: &[u8],
        received_time: DateTime<Utc>,
    ) -> usize {
        let mut published = 0;
        for message in self.process(receiver, buf, received_time) {
            let topic = self.bus_topic(&message);
            match serde_json::to_string(&message) {
                Ok(body) => {
                    debug!("Publishing to {}", topic);
                    bus.publish(&topic, body);
                    published += 1;
                }
                Err(e) => warn!("Failed to serialize message for {}: {}", topic, e),
            }
        }
        published
    }
}
