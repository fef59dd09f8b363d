//! Radio network-server bridge.
//!
//! The network server exchanges JSON envelopes with the gateway on the bus:
//!
//! - `application/<app>/node/<devEUI>/rx`: an uplink, `data` is base64
//! - `application/<app>/node/<devEUI>/tx`: a downlink we ask it to send
//! - `application/<app>/node/<devEUI>/ack`: the device confirmed a downlink

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::broker::Publisher;
use crate::config::RadioSettings;
use crate::gateway::downlink::{DownlinkSink, Transmission};

/// Frames of this length or shorter carry no segment and are ignored.
pub const MIN_FRAME_LEN: usize = 6;

/// Topic layout and downlink port of one network-server application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioNetwork {
    pub application_id: u32,
    pub f_port: u8,
}

impl RadioNetwork {
    pub fn new(settings: &RadioSettings) -> Self {
        Self {
            application_id: settings.application_id,
            f_port: settings.f_port,
        }
    }

    pub fn rx_filter(&self) -> String {
        format!("application/{}/node/+/rx", self.application_id)
    }

    pub fn ack_filter(&self) -> String {
        format!("application/{}/node/+/ack", self.application_id)
    }

    pub fn tx_topic(&self, network_id: &str) -> String {
        format!("application/{}/node/{}/tx", self.application_id, network_id)
    }

    /// The devEUI of an uplink envelope topic.
    pub fn rx_source<'a>(&self, topic: &'a str) -> Option<&'a str> {
        self.node_topic(topic, "rx")
    }

    /// The devEUI of an ack envelope topic.
    pub fn ack_source<'a>(&self, topic: &'a str) -> Option<&'a str> {
        self.node_topic(topic, "ack")
    }

    fn node_topic<'a>(&self, topic: &'a str, kind: &str) -> Option<&'a str> {
        let mut levels = topic.split('/');
        let matches = levels.next() == Some("application")
            && levels.next() == Some(self.application_id.to_string().as_str())
            && levels.next() == Some("node");
        if !matches {
            return None;
        }
        let network_id = levels.next().filter(|id| !id.is_empty())?;
        (levels.next() == Some(kind) && levels.next().is_none()).then_some(network_id)
    }
}

/// Body of an `rx` envelope. Only the fields the gateway reads.
#[derive(Debug, Clone, Deserialize)]
pub struct RadioUplink {
    pub data: Option<String>,
    #[serde(rename = "devEUI")]
    pub dev_eui: Option<String>,
}

impl RadioUplink {
    /// The frame carried by the envelope, if any.
    pub fn frame(&self) -> Option<Vec<u8>> {
        let data = self.data.as_deref()?;
        let bytes = match STANDARD.decode(data) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Uplink from {:?} is not base64: {}", self.dev_eui, e);
                return None;
            }
        };
        if bytes.len() <= MIN_FRAME_LEN {
            debug!("Ignoring {} byte uplink from {:?}", bytes.len(), self.dev_eui);
            return None;
        }
        Some(bytes)
    }
}

/// Body of a `tx` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioTxRequest {
    pub confirmed: bool,
    /// Base64 frame bytes.
    pub data: String,
    #[serde(rename = "devEUI")]
    pub dev_eui: String,
    #[serde(rename = "fPort")]
    pub f_port: u8,
    pub reference: String,
}

/// Body of an `ack` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RadioAck {
    pub reference: String,
}

/// Publishes downlink transmissions as `tx` envelopes.
pub struct RadioLink<'a, P: Publisher + ?Sized> {
    bus: &'a mut P,
    network: &'a RadioNetwork,
}

impl<'a, P: Publisher + ?Sized> RadioLink<'a, P> {
    pub fn new(bus: &'a mut P, network: &'a RadioNetwork) -> Self {
        Self { bus, network }
    }
}

impl<P: Publisher + ?Sized> DownlinkSink for RadioLink<'_, P> {
    fn transmit(&mut self, transmission: Transmission) {
        let request = RadioTxRequest {
            confirmed: true,
            data: STANDARD.encode(&transmission.frame),
            dev_eui: transmission.route.clone(),
            f_port: self.network.f_port,
            reference: transmission.reference.to_string(),
        };
        let topic = self.network.tx_topic(&transmission.route);
        match serde_json::to_string(&request) {
            Ok(body) => {
                debug!(
                    "Sending downlink {} to {} (attempt {})",
                    transmission.sequence, transmission.device, transmission.attempt
                );
                self.bus.publish(&topic, body);
            }
            Err(e) => warn!("Failed to serialize downlink for {}: {}", topic, e),
        }
    }
}
