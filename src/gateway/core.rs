//! Gateway core
//!
//! A single task owns all gateway state: the uplink deduplicator and the
//! downlink queues. Every input reaches it as a [`GatewayEvent`] and is
//! handled to completion before the next one, so no state is shared.
//!
//! Inputs:
//! - frames posted to the HTTP ingress
//! - bus messages: radio uplinks and acks, downlink requests
//! - a periodic tick driving retransmission and expiry

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::topic::filter_matches;
use crate::broker::{Message, Publisher, SharedBroker, lock};
use crate::client::Client;
use crate::config::Settings;
use crate::gateway::downlink::{AckReference, DownlinkController, DownlinkError, RetryPolicy};
use crate::gateway::request::DownlinkRequest;
use crate::gateway::routes::DeviceRoutes;
use crate::gateway::uplink::{Receiver, UplinkDispatcher};
use crate::transport::radio::{RadioAck, RadioLink, RadioNetwork, RadioUplink};
use crate::utils::{GatewayError, Result};

/// Bus id of the core's own subscription.
pub const CORE_CLIENT_ID: &str = "gateway-core";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// Raw frame bytes from a transport adapter.
    Frame { receiver: Receiver, bytes: Vec<u8> },
    /// Downlink acknowledgment.
    Ack(AckReference),
    Downlink(DownlinkRequest),
    /// A message from one of the core's bus subscriptions.
    Bus(Message),
    Tick,
}

#[derive(Debug)]
pub struct GatewayCore<P: Publisher> {
    uplink: UplinkDispatcher,
    downlink: DownlinkController,
    bus: P,
    network: RadioNetwork,
    downlink_prefix: String,
    failure_topic: String,
    tick_interval: std::time::Duration,
}

impl<P: Publisher> GatewayCore<P> {
    pub fn new(bus: P, settings: &Settings) -> Result<Self> {
        let routes = DeviceRoutes::from_settings(&settings.devices)
            .map_err(|e| GatewayError::InvalidDeviceId(e.to_string()))?;
        let gateway = &settings.gateway;
        let ack_timeout_ms = i64::try_from(gateway.ack_timeout_ms).unwrap_or(i64::MAX);
        let policy = RetryPolicy {
            ack_timeout: Duration::milliseconds(ack_timeout_ms),
            max_retries: gateway.max_retries,
        };

        info!(
            "Gateway core: namespace {}, {} downlink routes",
            gateway.namespace,
            routes.len()
        );
        Ok(Self {
            uplink: UplinkDispatcher::new(&gateway.namespace),
            downlink: DownlinkController::new(routes, policy),
            bus,
            network: RadioNetwork::new(&settings.radio),
            downlink_prefix: gateway.downlink_prefix.trim_end_matches('/').to_string(),
            failure_topic: gateway.failure_topic.clone(),
            tick_interval: std::time::Duration::from_millis(gateway.tick_interval_ms.max(1)),
        })
    }

    pub fn bus(&self) -> &P {
        &self.bus
    }

    pub fn uplink(&self) -> &UplinkDispatcher {
        &self.uplink
    }

    pub fn downlink(&self) -> &DownlinkController {
        &self.downlink
    }

    /// Filters the core must be subscribed to on the bus.
    pub fn subscriptions(&self) -> Vec<String> {
        vec![
            format!("{}/#", self.downlink_prefix),
            self.network.rx_filter(),
            self.network.ack_filter(),
        ]
    }

    pub fn handle(&mut self, event: GatewayEvent, now: DateTime<Utc>) {
        match event {
            GatewayEvent::Frame { receiver, bytes } => {
                self.uplink.dispatch(&mut self.bus, receiver, &bytes, now);
            }
            GatewayEvent::Ack(reference) => {
                let mut link = RadioLink::new(&mut self.bus, &self.network);
                let outcome = self.downlink.on_ack(reference, now, &mut link);
                debug!("Ack {}: {:?}", reference, outcome);
            }
            GatewayEvent::Downlink(request) => self.enqueue(request, now),
            GatewayEvent::Bus(message) => self.on_bus_message(message, now),
            GatewayEvent::Tick => self.on_tick(now),
        }
    }

    fn enqueue(&mut self, request: DownlinkRequest, now: DateTime<Utc>) {
        let device = request.device;
        let mut link = RadioLink::new(&mut self.bus, &self.network);
        match self
            .downlink
            .enqueue(device, request.topic, request.payload, now, &mut link)
        {
            Ok(state) => debug!("Downlink for {} accepted, link {:?}", device, state),
            Err(e @ DownlinkError::UnknownDevice(_)) => warn!("{}", e),
            Err(e) => warn!("Rejected downlink for {}: {}", device, e),
        }
    }

    fn on_tick(&mut self, now: DateTime<Utc>) {
        let mut link = RadioLink::new(&mut self.bus, &self.network);
        let failures = self.downlink.on_tick(now, &mut link);
        for failure in failures {
            match serde_json::to_string(&failure) {
                Ok(body) => self.bus.publish(&self.failure_topic, body),
                Err(e) => warn!("Failed to serialize delivery failure: {}", e),
            }
        }
    }

    fn on_bus_message(&mut self, message: Message, now: DateTime<Utc>) {
        if let Some(network_id) = self.network.rx_source(&message.topic) {
            self.on_radio_uplink(network_id.to_string(), &message.payload, now);
        } else if let Some(network_id) = self.network.ack_source(&message.topic) {
            self.on_radio_ack(network_id.to_string(), &message.payload, now);
        } else if filter_matches(&format!("{}/#", self.downlink_prefix), &message.topic) {
            match DownlinkRequest::from_bus(&self.downlink_prefix, &message.topic, &message.payload)
            {
                Ok(Some(request)) => self.enqueue(request, now),
                Ok(None) => debug!("Ignoring uplink echo on {}", message.topic),
                Err(e) => warn!("Invalid downlink request on {}: {}", message.topic, e),
            }
        } else {
            debug!("Unexpected bus message on {}", message.topic);
        }
    }

    fn on_radio_uplink(&mut self, network_id: String, payload: &str, now: DateTime<Utc>) {
        let envelope: RadioUplink = match serde_json::from_str(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Invalid uplink envelope from {}: {}", network_id, e);
                return;
            }
        };
        if let Some(frame) = envelope.frame() {
            self.uplink.dispatch(&mut self.bus, Receiver::Lora, &frame, now);
        }
    }

    fn on_radio_ack(&mut self, network_id: String, payload: &str, now: DateTime<Utc>) {
        let ack: RadioAck = match serde_json::from_str(payload) {
            Ok(ack) => ack,
            Err(e) => {
                warn!("Invalid ack envelope from {}: {}", network_id, e);
                return;
            }
        };
        // Servers that do not echo our reference still name the node.
        let reference = ack.reference.parse::<AckReference>().ok().or_else(|| {
            self.downlink
                .routes()
                .device_for(&network_id)
                .map(AckReference::device_only)
        });
        match reference {
            Some(reference) => self.handle(GatewayEvent::Ack(reference), now),
            None => warn!("Ack from unknown node {}", network_id),
        }
    }

    /// Handle events until the event channel closes.
    ///
    /// `bus` is the core's subscription channel; messages that are not
    /// published bus messages are skipped.
    pub async fn run(
        mut self,
        mut events: UnboundedReceiver<GatewayEvent>,
        mut bus: UnboundedReceiver<WsMessage>,
    ) {
        let mut tick = time::interval(self.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                Some(msg) = bus.recv() => match bus_message(&msg) {
                    Some(message) => GatewayEvent::Bus(message),
                    None => continue,
                },
                _ = tick.tick() => GatewayEvent::Tick,
            };
            self.handle(event, Utc::now());
        }

        info!("Gateway core stopped");
    }
}

impl GatewayCore<SharedBroker> {
    /// Register the core as a bus client and subscribe it to its filters.
    /// Returns the channel its bus messages arrive on.
    pub fn attach(&self) -> UnboundedReceiver<WsMessage> {
        let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
        let mut broker = lock(&self.bus);
        broker.register_client(Client::with_id(CORE_CLIENT_ID, tx));
        for filter in self.subscriptions() {
            debug!("Core subscribing to {}", filter);
            broker.subscribe(&filter, CORE_CLIENT_ID.to_string());
        }
        rx
    }
}

fn bus_message(msg: &WsMessage) -> Option<Message> {
    if !msg.is_text() {
        return None;
    }
    let text = msg.to_text().ok()?;
    match serde_json::from_str(text) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!("Unreadable bus message: {}", e);
            None
        }
    }
}
