//! Downlink flow control.
//!
//! Each device gets a FIFO of pending messages and at most one message in
//! flight. The head of the queue is handed to the transport when the device
//! is idle; the queue only advances when the device acknowledges it.
//!
//! ```text
//!            enqueue (queue was empty)
//!   IDLE ──────────────────────────────► SENDING
//!    ▲                                     │  ▲
//!    │ ack, queue drained                  │  │ ack, more queued / expiry, more queued
//!    └─────────────────────────────────────┘──┘
//! ```
//!
//! An unacknowledged message is retransmitted after `ack_timeout`, at most
//! `max_retries` times. After that it is expired: removed from the queue and
//! reported as a [`DeliveryFailure`] so the next message can go out.
//!
//! Transmissions carry an [`AckReference`] of the form `<device>:<sequence>`.
//! An ack echoing it matches exactly one frame, so a late ack for a
//! retransmitted message can never release the message sent after it. A
//! bare device id only matches a head that was sent once.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::codec::{DeviceAddress, Frame, FrameError, Layout};
use crate::gateway::routes::DeviceRoutes;
use crate::gateway::wire;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Nothing in flight, queue empty.
    Idle,
    /// Head of the queue handed to the transport, waiting for an ack.
    Sending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub enqueue_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct InFlight {
    sequence: u8,
    frame: Vec<u8>,
    sent_at: DateTime<Utc>,
    attempts: u32,
}

/// Per-device queue. The head is the in-flight message while `Sending`.
#[derive(Debug)]
pub struct DownlinkQueue {
    /// Radio network id, fixed when the queue is created.
    route: String,
    pending: VecDeque<PendingMessage>,
    in_flight: Option<InFlight>,
    next_sequence: u8,
}

impl DownlinkQueue {
    fn new(route: &str) -> Self {
        Self {
            route: route.to_string(),
            pending: VecDeque::new(),
            in_flight: None,
            next_sequence: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        if self.in_flight.is_some() {
            LinkState::Sending
        } else {
            LinkState::Idle
        }
    }

    /// Messages queued, including the one in flight.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn head(&self) -> Option<&PendingMessage> {
        self.pending.front()
    }

    /// Attempts made for the in-flight message.
    pub fn attempts(&self) -> u32 {
        self.in_flight.as_ref().map_or(0, |f| f.attempts)
    }
}

/// What an ack names: the device and, when the transport echoed the
/// reference it was given, the sequence number of the acknowledged frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AckReference {
    pub device: DeviceAddress,
    pub sequence: Option<u8>,
}

impl AckReference {
    pub fn new(device: DeviceAddress, sequence: u8) -> Self {
        Self {
            device,
            sequence: Some(sequence),
        }
    }

    /// A reference naming only the device.
    pub fn device_only(device: DeviceAddress) -> Self {
        Self {
            device,
            sequence: None,
        }
    }
}

impl fmt::Display for AckReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sequence {
            Some(sequence) => write!(f, "{}:{}", self.device, sequence),
            None => write!(f, "{}", self.device),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid ack reference `{0}`")]
pub struct InvalidReference(pub String);

impl FromStr for AckReference {
    type Err = InvalidReference;

    /// Accepts `<device>` and `<device>:<sequence>`, device in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidReference(s.to_string());
        let trimmed = s.trim();
        let (device, sequence) = match trimmed.split_once(':') {
            Some((device, sequence)) => {
                (device, Some(sequence.parse::<u8>().map_err(|_| invalid())?))
            }
            None => (trimmed, None),
        };
        Ok(Self {
            device: device.parse().map_err(|_| invalid())?,
            sequence,
        })
    }
}

/// One encoded frame for the transport to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    pub device: DeviceAddress,
    /// Radio network id of the device.
    pub route: String,
    /// Echoed back by the transport in the ack.
    pub reference: AckReference,
    pub sequence: u8,
    /// Compact-layout frame bytes.
    pub frame: Vec<u8>,
    /// 1 for the first send, incremented on each retransmission.
    pub attempt: u32,
}

/// The transport side of the controller.
pub trait DownlinkSink {
    fn transmit(&mut self, transmission: Transmission);
}

/// A message given up on after its retries ran out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryFailure {
    pub device_id: String,
    pub topic: String,
    #[serde(rename = "data", with = "wire::node_buffer")]
    pub payload: Vec<u8>,
    pub attempts: u32,
    #[serde(with = "wire::iso_millis")]
    pub enqueue_time: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Head popped, next message sent.
    Advanced,
    /// Head popped, queue empty, device idle.
    Drained,
    /// Not sending, or the reference does not match. Nothing changed.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownlinkError {
    #[error("unknown device {0}: no downlink route")]
    UnknownDevice(DeviceAddress),

    #[error("downlink message does not fit in a frame: {0}")]
    Frame(#[from] FrameError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub ack_timeout: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::seconds(60),
            max_retries: 3,
        }
    }
}

#[derive(Debug)]
pub struct DownlinkController {
    routes: DeviceRoutes,
    queues: HashMap<DeviceAddress, DownlinkQueue>,
    policy: RetryPolicy,
}

impl DownlinkController {
    pub fn new(routes: DeviceRoutes, policy: RetryPolicy) -> Self {
        Self {
            routes,
            queues: HashMap::new(),
            policy,
        }
    }

    pub fn routes(&self) -> &DeviceRoutes {
        &self.routes
    }

    pub fn queue(&self, device: &DeviceAddress) -> Option<&DownlinkQueue> {
        self.queues.get(device)
    }

    pub fn state(&self, device: &DeviceAddress) -> LinkState {
        self.queues
            .get(device)
            .map_or(LinkState::Idle, DownlinkQueue::state)
    }

    /// Append a message for `device`, sending it right away if the device
    /// is idle. Returns the device's state afterwards.
    pub fn enqueue<S: DownlinkSink + ?Sized>(
        &mut self,
        device: DeviceAddress,
        topic: impl Into<String>,
        payload: Vec<u8>,
        now: DateTime<Utc>,
        sink: &mut S,
    ) -> Result<LinkState, DownlinkError> {
        let route = self
            .routes
            .get(&device)
            .ok_or(DownlinkError::UnknownDevice(device))?;

        let message = PendingMessage {
            topic: topic.into(),
            payload,
            enqueue_time: now,
        };
        // Reject what could never be encoded before it takes a queue slot.
        Frame::new(device, 0)
            .with_segment(message.topic.as_str(), message.payload.as_slice())
            .encode(Layout::Compact)?;

        let queue = self
            .queues
            .entry(device)
            .or_insert_with(|| DownlinkQueue::new(route));
        queue.pending.push_back(message);
        debug!(
            "Queued downlink for {} ({} pending)",
            device,
            queue.pending.len()
        );

        if queue.in_flight.is_none() {
            send_head(device, queue, now, sink);
        }
        Ok(queue.state())
    }

    /// Handle an acknowledgment.
    ///
    /// A reference with a sequence number must name the in-flight frame. A
    /// bare device id is accepted only while the head has been sent once;
    /// after a retransmission it could be the late ack of either copy and
    /// is ignored.
    pub fn on_ack<S: DownlinkSink + ?Sized>(
        &mut self,
        reference: AckReference,
        now: DateTime<Utc>,
        sink: &mut S,
    ) -> AckOutcome {
        let device = reference.device;
        let Some(queue) = self.queues.get_mut(&device) else {
            debug!("Ack for {} with nothing queued", device);
            return AckOutcome::Ignored;
        };
        let Some(in_flight) = &queue.in_flight else {
            debug!("Stray ack for idle device {}", device);
            return AckOutcome::Ignored;
        };
        let matches = match reference.sequence {
            Some(sequence) => sequence == in_flight.sequence,
            None => in_flight.attempts == 1,
        };
        if !matches {
            debug!(
                "Ack {} does not match downlink {} to {} (attempt {})",
                reference, in_flight.sequence, device, in_flight.attempts
            );
            return AckOutcome::Ignored;
        }

        queue.in_flight = None;
        queue.pending.pop_front();
        send_head(device, queue, now, sink);
        match queue.state() {
            LinkState::Sending => AckOutcome::Advanced,
            LinkState::Idle => AckOutcome::Drained,
        }
    }

    /// Retransmit or expire every in-flight message older than the ack
    /// timeout.
    pub fn on_tick<S: DownlinkSink + ?Sized>(
        &mut self,
        now: DateTime<Utc>,
        sink: &mut S,
    ) -> Vec<DeliveryFailure> {
        let mut failures = Vec::new();

        for (device, queue) in self.queues.iter_mut() {
            let Some(in_flight) = queue.in_flight.as_mut() else {
                continue;
            };
            if now - in_flight.sent_at < self.policy.ack_timeout {
                continue;
            }

            if in_flight.attempts <= self.policy.max_retries {
                in_flight.attempts += 1;
                in_flight.sent_at = now;
                info!(
                    "Retransmitting downlink {} to {} (attempt {})",
                    in_flight.sequence, device, in_flight.attempts
                );
                sink.transmit(Transmission {
                    device: *device,
                    route: queue.route.clone(),
                    reference: AckReference::new(*device, in_flight.sequence),
                    sequence: in_flight.sequence,
                    frame: in_flight.frame.clone(),
                    attempt: in_flight.attempts,
                });
                continue;
            }

            let attempts = in_flight.attempts;
            queue.in_flight = None;
            if let Some(expired) = queue.pending.pop_front() {
                let reason = format!("no ack after {attempts} attempts");
                warn!("Downlink to {} on {} failed: {}", device, expired.topic, reason);
                failures.push(DeliveryFailure {
                    device_id: device.to_hex(),
                    topic: expired.topic,
                    payload: expired.payload,
                    attempts,
                    enqueue_time: expired.enqueue_time,
                    reason,
                });
            }
            send_head(*device, queue, now, sink);
        }

        failures
    }
}

/// Hand the head of `queue` to the transport and mark it in flight.
///
/// Heads that cannot be encoded are dropped so the queue never stalls on
/// them.
fn send_head<S: DownlinkSink + ?Sized>(
    device: DeviceAddress,
    queue: &mut DownlinkQueue,
    now: DateTime<Utc>,
    sink: &mut S,
) {
    while let Some(head) = queue.pending.front() {
        let sequence = queue.next_sequence;
        let frame = match Frame::new(device, sequence)
            .with_segment(head.topic.as_str(), head.payload.as_slice())
            .encode(Layout::Compact)
        {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping downlink for {}: {}", device, e);
                queue.pending.pop_front();
                continue;
            }
        };
        queue.next_sequence = sequence.wrapping_add(1);

        queue.in_flight = Some(InFlight {
            sequence,
            frame: frame.clone(),
            sent_at: now,
            attempts: 1,
        });
        sink.transmit(Transmission {
            device,
            route: queue.route.clone(),
            reference: AckReference::new(device, sequence),
            sequence,
            frame,
            attempt: 1,
        });
        return;
    }
}
