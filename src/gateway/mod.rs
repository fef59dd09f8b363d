//! The `gateway` module turns device frames into bus messages and bus
//! requests into device frames.
//!
//! - `uplink`: decode, deduplicate and publish incoming frames
//! - `downlink`: per-device queues with one message in flight
//! - `request`: parse downlink requests published on the bus
//! - `core`: the task owning all of the above

pub mod core;
pub mod dedup;
pub mod downlink;
pub mod request;
pub mod routes;
pub mod uplink;
pub mod wire;

pub use self::core::{GatewayCore, GatewayEvent};
pub use dedup::SequenceDeduplicator;
pub use downlink::{
    AckOutcome, AckReference, DeliveryFailure, DownlinkController, DownlinkError, DownlinkSink,
    InvalidReference, LinkState, RetryPolicy, Transmission,
};
pub use request::{DownlinkRequest, RequestError};
pub use routes::DeviceRoutes;
pub use uplink::{Receiver, TopicMessage, UplinkDispatcher};
