//! # Signpost gateway
//!
//! `signpost-gateway` bridges sensor devices and an internal publish/subscribe
//! bus. Devices pack several topic/payload segments into one small binary
//! frame and send it over a long-range radio link, over HTTP, or through a
//! BLE relay. The gateway decodes each frame, drops redeliveries and
//! publishes one bus message per segment. In the other direction it takes
//! downlink requests off the bus and delivers them to one device at a time,
//! waiting for an acknowledgment before sending the next.
//!
//! ## Core Modules
//!
//! - `codec`: the binary frame layouts, both directions.
//! - `gateway`: deduplication, uplink dispatch, downlink flow control and the
//!   task tying them together.
//! - `broker`: the in-memory bus, with `+`/`#` topic filters.
//! - `client`: a bus subscriber.
//! - `persistence`: sled-backed retention of published messages for replay.
//! - `transport`: WebSocket bus access, HTTP ingress and the radio bridge.
//! - `config`: configuration loading.
//! - `utils`: error types and logging setup.

pub mod broker;
pub mod client;
pub mod codec;
pub mod config;
pub mod gateway;
pub mod persistence;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod tests;
