//! The `transport` module connects the gateway to the outside world.
//!
//! - `websocket`: bus access for external subscribers and publishers
//! - `http`: ingress for framed-layout uploads (HTTP and BLE relays)
//! - `radio`: the JSON envelopes exchanged with the radio network server
//! - `message`: the WebSocket client protocol

pub mod http;
pub mod message;
pub mod radio;
pub mod websocket;

#[cfg(test)]
mod tests;
