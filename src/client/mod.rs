//! The `client` module defines the representation of a bus subscriber.
//!
//! It provides the `Client` struct, which encapsulates the unique
//! identifier of a subscriber and the channel messages are pushed into.

pub mod pubsub_client;
pub use pubsub_client::Client;

#[cfg(test)]
mod tests;
