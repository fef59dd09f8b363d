//! The `broker` module is the gateway's internal publish/subscribe bus.

pub mod engine;
pub mod message;
pub mod topic;

pub use engine::{Broker, Publisher, SharedBroker, lock};
pub use message::Message;

#[cfg(test)]
mod tests;
