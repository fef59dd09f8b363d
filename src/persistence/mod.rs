//! The `persistence` module keeps recently published bus messages so that a
//! subscriber joining a topic late can be replayed what it missed.
//!
//! It uses `sled` as an embedded key-value store, one tree per topic, with a
//! time-to-live and a per-topic cap.

pub mod sled_store;

pub use sled_store::{Persistence, StoredMessage};
