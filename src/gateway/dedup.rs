//! Per-device sequence number filter.
//!
//! The radio link may deliver the same physical frame more than once. A
//! frame whose sequence number equals the last one accepted from the same
//! device is a redelivery and must not be dispatched again. Gaps and
//! reordering are not detected.

use std::collections::HashMap;

use crate::codec::DeviceAddress;

/// Last accepted sequence number per device. Entries live as long as the
/// deduplicator, one per device ever seen.
#[derive(Debug, Default)]
pub struct SequenceDeduplicator {
    last_accepted: HashMap<DeviceAddress, u8>,
}

impl SequenceDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` when the frame should be processed. Records `sequence` as the
    /// device's last accepted value in that case.
    pub fn accept(&mut self, device: DeviceAddress, sequence: u8) -> bool {
        match self.last_accepted.insert(device, sequence) {
            Some(previous) => previous != sequence,
            None => true,
        }
    }

    pub fn last_accepted(&self, device: &DeviceAddress) -> Option<u8> {
        self.last_accepted.get(device).copied()
    }

    pub fn device_count(&self) -> usize {
        self.last_accepted.len()
    }
}
