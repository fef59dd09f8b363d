//! Frame format for device deliveries
//!
//! A [`Frame`] carries one device address, one sequence number and any
//! number of topic/payload [`Segment`]s. Two wire layouts exist.
//!
//! # Compact layout (radio)
//!
//! ```text
//! [address: 6] [sequence: 1] [segment...]
//!
//! segment:
//! [topic_len: 1] [topic: N] [payload_len: 1] [payload: M]
//! ```
//!
//! # Framed layout (http)
//!
//! ```text
//! [address: 6] [sequence: 1] [total_len: 2 BE] [segment] ...
//! ```
//!
//! `total_len` covers the segment that follows it, so a segment whose inner
//! lengths disagree with its prefix can be skipped without losing the rest of
//! the frame. The next prefix is always read at the end of `total_len`, also
//! when a segment uses fewer bytes; the rest is padding. A `total_len` of
//! zero ends the segment list.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tracing::debug;

/// Bytes in a device address.
pub const ADDRESS_LEN: usize = 6;

/// Address plus sequence number.
pub const HEADER_LEN: usize = ADDRESS_LEN + 1;

/// Upper bound of a topic or payload, both carry a one byte length.
pub const MAX_FIELD_LEN: usize = u8::MAX as usize;

/// Six byte device address, printed as lowercase hex (`c098e5120000`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress([u8; ADDRESS_LEN]);

impl DeviceAddress {
    pub const fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// The device id used on the bus and in acks.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid device address `{0}`: expected 12 hex digits")]
pub struct InvalidAddress(pub String);

impl FromStr for DeviceAddress {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|_| InvalidAddress(s.to_string()))?;
        let bytes: [u8; ADDRESS_LEN] = bytes
            .try_into()
            .map_err(|_| InvalidAddress(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Wire layout variant, chosen by the adapter that carries the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// Back to back segments, used on the radio link in both directions.
    Compact,
    /// Segments preceded by a 2 byte total length, used by the HTTP bridge.
    Framed,
}

impl FromStr for Layout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "framed" => Ok(Self::Framed),
            other => Err(format!("unknown layout `{other}` (expected compact or framed)")),
        }
    }
}

/// One topic/payload pair packed inside a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub topic: String,
    #[serde(serialize_with = "as_hex")]
    pub payload: Vec<u8>,
}

impl Segment {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Length of the segment without any total length prefix.
    pub fn encoded_len(&self) -> usize {
        self.topic.len() + self.payload.len() + 2
    }

    fn check_limits(&self) -> Result<(), FrameError> {
        if self.topic.len() > MAX_FIELD_LEN {
            return Err(FrameError::TopicTooLong {
                len: self.topic.len(),
            });
        }
        if self.payload.len() > MAX_FIELD_LEN {
            return Err(FrameError::PayloadTooLong {
                topic: self.topic.clone(),
                len: self.payload.len(),
            });
        }
        Ok(())
    }
}

fn as_hex<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

/// One delivery from or to one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub address: DeviceAddress,
    pub sequence: u8,
    pub segments: Vec<Segment>,
}

impl Frame {
    pub fn new(address: DeviceAddress, sequence: u8) -> Self {
        Self {
            address,
            sequence,
            segments: Vec::new(),
        }
    }

    pub fn with_segment(mut self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        self.segments.push(Segment::new(topic, payload));
        self
    }

    pub fn encoded_len(&self, layout: Layout) -> usize {
        let prefix = match layout {
            Layout::Compact => 0,
            Layout::Framed => 2,
        };
        HEADER_LEN
            + self
                .segments
                .iter()
                .map(|s| s.encoded_len() + prefix)
                .sum::<usize>()
    }

    pub fn encode(&self, layout: Layout) -> Result<Vec<u8>, FrameError> {
        encode(self, layout)
    }
}

/// Result of decoding a frame: the segments that parsed, and a record of
/// the ones that were skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub frame: Frame,
    pub skipped: Vec<SegmentError>,
}

/// Errors that reject a whole frame, or prevent encoding one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("malformed frame: too short ({len} bytes, need at least 7)")]
    TooShort { len: usize },

    #[error("topic is {len} bytes, limit is 255")]
    TopicTooLong { len: usize },

    #[error("payload for `{topic}` is {len} bytes, limit is 255")]
    PayloadTooLong { topic: String, len: usize },
}

/// A segment that could not be read. Its siblings are still delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentError {
    #[error("segment at offset {offset}: declares {declared} bytes but total length is {total}")]
    LengthMismatch {
        offset: usize,
        declared: usize,
        total: usize,
    },

    #[error("segment at offset {offset} runs past the end of the frame")]
    Truncated { offset: usize },
}

/// Parse a frame from bytes.
pub fn decode(buf: &[u8], layout: Layout) -> Result<Decoded, FrameError> {
    if buf.len() < HEADER_LEN {
        return Err(FrameError::TooShort { len: buf.len() });
    }

    let mut address = [0u8; ADDRESS_LEN];
    address.copy_from_slice(&buf[..ADDRESS_LEN]);
    let mut frame = Frame::new(DeviceAddress(address), buf[ADDRESS_LEN]);
    let mut skipped = Vec::new();

    match layout {
        Layout::Compact => decode_compact(buf, &mut frame.segments, &mut skipped),
        Layout::Framed => decode_framed(buf, &mut frame.segments, &mut skipped),
    }

    Ok(Decoded { frame, skipped })
}

/// Serialize a frame to bytes.
pub fn encode(frame: &Frame, layout: Layout) -> Result<Vec<u8>, FrameError> {
    let mut buf = Vec::with_capacity(frame.encoded_len(layout));

    buf.extend_from_slice(frame.address.as_bytes());
    buf.push(frame.sequence);

    for segment in &frame.segments {
        segment.check_limits()?;

        if layout == Layout::Framed {
            // at most 2 * 255 + 2, fits
            buf.extend_from_slice(&(segment.encoded_len() as u16).to_be_bytes());
        }
        buf.push(segment.topic.len() as u8);
        buf.extend_from_slice(segment.topic.as_bytes());
        buf.push(segment.payload.len() as u8);
        buf.extend_from_slice(&segment.payload);
    }

    Ok(buf)
}

fn decode_compact(buf: &[u8], segments: &mut Vec<Segment>, skipped: &mut Vec<SegmentError>) {
    let mut pos = HEADER_LEN;

    while pos < buf.len() {
        match read_segment(&buf[pos..]) {
            Some((segment, used)) => {
                segments.push(segment);
                pos += used;
            }
            None => {
                // No length prefix to resync on.
                skipped.push(SegmentError::Truncated { offset: pos });
                break;
            }
        }
    }
}

fn decode_framed(buf: &[u8], segments: &mut Vec<Segment>, skipped: &mut Vec<SegmentError>) {
    let mut pos = HEADER_LEN;

    while pos < buf.len() {
        let Some(prefix) = buf.get(pos..pos + 2) else {
            skipped.push(SegmentError::Truncated { offset: pos });
            break;
        };
        let total = u16::from_be_bytes([prefix[0], prefix[1]]) as usize;
        if total == 0 {
            break;
        }

        let start = pos + 2;
        let end = start + total;
        let Some(body) = buf.get(start..end) else {
            skipped.push(SegmentError::Truncated { offset: pos });
            break;
        };

        match read_segment(body) {
            Some((segment, used)) => {
                if used < total {
                    debug!(
                        "Skipping {} padding bytes after segment at {}",
                        total - used,
                        pos
                    );
                }
                segments.push(segment);
            }
            None => skipped.push(SegmentError::LengthMismatch {
                offset: pos,
                declared: declared_len(body),
                total,
            }),
        }

        // The prefix is authoritative for where the next segment starts.
        pos = end;
    }
}

/// Read `topic_len topic payload_len payload` from the front of `bytes`.
///
/// Returns the segment and the number of bytes it used, or `None` when the
/// declared lengths run past the end of `bytes`.
fn read_segment(bytes: &[u8]) -> Option<(Segment, usize)> {
    let (&topic_len, rest) = bytes.split_first()?;
    let topic_len = topic_len as usize;
    let topic = rest.get(..topic_len)?;

    let (&payload_len, rest) = rest.get(topic_len..)?.split_first()?;
    let payload_len = payload_len as usize;
    let payload = rest.get(..payload_len)?;

    let segment = Segment {
        topic: String::from_utf8_lossy(topic).into_owned(),
        payload: payload.to_vec(),
    };
    Some((segment, topic_len + payload_len + 2))
}

fn declared_len(body: &[u8]) -> usize {
    let topic_len = body.first().copied().unwrap_or(0) as usize;
    let payload_len = body.get(topic_len + 1).copied().unwrap_or(0) as usize;
    topic_len + payload_len + 2
}
