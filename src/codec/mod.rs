//! The `codec` module converts between raw device frames and the
//! topic/payload segments packed inside them.
//!
//! It is pure and stateless: deduplication, dispatch and flow control all
//! live in `gateway`.

pub mod frame;

pub use frame::{
    ADDRESS_LEN, Decoded, DeviceAddress, Frame, FrameError, HEADER_LEN, InvalidAddress, Layout,
    MAX_FIELD_LEN, Segment, SegmentError, decode, encode,
};
