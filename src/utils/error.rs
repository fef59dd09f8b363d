//! The `error` module defines the error types used across the gateway.
//!
//! Codec and downlink errors live next to the code that raises them
//! (`codec::FrameError`, `gateway::downlink::DownlinkError`,
//! `gateway::request::RequestError`). `GatewayError` collects the failures
//! that can stop the process: configuration, sockets and the message store.

use thiserror::Error;

use crate::codec::FrameError;
use crate::gateway::downlink::DownlinkError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("message store error: {0}")]
    Persistence(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Downlink(#[from] DownlinkError),

    #[error("invalid device id: {0}")]
    InvalidDeviceId(String),

    #[error("frame is not valid hex: {0}")]
    InvalidFrameHex(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
