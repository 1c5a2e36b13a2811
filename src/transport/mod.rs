//! Transport endpoint boundary.
//!
//! The core's only contract with its environment: an inbound asynchronous
//! sequence of already-deserialized structured messages, and an outbound
//! `send` taking an optional transfer list. Decoding and framing are the
//! transport's job, not the core's.
//!
//! A transfer list names sub-objects within the message (JSON-pointer-style
//! paths) that the transport may move rather than deep-copy; it is a hint
//! the transport is free to ignore.

pub mod channel;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub use channel::{link, ChannelInbound, ChannelOutbound};

/// References into a message naming sub-objects eligible for
/// move-instead-of-copy across the transport boundary.
pub type TransferList = Vec<String>;

/// The receiving half of a transport endpoint.
#[async_trait]
pub trait InboundEndpoint: Send + 'static {
    /// Await the next inbound message; `None` once the endpoint closes.
    async fn recv(&mut self) -> Option<Value>;
}

/// The sending half of a transport endpoint.
#[async_trait]
pub trait OutboundEndpoint: Send + 'static {
    /// Send one message, with a transfer hint the transport may ignore.
    async fn send(&mut self, message: Value, transfer: TransferList) -> Result<()>;
}
