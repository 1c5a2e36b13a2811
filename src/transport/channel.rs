//! In-memory channel transport.
//!
//! Two crossed endpoint pairs over unbounded channels: what one side sends,
//! the other receives. This is the crate's loopback transport and the test
//! harness; it ignores the transfer hint (everything already lives in one
//! address space).

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{InboundEndpoint, OutboundEndpoint, TransferList};
use crate::error::{PortlinkError, Result};

/// Receiving half of an in-memory endpoint.
pub struct ChannelInbound {
    rx: mpsc::UnboundedReceiver<Value>,
}

/// Sending half of an in-memory endpoint.
pub struct ChannelOutbound {
    tx: mpsc::UnboundedSender<Value>,
}

/// Create two connected endpoints.
///
/// Messages sent on the first pair's outbound half arrive on the second
/// pair's inbound half, and vice versa.
pub fn link() -> (
    (ChannelInbound, ChannelOutbound),
    (ChannelInbound, ChannelOutbound),
) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        (ChannelInbound { rx: a_rx }, ChannelOutbound { tx: a_tx }),
        (ChannelInbound { rx: b_rx }, ChannelOutbound { tx: b_tx }),
    )
}

#[async_trait]
impl InboundEndpoint for ChannelInbound {
    async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}

#[async_trait]
impl OutboundEndpoint for ChannelOutbound {
    async fn send(&mut self, message: Value, _transfer: TransferList) -> Result<()> {
        self.tx.send(message).map_err(|_| PortlinkError::Closed)
    }
}
