//! Channel-backed transport.
//!
//! The engine hands items to a [`ChannelTransport`], which encodes them
//! with the binary codec and queues them for the host's link layer.
//! Sending never blocks: when the queue is full the frame is dropped, as
//! the bounce protocol tolerates loss.

use lobby_core::Transport;
use lobby_shared::{LobbyItem, PeerId};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Encoded item addressed to a friend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub to: PeerId,
    pub bytes: Vec<u8>,
}

/// Encoded item received from a friend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub from: PeerId,
    pub bytes: Vec<u8>,
}

impl InboundFrame {
    /// Decode the payload. Malformed frames are logged and yield `None`.
    pub fn decode(&self) -> Option<LobbyItem> {
        match LobbyItem::from_bytes(&self.bytes) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(peer = %self.from.short(), len = self.bytes.len(), error = %e, "Dropping malformed lobby frame");
                None
            }
        }
    }
}

pub struct ChannelTransport {
    tx: mpsc::Sender<OutboundFrame>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::Sender<OutboundFrame>) -> Self {
        Self { tx }
    }

    /// Transport plus the receiving end of its queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl Transport for ChannelTransport {
    fn send_item(&self, to: PeerId, item: LobbyItem) {
        let bytes = match item.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(peer = %to.short(), kind = item.kind(), error = %e, "Failed to encode lobby item");
                return;
            }
        };

        match self.tx.try_send(OutboundFrame { to, bytes }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(frame)) => {
                warn!(peer = %frame.to.short(), kind = item.kind(), "Outbound queue full, dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(peer = %to.short(), "Outbound queue closed");
            }
        }
    }
}
