//! Outbound side of a client connection.

use crate::messages::{CacheStorageResponse, OutboundMessage};
use crate::types::SessionId;
use tokio::sync::mpsc;

/// Delivers responses to the client, addressed by session.
pub trait ConnectionSink: Send + Sync {
    fn send(&self, session: SessionId, response: CacheStorageResponse);
}

/// Sink backed by an unbounded tokio channel; the receiver is drained by the transport.
#[derive(Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<OutboundMessage>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ConnectionSink for ChannelSink {
    fn send(&self, session: SessionId, response: CacheStorageResponse) {
        let request_id = response.request_id();
        if self
            .sender
            .send(OutboundMessage { session, response })
            .is_err()
        {
            tracing::warn!(
                session = %session,
                request_id,
                "client connection closed; dropping response"
            );
        }
    }
}
