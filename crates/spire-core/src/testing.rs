//! In-memory connection I/O for tests.
//!
//! [`mock_io`] returns a [`ConnectionIo`] for the application side and a
//! [`MockPeer`] that plays the server: it injects inbound events and
//! observes outbound ones.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{TransportError, TransportResult};
use crate::lifecycle::{ConnectionIo, EventSink, EventSource, InboundEvent, OutboundEvent};

struct ChannelSource(mpsc::UnboundedReceiver<InboundEvent>);

#[async_trait]
impl EventSource for ChannelSource {
    async fn receive(&mut self) -> TransportResult<InboundEvent> {
        self.0.recv().await.ok_or(TransportError::Disconnected)
    }
}

struct ChannelSink(mpsc::UnboundedSender<OutboundEvent>);

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&mut self, event: OutboundEvent) -> TransportResult<()> {
        self.0.send(event).map_err(|_| TransportError::Disconnected)
    }
}

/// The server side of a mock connection.
pub struct MockPeer {
    inbound: Option<mpsc::UnboundedSender<InboundEvent>>,
    outbound: mpsc::UnboundedReceiver<OutboundEvent>,
}

impl MockPeer {
    /// Injects an inbound event. Ignored after [`close`](Self::close).
    pub fn send(&self, event: InboundEvent) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(event);
        }
    }

    /// Waits for the next outbound event; `None` once the application side is gone.
    pub async fn recv(&mut self) -> Option<OutboundEvent> {
        self.outbound.recv().await
    }

    /// Pops an outbound event if one is ready.
    pub fn try_recv(&mut self) -> Option<OutboundEvent> {
        self.outbound.try_recv().ok()
    }

    /// All outbound events sent so far.
    pub fn drain(&mut self) -> Vec<OutboundEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Ends the inbound stream; the application sees a disconnect.
    pub fn close(&mut self) {
        self.inbound = None;
    }
}

/// Creates a connected mock I/O pair.
pub fn mock_io() -> (ConnectionIo, MockPeer) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let io = ConnectionIo::new(ChannelSource(in_rx), ChannelSink(out_tx));
    let peer = MockPeer {
        inbound: Some(in_tx),
        outbound: out_rx,
    };
    (io, peer)
}
