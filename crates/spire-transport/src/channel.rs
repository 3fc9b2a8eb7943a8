//! Channel-backed connection I/O.
//!
//! Used for connections whose events are produced in-process: the lifespan
//! connection and HTTP requests, where the server side pumps body chunks in
//! and collects response events out.

use async_trait::async_trait;
use spire_core::{
    ConnectionIo, EventSink, EventSource, InboundEvent, OutboundEvent, TransportError,
    TransportResult,
};
use tokio::sync::mpsc;

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

/// Server-side ends of a channel connection.
pub(crate) struct ServerEnds {
    pub(crate) inbound: mpsc::UnboundedSender<InboundEvent>,
    pub(crate) outbound: mpsc::UnboundedReceiver<OutboundEvent>,
}

/// Creates a connection whose events travel over unbounded channels.
pub(crate) fn pair() -> (ConnectionIo, ServerEnds) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let io = ConnectionIo::new(ChannelSource(in_rx), ChannelSink(out_tx));
    (
        io,
        ServerEnds {
            inbound: in_tx,
            outbound: out_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_carries_events_both_ways() {
        let (mut io, mut ends) = pair();
        ends.inbound.send(InboundEvent::LifespanStartup).unwrap();
        assert_eq!(io.source.receive().await, Ok(InboundEvent::LifespanStartup));

        io.sink
            .send(OutboundEvent::LifespanStartupComplete)
            .await
            .unwrap();
        assert_eq!(
            ends.outbound.recv().await,
            Some(OutboundEvent::LifespanStartupComplete)
        );

        drop(ends);
        assert_eq!(io.source.receive().await, Err(TransportError::Disconnected));
    }
}
