//! WebSocket lifecycle.
//!
//! ```text
//! Connecting ──accept──► Accepted ──first I/O──► Open ──► Closing ──► Closed
//!      │                                                    ▲
//!      └──────────────────── reject (close) ────────────────┘
//! ```
//!
//! Frame I/O is rejected with [`LifecycleError::NotAccepted`] until the
//! handler calls [`WebSocket::accept`]. While open, [`WebSocket::serve`]
//! multiplexes inbound frames with any bound [`OutboundFeed`]s (typically
//! pub/sub subscribers). On close the lifecycle flushes payloads already
//! queued on bound feeds, sends the close frame, and drops the feeds, which
//! releases their subscriptions on every exit path.

use std::future::Future;
use std::sync::Arc;

use futures::future::select_all;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use super::io::{
    ConnectionIo, EventSink, EventSource, FeedEvent, Frame, InboundEvent, OutboundEvent,
    OutboundFeed,
};
use super::scope::Scope;
use super::{DispatchOutcome, guarded};
use crate::error::{HandlerResult, LifecycleError, LifecycleResult, TransportError};
use crate::routing::{PathParams, WebSocketHandler};

/// Close codes used by the framework.
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// The endpoint is going away (server shutdown).
    pub const GOING_AWAY: u16 = 1001;
    /// The route rejected the connection.
    pub const POLICY_VIOLATION: u16 = 1008;
    /// The handler failed.
    pub const INTERNAL_ERROR: u16 = 1011;
    /// A bound feed was cut off by backpressure.
    pub const TRY_AGAIN_LATER: u16 = 1013;
    /// Path parameters failed validation.
    pub const BAD_REQUEST: u16 = 4400;
    /// No WebSocket route matched.
    pub const NOT_FOUND: u16 = 4404;
}

/// States of the WebSocket lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    /// Handshake received, not yet accepted.
    Connecting,
    /// Accept sent, no frame I/O yet.
    Accepted,
    /// Frames flowing.
    Open,
    /// Close in progress.
    Closing,
    /// Terminal.
    Closed,
}

impl WsState {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Accepted => "accepted",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

/// How payloads from a bound feed are framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameMode {
    /// Send as text frames (payloads are decoded as UTF-8, lossily).
    #[default]
    Text,
    /// Send as binary frames.
    Binary,
}

impl FrameMode {
    fn frame(&self, payload: bytes::Bytes) -> Frame {
        match self {
            Self::Text => Frame::Text(String::from_utf8_lossy(&payload).into_owned()),
            Self::Binary => Frame::Binary(payload),
        }
    }
}

struct BoundFeed {
    feed: Box<dyn OutboundFeed>,
    mode: FrameMode,
}

struct Inner {
    scope: Scope,
    state: Mutex<WsState>,
    peer_close: Mutex<Option<u16>>,
    source: tokio::sync::Mutex<Box<dyn EventSource>>,
    sink: tokio::sync::Mutex<Box<dyn EventSink>>,
    feeds: Mutex<Vec<BoundFeed>>,
}

enum Step {
    Inbound(LifecycleResult<Option<Frame>>),
    Feed(usize, FeedEvent),
}

/// A handle to one WebSocket connection.
///
/// Cloning is cheap; all clones drive the same connection.
#[derive(Clone)]
pub struct WebSocket {
    inner: Arc<Inner>,
}

impl WebSocket {
    fn new(scope: Scope, source: Box<dyn EventSource>, sink: Box<dyn EventSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                scope,
                state: Mutex::new(WsState::Connecting),
                peer_close: Mutex::new(None),
                source: tokio::sync::Mutex::new(source),
                sink: tokio::sync::Mutex::new(sink),
                feeds: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The connection scope.
    pub fn scope(&self) -> &Scope {
        &self.inner.scope
    }

    /// Typed path parameters.
    pub fn params(&self) -> &PathParams {
        &self.inner.scope.path_params
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WsState {
        *self.inner.state.lock()
    }

    /// Close code sent by the peer, once it has disconnected.
    pub fn peer_close_code(&self) -> Option<u16> {
        *self.inner.peer_close.lock()
    }

    fn set_state(&self, state: WsState) {
        let mut guard = self.inner.state.lock();
        trace!(from = guard.as_str(), to = state.as_str(), "WebSocket state change");
        *guard = state;
    }

    /// Moves `Accepted` to `Open`, or explains why frame I/O is not allowed.
    fn ensure_open(&self, action: &'static str) -> LifecycleResult<()> {
        let mut state = self.inner.state.lock();
        match *state {
            WsState::Open => Ok(()),
            WsState::Accepted => {
                *state = WsState::Open;
                Ok(())
            }
            WsState::Connecting => Err(LifecycleError::NotAccepted { action }),
            WsState::Closing | WsState::Closed => Err(LifecycleError::Closed),
        }
    }

    /// Completes the handshake.
    pub async fn accept(&self) -> LifecycleResult<()> {
        self.accept_with(None, Vec::new()).await
    }

    /// Completes the handshake with a subprotocol and extra headers.
    pub async fn accept_with(
        &self,
        subprotocol: Option<String>,
        headers: Vec<(String, String)>,
    ) -> LifecycleResult<()> {
        {
            let state = *self.inner.state.lock();
            if state != WsState::Connecting {
                return Err(LifecycleError::InvalidTransition {
                    from: state.as_str(),
                    to: WsState::Accepted.as_str(),
                });
            }
        }
        self.send_event(OutboundEvent::WebSocketAccept {
            subprotocol,
            headers,
        })
        .await?;
        self.set_state(WsState::Accepted);
        Ok(())
    }

    async fn send_event(&self, event: OutboundEvent) -> LifecycleResult<()> {
        let result = self.inner.sink.lock().await.send(event).await;
        if let Err(err) = result {
            debug!(error = %err, "WebSocket send failed, marking connection closed");
            self.set_state(WsState::Closed);
            self.inner.feeds.lock().clear();
            return Err(err.into());
        }
        Ok(())
    }

    /// Waits for the next inbound frame. Returns `None` once the peer has closed.
    pub async fn receive(&self) -> LifecycleResult<Option<Frame>> {
        if self.inner.peer_close.lock().is_some() {
            return Ok(None);
        }
        self.ensure_open("receive")?;

        let mut source = self.inner.source.lock().await;
        loop {
            match source.receive().await {
                Ok(InboundEvent::WebSocketReceive(frame)) => return Ok(Some(frame)),
                Ok(InboundEvent::WebSocketDisconnect { code }) => {
                    self.peer_closed(code);
                    return Ok(None);
                }
                Err(TransportError::Disconnected) => {
                    self.peer_closed(close_code::GOING_AWAY);
                    return Ok(None);
                }
                Ok(other) => {
                    warn!(event = other.name(), "Ignoring unexpected WebSocket event");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn peer_closed(&self, code: u16) {
        debug!(code, "WebSocket peer closed");
        *self.inner.peer_close.lock() = Some(code);
        self.set_state(WsState::Closing);
    }

    /// Sends a frame.
    pub async fn send(&self, frame: Frame) -> LifecycleResult<()> {
        self.ensure_open("send")?;
        self.send_event(OutboundEvent::WebSocketSend(frame)).await
    }

    /// Sends a text frame.
    pub async fn send_text(&self, text: impl Into<String>) -> LifecycleResult<()> {
        self.send(Frame::Text(text.into())).await
    }

    /// Sends a binary frame.
    pub async fn send_bytes(&self, bytes: impl Into<bytes::Bytes>) -> LifecycleResult<()> {
        self.send(Frame::Binary(bytes.into())).await
    }

    /// Binds an outbound feed. Its payloads are forwarded by [`serve`](Self::serve)
    /// and it is dropped when the connection closes.
    pub fn bind(&self, feed: impl OutboundFeed + 'static, mode: FrameMode) {
        self.inner.feeds.lock().push(BoundFeed {
            feed: Box::new(feed),
            mode,
        });
    }

    /// Number of feeds currently bound.
    pub fn bound_feeds(&self) -> usize {
        self.inner.feeds.lock().len()
    }

    /// Closes the connection. Before accept this rejects the handshake.
    ///
    /// Payloads already queued on bound feeds are flushed first. Closing an
    /// already-closed socket is a no-op.
    pub async fn close(&self, code: u16, reason: impl Into<String>) -> LifecycleResult<()> {
        let state = self.state();
        match state {
            WsState::Closed => return Ok(()),
            WsState::Closing if self.peer_close_code().is_some() => {
                self.inner.feeds.lock().clear();
                self.set_state(WsState::Closed);
                return Ok(());
            }
            WsState::Closing => return Ok(()),
            WsState::Connecting => {}
            WsState::Accepted | WsState::Open => {
                self.set_state(WsState::Closing);
                self.flush_feeds().await?;
            }
        }

        let feeds = std::mem::take(&mut *self.inner.feeds.lock());
        let result = self
            .send_event(OutboundEvent::WebSocketClose {
                code,
                reason: reason.into(),
            })
            .await;
        self.set_state(WsState::Closed);
        drop(feeds);
        result
    }

    /// Sends payloads that are already queued on bound feeds.
    async fn flush_feeds(&self) -> LifecycleResult<()> {
        let pending: Vec<Frame> = {
            let feeds = self.inner.feeds.lock();
            feeds
                .iter()
                .flat_map(|bound| {
                    std::iter::from_fn(|| bound.feed.try_next_payload())
                        .map(|payload| bound.mode.frame(payload))
                        .collect::<Vec<_>>()
                })
                .collect()
        };
        if !pending.is_empty() {
            trace!(frames = pending.len(), "Flushing queued frames before close");
        }
        for frame in pending {
            self.send_event(OutboundEvent::WebSocketSend(frame)).await?;
        }
        Ok(())
    }

    /// Runs the open state until the peer closes or the socket is closed.
    ///
    /// Inbound frames go to `on_frame`; payloads from bound feeds are sent to
    /// the peer as they arrive. A feed closed with a reason (backpressure)
    /// closes the socket with [`close_code::TRY_AGAIN_LATER`]. An error from
    /// `on_frame` ends the loop and is returned.
    pub async fn serve<F, Fut>(&self, mut on_frame: F) -> HandlerResult
    where
        F: FnMut(Frame) -> Fut,
        Fut: Future<Output = HandlerResult>,
    {
        self.ensure_open("serve")?;

        loop {
            if matches!(self.state(), WsState::Closing | WsState::Closed) {
                return Ok(());
            }

            let mut feeds = std::mem::take(&mut *self.inner.feeds.lock());
            let step = if feeds.is_empty() {
                Step::Inbound(self.receive().await)
            } else {
                let pending = select_all(feeds.iter().map(|bound| bound.feed.next_event()));
                tokio::select! {
                    inbound = self.receive() => Step::Inbound(inbound),
                    (event, index, _) = pending => Step::Feed(index, event),
                }
            };

            match step {
                Step::Inbound(Ok(Some(frame))) => {
                    self.restore_feeds(feeds);
                    on_frame(frame).await?;
                }
                Step::Inbound(Ok(None)) => {
                    drop(feeds);
                    self.inner.feeds.lock().clear();
                    return Ok(());
                }
                Step::Inbound(Err(err)) => {
                    self.restore_feeds(feeds);
                    return Err(err.into());
                }
                Step::Feed(index, FeedEvent::Payload(payload)) => {
                    let frame = feeds[index].mode.frame(payload);
                    self.restore_feeds(feeds);
                    self.send_event(OutboundEvent::WebSocketSend(frame)).await?;
                }
                Step::Feed(index, FeedEvent::Closed { reason: None }) => {
                    trace!(index, "Bound feed ended");
                    feeds.remove(index);
                    self.restore_feeds(feeds);
                }
                Step::Feed(_, FeedEvent::Closed { reason: Some(reason) }) => {
                    warn!(%reason, "Bound feed cut off, closing WebSocket");
                    self.restore_feeds(feeds);
                    self.close(close_code::TRY_AGAIN_LATER, reason).await?;
                    return Ok(());
                }
            }
        }
    }

    fn restore_feeds(&self, mut feeds: Vec<BoundFeed>) {
        if matches!(self.state(), WsState::Closed) {
            return;
        }
        let mut guard = self.inner.feeds.lock();
        feeds.append(&mut guard);
        *guard = feeds;
    }

    /// Brings the connection to `Closed` after the handler returned.
    async fn finish(&self, result: Result<(), String>) -> DispatchOutcome {
        match result {
            Ok(()) => {
                let peer_gone = self.peer_close_code().is_some();
                if let Err(err) = self.close(close_code::NORMAL, "").await {
                    debug!(error = %err, "Failed to close WebSocket cleanly");
                    return DispatchOutcome::Disconnected;
                }
                if peer_gone {
                    DispatchOutcome::Disconnected
                } else {
                    DispatchOutcome::Completed
                }
            }
            Err(message) => {
                error!(error = %message, "WebSocket handler failed");
                if let Err(err) = self
                    .close(close_code::INTERNAL_ERROR, "Internal Server Error")
                    .await
                {
                    debug!(error = %err, "Failed to send error close frame");
                }
                DispatchOutcome::HandlerFailed { message }
            }
        }
    }
}

impl std::fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket")
            .field("path", &self.inner.scope.path)
            .field("state", &self.state())
            .finish()
    }
}

/// Consumes the handshake and rejects it with `code`.
pub async fn reject(io: &mut ConnectionIo, code: u16, reason: &str) -> LifecycleResult<()> {
    match io.source.receive().await? {
        InboundEvent::WebSocketConnect => {}
        other => {
            return Err(LifecycleError::UnexpectedEvent {
                expected: "websocket.connect",
                got: other.name(),
            });
        }
    }
    io.sink
        .send(OutboundEvent::WebSocketClose {
            code,
            reason: reason.to_string(),
        })
        .await?;
    Ok(())
}

/// Drives one WebSocket connection through `handler`.
pub(crate) async fn run(
    handler: Arc<dyn WebSocketHandler>,
    scope: Scope,
    io: ConnectionIo,
) -> DispatchOutcome {
    let ConnectionIo { mut source, sink } = io;
    match source.receive().await {
        Ok(InboundEvent::WebSocketConnect) => {}
        Ok(other) => {
            let err = LifecycleError::UnexpectedEvent {
                expected: "websocket.connect",
                got: other.name(),
            };
            warn!(error = %err, "Bad WebSocket handshake");
            return DispatchOutcome::Rejected(err.into());
        }
        Err(_) => return DispatchOutcome::Disconnected,
    }

    let socket = WebSocket::new(scope, source, sink);
    let result = guarded(handler.call(socket.clone())).await;
    socket.finish(result).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mock_io;

    fn socket() -> (WebSocket, crate::testing::MockPeer) {
        let (io, peer) = mock_io();
        let ConnectionIo { source, sink } = io;
        (WebSocket::new(Scope::websocket("/ws"), source, sink), peer)
    }

    #[tokio::test]
    async fn test_send_before_accept_is_rejected() {
        let (ws, _peer) = socket();
        let err = ws.send_text("hi").await.unwrap_err();
        assert_eq!(err, LifecycleError::NotAccepted { action: "send" });
        assert_eq!(ws.state(), WsState::Connecting);
    }

    #[tokio::test]
    async fn test_accept_then_open() {
        let (ws, mut peer) = socket();
        ws.accept().await.unwrap();
        assert_eq!(ws.state(), WsState::Accepted);
        ws.send_text("hi").await.unwrap();
        assert_eq!(ws.state(), WsState::Open);

        assert!(matches!(
            peer.recv().await,
            Some(OutboundEvent::WebSocketAccept { .. })
        ));
        assert_eq!(
            peer.recv().await,
            Some(OutboundEvent::WebSocketSend(Frame::Text("hi".into())))
        );
    }

    #[tokio::test]
    async fn test_double_accept_is_invalid() {
        let (ws, _peer) = socket();
        ws.accept().await.unwrap();
        assert!(matches!(
            ws.accept().await,
            Err(LifecycleError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_receive_reports_peer_close() {
        let (ws, peer) = socket();
        ws.accept().await.unwrap();
        peer.send(InboundEvent::WebSocketDisconnect { code: 1001 });
        assert_eq!(ws.receive().await.unwrap(), None);
        assert_eq!(ws.peer_close_code(), Some(1001));
        assert_eq!(ws.state(), WsState::Closing);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (ws, mut peer) = socket();
        ws.accept().await.unwrap();
        ws.close(close_code::NORMAL, "bye").await.unwrap();
        ws.close(close_code::NORMAL, "bye").await.unwrap();
        assert_eq!(ws.state(), WsState::Closed);

        let events = peer.drain();
        let closes = events
            .iter()
            .filter(|e| matches!(e, OutboundEvent::WebSocketClose { .. }))
            .count();
        assert_eq!(closes, 1);
    }
}
