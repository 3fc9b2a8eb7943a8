//! Protocol I/O primitives.
//!
//! A connection is driven by two halves supplied by the server layer: an
//! [`EventSource`] yielding inbound protocol events and an [`EventSink`]
//! accepting outbound ones. The lifecycles in this module never touch sockets
//! directly; they only speak this event vocabulary.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportResult;

/// A single WebSocket data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
}

impl Frame {
    /// Returns the text payload, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Returns the frame payload as raw bytes.
    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Text(text) => Bytes::from(text),
            Self::Binary(bytes) => bytes,
        }
    }
}

/// Events delivered by the server to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A chunk of the HTTP request body.
    HttpRequest {
        /// Body bytes in this chunk.
        body: Bytes,
        /// Whether more chunks follow.
        more_body: bool,
    },
    /// The HTTP client went away.
    HttpDisconnect,
    /// The WebSocket handshake request.
    WebSocketConnect,
    /// An inbound WebSocket frame.
    WebSocketReceive(Frame),
    /// The WebSocket peer closed.
    WebSocketDisconnect {
        /// Close code sent by the peer.
        code: u16,
    },
    /// Server startup notification.
    LifespanStartup,
    /// Server shutdown notification.
    LifespanShutdown,
}

impl InboundEvent {
    /// A short event name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::HttpRequest { .. } => "http.request",
            Self::HttpDisconnect => "http.disconnect",
            Self::WebSocketConnect => "websocket.connect",
            Self::WebSocketReceive(_) => "websocket.receive",
            Self::WebSocketDisconnect { .. } => "websocket.disconnect",
            Self::LifespanStartup => "lifespan.startup",
            Self::LifespanShutdown => "lifespan.shutdown",
        }
    }
}

/// Events sent by the application to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    /// Response status line and headers.
    HttpResponseStart {
        /// Status code.
        status: u16,
        /// Response headers.
        headers: Vec<(String, String)>,
    },
    /// A chunk of the response body.
    HttpResponseBody {
        /// Body bytes in this chunk.
        body: Bytes,
        /// Whether more chunks follow.
        more_body: bool,
    },
    /// Completes the WebSocket handshake.
    WebSocketAccept {
        /// Negotiated subprotocol.
        subprotocol: Option<String>,
        /// Extra handshake headers.
        headers: Vec<(String, String)>,
    },
    /// An outbound WebSocket frame.
    WebSocketSend(Frame),
    /// Closes (or, before accept, rejects) the WebSocket.
    WebSocketClose {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// Startup finished.
    LifespanStartupComplete,
    /// Startup failed.
    LifespanStartupFailed {
        /// Failure description.
        message: String,
    },
    /// Shutdown finished.
    LifespanShutdownComplete,
    /// Shutdown failed.
    LifespanShutdownFailed {
        /// Failure description.
        message: String,
    },
}

/// Inbound half of a connection.
#[async_trait]
pub trait EventSource: Send {
    /// Waits for the next inbound event.
    ///
    /// Returns [`TransportError::Disconnected`](crate::error::TransportError)
    /// once the stream has ended. Implementations must be cancel-safe: dropping
    /// the future must not lose an event.
    async fn receive(&mut self) -> TransportResult<InboundEvent>;
}

/// Outbound half of a connection.
#[async_trait]
pub trait EventSink: Send {
    /// Sends one outbound event.
    async fn send(&mut self, event: OutboundEvent) -> TransportResult<()>;
}

/// The raw I/O pair for one connection.
pub struct ConnectionIo {
    /// Inbound events.
    pub source: Box<dyn EventSource>,
    /// Outbound events.
    pub sink: Box<dyn EventSink>,
}

impl ConnectionIo {
    /// Creates an I/O pair.
    pub fn new(source: impl EventSource + 'static, sink: impl EventSink + 'static) -> Self {
        Self {
            source: Box::new(source),
            sink: Box::new(sink),
        }
    }
}

impl std::fmt::Debug for ConnectionIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionIo").finish_non_exhaustive()
    }
}

// =============================================================================
// Outbound feeds
// =============================================================================

/// An item pulled from an [`OutboundFeed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// A payload to forward to the peer.
    Payload(Bytes),
    /// The feed ended. A reason means it was cut off (e.g. by backpressure).
    Closed {
        /// Why the feed was closed, if not a normal end.
        reason: Option<String>,
    },
}

/// A source of server-initiated payloads that can be bound to a WebSocket.
///
/// The pub/sub subscriber implements this so a socket can forward channel
/// messages while it is also reading from the peer.
#[async_trait]
pub trait OutboundFeed: Send + Sync {
    /// Waits for the next payload or the end of the feed.
    async fn next_event(&self) -> FeedEvent;

    /// Pops a payload that is already available, without waiting.
    fn try_next_payload(&self) -> Option<Bytes>;
}
