//! Per-connection lifecycles.
//!
//! Once the router has matched a connection it hands the scope and I/O to the
//! lifecycle for the route's kind:
//!
//! - [`http`]: read body, invoke handler, send response.
//! - [`websocket`]: handshake, open-state multiplexing of inbound frames and
//!   bound outbound feeds, drained close.
//! - [`raw`]: passthrough; the handler owns the protocol.
//! - [`lifespan`]: server startup/shutdown notifications.
//!
//! Handler failures (errors and panics) are caught at this boundary, logged,
//! and turned into a protocol-level error. They never escape the connection
//! task.

pub mod http;
pub mod io;
pub mod lifespan;
pub mod raw;
pub mod scope;
pub mod websocket;

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use crate::error::{DispatchError, HandlerResult};

pub use http::{HttpState, Request, Response};
pub use io::{
    ConnectionIo, EventSink, EventSource, FeedEvent, Frame, InboundEvent, OutboundEvent,
    OutboundFeed,
};
pub use lifespan::LifespanHandler;
pub use scope::{Connection, Headers, Protocol, Scope};
pub use websocket::{FrameMode, WebSocket, WsState, close_code};

/// How a dispatched connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler ran and the connection closed normally.
    Completed,
    /// The connection was answered with an error before reaching a handler.
    Rejected(DispatchError),
    /// The handler failed; a protocol-level error was sent where possible.
    HandlerFailed {
        /// The error or panic message.
        message: String,
    },
    /// The peer went away mid-lifecycle.
    Disconnected,
}

impl DispatchOutcome {
    /// Returns `true` for [`DispatchOutcome::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Runs a handler future, converting both errors and panics into a message.
pub(crate) async fn guarded<T, F>(fut: F) -> Result<T, String>
where
    F: Future<Output = HandlerResult<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(format!("{err:#}")),
        Err(panic) => Err(panic_message(panic.as_ref())),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guarded_catches_errors_and_panics() {
        assert_eq!(guarded(async { Ok(1) }).await, Ok(1));

        let err = guarded::<(), _>(async { Err(anyhow::anyhow!("boom")) }).await;
        assert_eq!(err, Err("boom".to_string()));

        let panicked = guarded::<(), _>(async { panic!("oops") }).await;
        assert_eq!(panicked, Err("handler panicked: oops".to_string()));
    }
}
