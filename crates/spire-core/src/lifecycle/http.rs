//! HTTP request/response lifecycle.
//!
//! ```text
//! Received ──► HandlerInvoked ──► ResponseSent ──► Closed
//!                    │                  ▲
//!                    └──► Error ────────┘ (synthesized 500)
//! ```

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::{debug, error, trace};

use super::io::{ConnectionIo, InboundEvent, OutboundEvent};
use super::scope::Scope;
use super::{DispatchOutcome, guarded};
use crate::error::{DispatchError, LifecycleError, LifecycleResult, RoutingError, TransportError};
use crate::routing::{HttpHandler, PathParams};

/// States of the HTTP lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpState {
    /// The request (head and body) has been read.
    Received,
    /// The handler is running.
    HandlerInvoked,
    /// The response has been written.
    ResponseSent,
    /// The handler failed; an error response is being synthesized.
    Error,
    /// Terminal.
    Closed,
}

/// An HTTP request as seen by a handler.
#[derive(Debug, Clone)]
pub struct Request {
    /// Connection scope, including bound path parameters.
    pub scope: Scope,
    /// The full request body.
    pub body: Bytes,
}

impl Request {
    /// Typed path parameters.
    pub fn params(&self) -> &PathParams {
        &self.scope.path_params
    }

    /// The request body as UTF-8 text.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// An HTTP response produced by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Bytes,
}

impl Response {
    /// Creates an empty response with `status`.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// A `200 OK` plain-text response.
    pub fn text(body: impl Into<String>) -> Self {
        Self::new(200)
            .with_header("content-type", "text/plain; charset=utf-8")
            .with_body(body.into())
    }

    /// Sets the status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Looks up a header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Builds the response used to answer a dispatch error.
    pub fn from_error(err: &DispatchError) -> Self {
        let mut response = Self::new(err.http_status())
            .with_header("content-type", "text/plain; charset=utf-8")
            .with_body(err.to_string());
        if let DispatchError::Routing(RoutingError::MethodNotAllowed { allowed, .. }) = err {
            let allow = allowed
                .iter()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            response = response.with_header("allow", allow);
        }
        response
    }
}

/// Reads the complete request body.
async fn read_body(io: &mut ConnectionIo) -> LifecycleResult<Bytes> {
    let mut buf = BytesMut::new();
    loop {
        match io.source.receive().await? {
            InboundEvent::HttpRequest { body, more_body } => {
                buf.extend_from_slice(&body);
                if !more_body {
                    return Ok(buf.freeze());
                }
            }
            InboundEvent::HttpDisconnect => return Err(TransportError::Disconnected.into()),
            other => {
                return Err(LifecycleError::UnexpectedEvent {
                    expected: "http.request",
                    got: other.name(),
                });
            }
        }
    }
}

/// Writes a complete response.
pub async fn send_response(io: &mut ConnectionIo, response: Response) -> LifecycleResult<()> {
    io.sink
        .send(OutboundEvent::HttpResponseStart {
            status: response.status,
            headers: response.headers,
        })
        .await?;
    io.sink
        .send(OutboundEvent::HttpResponseBody {
            body: response.body,
            more_body: false,
        })
        .await?;
    Ok(())
}

/// Answers a connection with the error response for `err`.
pub async fn send_error(io: &mut ConnectionIo, err: &DispatchError) -> LifecycleResult<()> {
    send_response(io, Response::from_error(err)).await
}

/// Drives one HTTP request through `handler`.
pub(crate) async fn run(
    handler: Arc<dyn HttpHandler>,
    scope: Scope,
    mut io: ConnectionIo,
) -> DispatchOutcome {
    let body = match read_body(&mut io).await {
        Ok(body) => body,
        Err(err) if err.is_disconnect() => {
            debug!("Client disconnected before the request body was read");
            return DispatchOutcome::Disconnected;
        }
        Err(err) => {
            let err = DispatchError::from(err);
            if let Err(send_err) = send_error(&mut io, &err).await {
                debug!(error = %send_err, "Failed to send error response");
            }
            return DispatchOutcome::Rejected(err);
        }
    };
    let mut state = HttpState::Received;
    trace!(?state, bytes = body.len(), "Request received");

    state = HttpState::HandlerInvoked;
    trace!(?state, "Invoking HTTP handler");
    let request = Request { scope, body };
    let (response, outcome) = match guarded(handler.call(request)).await {
        Ok(response) => (response, DispatchOutcome::Completed),
        Err(message) => {
            state = HttpState::Error;
            error!(?state, error = %message, "HTTP handler failed");
            let response = Response::new(500)
                .with_header("content-type", "text/plain; charset=utf-8")
                .with_body("Internal Server Error");
            (response, DispatchOutcome::HandlerFailed { message })
        }
    };

    let status = response.status;
    if let Err(err) = send_response(&mut io, response).await {
        debug!(error = %err, "Failed to send HTTP response");
        return DispatchOutcome::Disconnected;
    }
    state = HttpState::ResponseSent;
    trace!(?state, status, "Response sent");

    state = HttpState::Closed;
    trace!(?state, "HTTP lifecycle finished");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerResult;
    use crate::routing::Method;

    #[test]
    fn test_response_builders() {
        let response = Response::text("hi").with_status(201);
        assert_eq!(response.status, 201);
        assert_eq!(response.header("Content-Type"), Some("text/plain; charset=utf-8"));
        assert_eq!(response.body, Bytes::from("hi"));
    }

    #[test]
    fn test_method_not_allowed_sets_allow_header() {
        let err: DispatchError = RoutingError::MethodNotAllowed {
            path: "/x".into(),
            method: Method::Delete,
            allowed: vec![Method::Get, Method::Post],
        }
        .into();
        let response = Response::from_error(&err);
        assert_eq!(response.status, 405);
        assert_eq!(response.header("allow"), Some("GET, POST"));
    }

    async fn echo(request: Request) -> HandlerResult<Response> {
        Ok(Response::text(request.text().unwrap_or_default().to_string()))
    }

    #[tokio::test]
    async fn test_bad_request_stream_is_answered_with_an_error() {
        let (io, mut peer) = crate::testing::mock_io();
        peer.send(InboundEvent::WebSocketConnect);

        let outcome = run(Arc::new(echo), Scope::http(Method::Post, "/echo"), io).await;
        assert!(matches!(outcome, DispatchOutcome::Rejected(_)));
        assert!(matches!(
            peer.drain().first(),
            Some(OutboundEvent::HttpResponseStart { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejection_survives_a_vanished_client() {
        let (io, peer) = crate::testing::mock_io();
        peer.send(InboundEvent::WebSocketConnect);
        drop(peer);

        let outcome = run(Arc::new(echo), Scope::http(Method::Post, "/echo"), io).await;
        assert!(matches!(outcome, DispatchOutcome::Rejected(_)));
    }
}
