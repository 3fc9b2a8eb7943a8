//! axum-based HTTP and WebSocket server.
//!
//! Every request lands on one catch-all axum handler. It turns the request
//! into a [`Scope`] plus a [`ConnectionIo`] and hands both to
//! [`Router::dispatch`]; routing, parameter coercion and error replies all
//! happen in the router.
//!
//! ```text
//! TcpListener ──► axum ──► handle ─┬─ Upgrade: websocket ─► WsSource / WsSink ─┐
//!                                  └─ plain request ──────► channel pair ──────┴─► Router::dispatch
//! ```
//!
//! The lifespan connection is opened before the listener accepts anything
//! and shut down after graceful shutdown drains open requests.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use spire_core::{Headers, Router, Scope};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ServerError, ServerResult};
use crate::lifespan::Lifespan;

#[cfg(feature = "http-server")]
use {
    crate::channel,
    axum::body::Body,
    bytes::Bytes,
    futures::StreamExt,
    spire_core::{Connection, InboundEvent, Method, OutboundEvent},
    std::convert::Infallible,
    tracing::warn,
};

#[cfg(feature = "ws-server")]
use {
    async_trait::async_trait,
    axum::extract::FromRequestParts,
    axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    futures::SinkExt,
    futures::stream::{SplitSink, SplitStream},
    spire_core::{
        ConnectionIo, EventSink, EventSource, Frame, TransportError, TransportResult, close_code,
    },
};

#[cfg(all(feature = "ws-server", not(feature = "http-server")))]
use {
    futures::StreamExt,
    spire_core::{Connection, InboundEvent, OutboundEvent},
};

// ─── Listener ────────────────────────────────────────────────────────────────

/// Binds a TCP listener on `addr`.
pub async fn bind(addr: &str) -> ServerResult<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|err| ServerError::bind(addr, err))
}

/// Serves `router` on `listener` until `shutdown` is cancelled.
///
/// Runs lifespan startup first; a failed startup aborts before any request is
/// accepted. In-flight requests are drained before lifespan shutdown runs.
pub async fn serve(
    listener: TcpListener,
    router: Arc<Router>,
    shutdown: CancellationToken,
) -> ServerResult<()> {
    let addr = listener.local_addr()?;
    let lifespan = Lifespan::startup(Arc::clone(&router)).await?;

    let app = axum::Router::new().fallback(handle).with_state(router);
    info!(addr = %addr, "Server listening");

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await;
    info!(addr = %addr, "Server stopped accepting connections");

    let closed = lifespan.shutdown().await;
    result?;
    closed
}

// ─── Dispatch ────────────────────────────────────────────────────────────────

async fn handle(
    State(router): State<Arc<Router>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    #[allow(unused_mut)]
    let (mut parts, body) = request.into_parts();

    #[cfg(feature = "ws-server")]
    if is_upgrade(&parts.headers) {
        return match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(upgrade) => upgrade_websocket(router, remote, &parts, upgrade),
            Err(rejection) => rejection.into_response(),
        };
    }

    #[cfg(feature = "http-server")]
    let response = respond_http(router, remote, parts, body).await;

    #[cfg(not(feature = "http-server"))]
    let response = {
        let _ = (router, remote, parts, body);
        (StatusCode::NOT_FOUND, "plain HTTP is not enabled").into_response()
    };

    response
}

fn headers_of(map: &HeaderMap) -> Headers {
    map.iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .collect()
}

fn with_request_info(scope: Scope, parts: &Parts, remote: SocketAddr) -> Scope {
    scope
        .with_headers(headers_of(&parts.headers))
        .with_query(parts.uri.query().unwrap_or_default())
        .with_remote_addr(remote.to_string())
}

// ═════════════════════════════════════════════════════════════════════════════
// HTTP
// ═════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "http-server")]
async fn respond_http(
    router: Arc<Router>,
    remote: SocketAddr,
    parts: Parts,
    body: Body,
) -> Response {
    let method = match parts.method.as_str().parse::<Method>() {
        Ok(method) => method,
        Err(err) => return (StatusCode::NOT_IMPLEMENTED, err.to_string()).into_response(),
    };
    let scope = with_request_info(Scope::http(method, parts.uri.path()), &parts, remote);
    let (io, ends) = channel::pair();
    let channel::ServerEnds {
        inbound,
        mut outbound,
    } = ends;

    tokio::spawn(forward_body(body, inbound.clone()));
    tokio::spawn(async move {
        let outcome = router.dispatch(Connection::new(scope, io)).await;
        debug!(?outcome, "HTTP connection finished");
        drop(inbound);
    });

    let (status, headers) = loop {
        match outbound.recv().await {
            Some(OutboundEvent::HttpResponseStart { status, headers }) => break (status, headers),
            Some(other) => debug!(event = ?other, "Ignoring event before response start"),
            None => {
                warn!("Application finished without sending a response");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    };

    let mut builder = axum::http::Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    let chunks = futures::stream::unfold(Some(outbound), |rx| async move {
        let mut rx = rx?;
        loop {
            if let OutboundEvent::HttpResponseBody { body, more_body } = rx.recv().await? {
                let next = more_body.then_some(rx);
                return Some((Ok::<Bytes, Infallible>(body), next));
            }
        }
    });

    builder
        .body(Body::from_stream(chunks))
        .unwrap_or_else(|err| {
            warn!(error = %err, "Invalid response head from application");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

/// Pumps the request body into the connection as `http.request` chunks.
#[cfg(feature = "http-server")]
async fn forward_body(body: Body, inbound: tokio::sync::mpsc::UnboundedSender<InboundEvent>) {
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let event = match chunk {
            Ok(body) => InboundEvent::HttpRequest {
                body,
                more_body: true,
            },
            Err(err) => {
                debug!(error = %err, "Request body aborted");
                let _ = inbound.send(InboundEvent::HttpDisconnect);
                return;
            }
        };
        if inbound.send(event).is_err() {
            return;
        }
    }
    let _ = inbound.send(InboundEvent::HttpRequest {
        body: Bytes::new(),
        more_body: false,
    });
}

// ═════════════════════════════════════════════════════════════════════════════
// WebSocket
// ═════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "ws-server")]
fn is_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

#[cfg(feature = "ws-server")]
fn upgrade_websocket(
    router: Arc<Router>,
    remote: SocketAddr,
    parts: &Parts,
    upgrade: WebSocketUpgrade,
) -> Response {
    let scope = with_request_info(Scope::websocket(parts.uri.path()), parts, remote);
    debug!(remote_addr = %remote, path = %scope.path, "WebSocket upgrade");

    upgrade.on_upgrade(move |socket: WebSocket| async move {
        let (sink, stream) = socket.split();
        let io = ConnectionIo::new(
            WsSource {
                stream,
                connected: false,
            },
            WsSink { sink },
        );
        let outcome = router.dispatch(Connection::new(scope, io)).await;
        debug!(?outcome, "WebSocket connection finished");
    })
}

/// Inbound half over an upgraded socket.
///
/// The handshake has already happened by the time the application runs, so
/// the first event is a synthetic `websocket.connect`.
#[cfg(feature = "ws-server")]
struct WsSource {
    stream: SplitStream<WebSocket>,
    connected: bool,
}

#[cfg(feature = "ws-server")]
#[async_trait]
impl EventSource for WsSource {
    async fn receive(&mut self) -> TransportResult<InboundEvent> {
        if !self.connected {
            self.connected = true;
            return Ok(InboundEvent::WebSocketConnect);
        }
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(InboundEvent::WebSocketReceive(Frame::Text(
                        text.as_str().to_owned(),
                    )));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(InboundEvent::WebSocketReceive(Frame::Binary(data)));
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map_or(NO_STATUS, |f| f.code);
                    return Ok(InboundEvent::WebSocketDisconnect { code });
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Err(err)) => {
                    debug!(error = %err, "WebSocket read failed");
                    return Err(TransportError::Disconnected);
                }
                None => return Err(TransportError::Disconnected),
            }
        }
    }
}

/// Close code reported when the peer closed without a status.
#[cfg(feature = "ws-server")]
const NO_STATUS: u16 = 1005;

/// Outbound half over an upgraded socket.
#[cfg(feature = "ws-server")]
struct WsSink {
    sink: SplitSink<WebSocket, Message>,
}

#[cfg(feature = "ws-server")]
#[async_trait]
impl EventSink for WsSink {
    async fn send(&mut self, event: OutboundEvent) -> TransportResult<()> {
        let message = match event {
            OutboundEvent::WebSocketAccept { subprotocol, .. } => {
                if subprotocol.is_some() {
                    debug!(?subprotocol, "Subprotocol ignored, handshake already completed");
                }
                return Ok(());
            }
            OutboundEvent::WebSocketSend(Frame::Text(text)) => Message::Text(text.into()),
            OutboundEvent::WebSocketSend(Frame::Binary(data)) => Message::Binary(data),
            OutboundEvent::WebSocketClose { code, reason } => {
                let frame = CloseFrame {
                    code: if code == 0 { close_code::NORMAL } else { code },
                    reason: reason.into(),
                };
                let sent = self.sink.send(Message::Close(Some(frame))).await;
                let _ = self.sink.close().await;
                return sent.map_err(|err| TransportError::SendFailed(err.to_string()));
            }
            other => {
                return Err(TransportError::SendFailed(format!(
                    "unsupported event on a WebSocket: {other:?}"
                )));
            }
        };
        self.sink
            .send(message)
            .await
            .map_err(|err| TransportError::SendFailed(err.to_string()))
    }
}
