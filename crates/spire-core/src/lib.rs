//! # Spire Core
//!
//! Request dispatch for the Spire web framework.
//!
//! ## Layers
//!
//! ### Routing
//!
//! - **Routes**: immutable bindings of a [`PathPattern`] to an HTTP,
//!   WebSocket or raw handler ([`Route`], [`RouteKind`])
//! - **Router**: a segment trie resolving `(path, method, kind)` to one route
//!   or a structured error ([`Router`], [`RoutingError`])
//!
//! ### Lifecycle
//!
//! Per-connection state machines driven after a match:
//! - **HTTP**: [`Request`] in, [`Response`] out
//! - **WebSocket**: [`WebSocket`] handle with explicit accept and bound
//!   [`OutboundFeed`]s
//! - **Raw**: the handler receives [`Scope`] and [`ConnectionIo`] directly
//!
//! ```text
//! ┌────────────┐     ┌────────┐     ┌────────────────────┐     ┌─────────┐
//! │ Connection │────▶│ Router │────▶│ Lifecycle (kind)   │────▶│ Handler │
//! │ Scope + IO │     │  trie  │     │ http / ws / raw    │     └─────────┘
//! └────────────┘     └────────┘     └────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use spire_core::prelude::*;
//!
//! async fn show_user(req: Request) -> HandlerResult<Response> {
//!     let id = req.params().get("id").and_then(ParamValue::as_int).unwrap_or_default();
//!     Ok(Response::text(format!("user {id}")))
//! }
//!
//! let router = Router::new().route(Route::get("/users/{id:int}", show_user)?)?;
//! let outcome = router.dispatch(connection).await;
//! ```

pub mod error;
pub mod lifecycle;
pub mod routing;
pub mod testing;

pub use error::{
    DispatchError, HandlerResult, LifecycleError, LifecycleResult, RoutingError, RoutingResult,
    TransportError, TransportResult, ValidationError,
};

pub use lifecycle::{
    Connection, ConnectionIo, DispatchOutcome, EventSink, EventSource, FeedEvent, Frame,
    FrameMode, Headers, HttpState, InboundEvent, LifespanHandler, OutboundEvent, OutboundFeed,
    Protocol, Request, Response, Scope, WebSocket, WsState, close_code,
};

pub use routing::{
    BoxFuture, HttpHandler, Method, ParamKind, ParamValue, PathParams, PathPattern, RawHandler,
    Route, RouteHandler, RouteKind, RouteMatch, Router, RouterService, WebSocketHandler,
};

/// Prelude for common imports.
pub mod prelude {
    pub use super::error::{HandlerResult, LifecycleError, RoutingError, ValidationError};
    pub use super::lifecycle::{
        Connection, DispatchOutcome, Frame, FrameMode, Request, Response, Scope, WebSocket,
        close_code,
    };
    pub use super::routing::{Method, ParamValue, Route, RouteKind, Router};
}
