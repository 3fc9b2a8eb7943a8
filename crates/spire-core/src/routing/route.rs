//! Route definitions.
//!
//! A [`Route`] binds a [`PathPattern`] to exactly one protocol-specific
//! handler. The three kinds share one contract (pattern, kind, metadata) and
//! differ only in the handler variant they carry:
//!
//! | Kind | Handler receives | Lifecycle |
//! |------|------------------|-----------|
//! | [`RouteKind::Http`] | [`Request`] → [`Response`] | received → invoked → sent → closed |
//! | [`RouteKind::WebSocket`] | [`WebSocket`] | connecting → accepted → open → closing → closed |
//! | [`RouteKind::Asgi`] | [`Scope`] + raw [`ConnectionIo`] | open → closed |
//!
//! Routes are immutable once built.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::path::PathPattern;
use crate::error::{HandlerResult, RoutingError, RoutingResult, ValidationError};
use crate::lifecycle::{ConnectionIo, Request, Response, Scope, WebSocket};

/// A type alias for a boxed, pinned future that is `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// =============================================================================
// Method / Kind
// =============================================================================

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Trace,
    Connect,
}

impl Method {
    /// Returns the canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
            Self::Connect => "CONNECT",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "OPTIONS" => Ok(Self::Options),
            "TRACE" => Ok(Self::Trace),
            "CONNECT" => Ok(Self::Connect),
            _ => Err(ValidationError::new("method", s, "an HTTP method")),
        }
    }
}

/// The protocol a route serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteKind {
    /// Request/response HTTP.
    Http,
    /// WebSocket with framework-managed lifecycle.
    WebSocket,
    /// Raw passthrough: the handler owns the whole protocol.
    Asgi,
}

impl RouteKind {
    /// Returns the kind name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::WebSocket => "websocket",
            Self::Asgi => "asgi",
        }
    }
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Handler traits
// =============================================================================

/// Handles one HTTP request.
///
/// Implemented for any `Fn(Request) -> impl Future<Output = HandlerResult<Response>>`.
pub trait HttpHandler: Send + Sync + 'static {
    /// Produces the response for `request`.
    fn call(&self, request: Request) -> BoxFuture<'static, HandlerResult<Response>>;
}

impl<F, Fut> HttpHandler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<Response>> + Send + 'static,
{
    fn call(&self, request: Request) -> BoxFuture<'static, HandlerResult<Response>> {
        Box::pin((self)(request))
    }
}

/// Drives one WebSocket connection.
///
/// Implemented for any `Fn(WebSocket) -> impl Future<Output = HandlerResult>`.
pub trait WebSocketHandler: Send + Sync + 'static {
    /// Runs the connection until the handler is done with it.
    fn call(&self, socket: WebSocket) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> WebSocketHandler for F
where
    F: Fn(WebSocket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, socket: WebSocket) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self)(socket))
    }
}

/// Owns a raw connection after the router has matched it.
///
/// Implemented for any `Fn(Scope, ConnectionIo) -> impl Future<Output = HandlerResult>`.
pub trait RawHandler: Send + Sync + 'static {
    /// Takes over the connection.
    fn call(&self, scope: Scope, io: ConnectionIo) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> RawHandler for F
where
    F: Fn(Scope, ConnectionIo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, scope: Scope, io: ConnectionIo) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self)(scope, io))
    }
}

/// The handler bound to a route, tagged by protocol.
#[derive(Clone)]
pub enum RouteHandler {
    /// HTTP request handler.
    Http(Arc<dyn HttpHandler>),
    /// WebSocket handler.
    WebSocket(Arc<dyn WebSocketHandler>),
    /// Raw connection handler.
    Asgi(Arc<dyn RawHandler>),
}

impl RouteHandler {
    /// The route kind this handler serves.
    pub fn kind(&self) -> RouteKind {
        match self {
            Self::Http(_) => RouteKind::Http,
            Self::WebSocket(_) => RouteKind::WebSocket,
            Self::Asgi(_) => RouteKind::Asgi,
        }
    }
}

// =============================================================================
// Route
// =============================================================================

/// An immutable mapping from a path pattern (and, for HTTP, a method set) to a handler.
#[derive(Clone)]
pub struct Route {
    pattern: PathPattern,
    methods: BTreeSet<Method>,
    handler: RouteHandler,
    name: Option<String>,
    metadata: HashMap<String, Value>,
}

impl Route {
    fn build(pattern: &str, methods: BTreeSet<Method>, handler: RouteHandler) -> RoutingResult<Self> {
        Ok(Self {
            pattern: PathPattern::parse(pattern)?,
            methods,
            handler,
            name: None,
            metadata: HashMap::new(),
        })
    }

    /// Creates an HTTP route answering the given methods.
    pub fn http<H>(
        pattern: &str,
        methods: impl IntoIterator<Item = Method>,
        handler: H,
    ) -> RoutingResult<Self>
    where
        H: HttpHandler,
    {
        let methods: BTreeSet<Method> = methods.into_iter().collect();
        if methods.is_empty() {
            return Err(RoutingError::invalid(
                pattern,
                "an HTTP route needs at least one method",
            ));
        }
        Self::build(pattern, methods, RouteHandler::Http(Arc::new(handler)))
    }

    /// Creates a `GET` route.
    pub fn get<H: HttpHandler>(pattern: &str, handler: H) -> RoutingResult<Self> {
        Self::http(pattern, [Method::Get], handler)
    }

    /// Creates a `POST` route.
    pub fn post<H: HttpHandler>(pattern: &str, handler: H) -> RoutingResult<Self> {
        Self::http(pattern, [Method::Post], handler)
    }

    /// Creates a WebSocket route.
    pub fn websocket<H: WebSocketHandler>(pattern: &str, handler: H) -> RoutingResult<Self> {
        Self::build(
            pattern,
            BTreeSet::new(),
            RouteHandler::WebSocket(Arc::new(handler)),
        )
    }

    /// Creates a raw route that receives the connection primitives directly.
    pub fn asgi<H: RawHandler>(pattern: &str, handler: H) -> RoutingResult<Self> {
        Self::build(pattern, BTreeSet::new(), RouteHandler::Asgi(Arc::new(handler)))
    }

    /// Names the route for reverse lookup.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attaches an opaque metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The path pattern.
    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    /// The route kind.
    pub fn kind(&self) -> RouteKind {
        self.handler.kind()
    }

    /// Accepted HTTP methods (empty for non-HTTP routes).
    pub fn methods(&self) -> &BTreeSet<Method> {
        &self.methods
    }

    /// Whether this route answers `method`.
    pub fn allows(&self, method: Method) -> bool {
        self.methods.contains(&method)
    }

    /// The bound handler.
    pub fn handler(&self) -> &RouteHandler {
        &self.handler
    }

    /// The route name, if set.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Looks up a metadata entry.
    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Whether `other` would be ambiguous with this route.
    pub(crate) fn conflicts_with(&self, other: &Route) -> bool {
        self.kind() == other.kind()
            && self.pattern.is_equivalent(&other.pattern)
            && (self.kind() != RouteKind::Http || !self.methods.is_disjoint(&other.methods))
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern.as_str())
            .field("kind", &self.kind())
            .field("methods", &self.methods)
            .field("name", &self.name)
            .finish()
    }
}
