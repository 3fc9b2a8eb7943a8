//! The route table and connection dispatcher.
//!
//! # Matching
//!
//! Routes are stored in a segment trie. At every position a literal segment
//! is tried first, then a parameter, then a `path` catch-all; a failed branch
//! backtracks to the next alternative. As a result `/users/active` always
//! beats `/users/{id}` regardless of registration order.
//!
//! Only the path shape backtracks. Once a terminal holds routes of the
//! requested kind, a method none of them allows is a
//! [`RoutingError::MethodNotAllowed`]; the search does not fall through to a
//! parameter branch that happens to allow it.
//!
//! When several routes end at the same trie node (equivalent shapes with
//! different parameter types or names, or different method sets), they are
//! tried in registration order and the first one that accepts the
//! request wins. A parameter coercion failure on the winning route is a
//! [`ValidationError`], not a fall-through to later routes.
//!
//! Resolution is a pure function of `(path, method, kind)`.

use std::collections::{BTreeSet, HashMap};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::Service;
use tracing::{Instrument, debug, info_span, trace, warn};

use super::path::{ParamKind, PathParams, Segment, split_path};
use super::route::{Method, Route, RouteHandler, RouteKind};
use crate::error::{DispatchError, RoutingError, RoutingResult, ValidationError};
use crate::lifecycle::{
    self, Connection, ConnectionIo, DispatchOutcome, LifespanHandler, Protocol, Scope,
};

#[derive(Default)]
struct Node {
    statics: HashMap<String, Node>,
    param: Option<Box<Node>>,
    catch_alls: Vec<usize>,
    endpoints: Vec<usize>,
}

/// A successful resolution.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The matched route.
    pub route: Arc<Route>,
    /// Raw decoded captures, one per parameter in declaration order.
    pub captures: Vec<String>,
}

impl RouteMatch {
    /// Coerces the captures into typed parameters.
    pub fn params(&self) -> Result<PathParams, ValidationError> {
        self.route.pattern().bind(&self.captures)
    }
}

/// Result of searching one trie branch.
enum Walk {
    Found(usize),
    /// The path matched routes of the requested kind, none allowing the method.
    WrongMethod(BTreeSet<Method>),
    Miss,
}

/// The route table.
#[derive(Default)]
pub struct Router {
    routes: Vec<Arc<Route>>,
    root: Node,
    names: HashMap<String, usize>,
    lifespan: Option<Arc<dyn LifespanHandler>>,
}

impl Router {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route.
    ///
    /// Fails with [`RoutingError::DuplicateRoute`] if an equivalent pattern of
    /// the same kind (and, for HTTP, an overlapping method) already exists.
    pub fn register(&mut self, route: Route) -> RoutingResult<()> {
        if let Some(name) = route.name()
            && self.names.contains_key(name)
        {
            return Err(RoutingError::invalid(
                route.pattern().as_str(),
                format!("route name '{name}' is already taken"),
            ));
        }

        let index = self.routes.len();
        let (node, catch_all) = Self::node_for(&mut self.root, route.pattern().segments());
        let slot = if catch_all {
            &mut node.catch_alls
        } else {
            &mut node.endpoints
        };
        if slot.iter().any(|&i| self.routes[i].conflicts_with(&route)) {
            return Err(RoutingError::DuplicateRoute {
                pattern: route.pattern().as_str().to_string(),
                kind: route.kind(),
            });
        }
        slot.push(index);

        if let Some(name) = route.name() {
            self.names.insert(name.to_string(), index);
        }
        debug!(
            pattern = %route.pattern(),
            kind = %route.kind(),
            methods = ?route.methods(),
            "Registered route"
        );
        self.routes.push(Arc::new(route));
        Ok(())
    }

    /// Registers a route, builder style.
    pub fn route(mut self, route: Route) -> RoutingResult<Self> {
        self.register(route)?;
        Ok(self)
    }

    /// Walks (creating as needed) to the node for `segments`. The flag is
    /// `true` when the last segment is a catch-all.
    fn node_for<'a>(root: &'a mut Node, segments: &[Segment]) -> (&'a mut Node, bool) {
        let mut node = root;
        for segment in segments {
            match segment {
                Segment::Static(text) => {
                    node = node.statics.entry(text.clone()).or_default();
                }
                Segment::Param {
                    kind: ParamKind::Path,
                    ..
                } => return (node, true),
                Segment::Param { .. } => {
                    node = node.param.get_or_insert_with(Default::default).as_mut();
                }
            }
        }
        (node, false)
    }

    /// Sets the handler for lifespan connections.
    pub fn set_lifespan(&mut self, handler: Arc<dyn LifespanHandler>) {
        self.lifespan = Some(handler);
    }

    /// All routes in registration order.
    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    /// Looks up a route by name.
    pub fn route_by_name(&self, name: &str) -> Option<&Arc<Route>> {
        self.names.get(name).map(|&i| &self.routes[i])
    }

    /// Builds a path for the named route.
    pub fn url_for(&self, name: &str, params: &[(&str, &str)]) -> Option<String> {
        self.route_by_name(name)?.pattern().render(params)
    }

    /// Resolves a path to a route of `kind`.
    ///
    /// `method` is only consulted for [`RouteKind::Http`].
    pub fn resolve(&self, path: &str, method: Method, kind: RouteKind) -> RoutingResult<RouteMatch> {
        let segments = split_path(path);
        let mut captures = Vec::new();

        match self.walk(&self.root, &segments, &mut captures, method, kind) {
            Walk::Found(index) => Ok(RouteMatch {
                route: Arc::clone(&self.routes[index]),
                captures,
            }),
            Walk::WrongMethod(allowed) => Err(RoutingError::MethodNotAllowed {
                path: path.to_string(),
                method,
                allowed: allowed.into_iter().collect(),
            }),
            Walk::Miss => Err(RoutingError::not_found(path, kind)),
        }
    }

    /// Only a path miss backtracks. A terminal whose routes of `kind` match
    /// the path ends the search even when none of them allows `method`.
    fn walk(
        &self,
        node: &Node,
        rest: &[String],
        captures: &mut Vec<String>,
        method: Method,
        kind: RouteKind,
    ) -> Walk {
        let Some((head, tail)) = rest.split_first() else {
            return self.pick(&node.endpoints, method, kind);
        };

        if let Some(child) = node.statics.get(head) {
            match self.walk(child, tail, captures, method, kind) {
                Walk::Miss => {}
                settled => return settled,
            }
        }

        if let Some(child) = node.param.as_deref() {
            captures.push(head.clone());
            match self.walk(child, tail, captures, method, kind) {
                Walk::Miss => {}
                found @ Walk::Found(_) => return found,
                settled => {
                    captures.pop();
                    return settled;
                }
            }
            captures.pop();
        }

        if !node.catch_alls.is_empty() {
            let picked = self.pick(&node.catch_alls, method, kind);
            if let Walk::Found(_) = picked {
                captures.push(rest.join("/"));
            }
            return picked;
        }

        Walk::Miss
    }

    /// Picks the first route at a terminal that serves `kind` (and `method`).
    fn pick(&self, candidates: &[usize], method: Method, kind: RouteKind) -> Walk {
        let mut allowed = BTreeSet::new();
        for &index in candidates {
            let route = &self.routes[index];
            if route.kind() != kind {
                continue;
            }
            if kind != RouteKind::Http || route.allows(method) {
                return Walk::Found(index);
            }
            allowed.extend(route.methods().iter().copied());
        }
        if allowed.is_empty() {
            Walk::Miss
        } else {
            Walk::WrongMethod(allowed)
        }
    }

    /// Resolves a connection's route, falling back to raw routes when no
    /// route of the connection's own kind exists.
    fn resolve_connection(&self, scope: &Scope) -> RoutingResult<RouteMatch> {
        let kind = match scope.protocol {
            Protocol::WebSocket => RouteKind::WebSocket,
            _ => RouteKind::Http,
        };
        match self.resolve(&scope.path, scope.method, kind) {
            Err(err) if err.is_not_found() => self
                .resolve(&scope.path, scope.method, RouteKind::Asgi)
                .map_err(|_| err),
            other => other,
        }
    }

    /// Routes a connection to its lifecycle and drives it to completion.
    pub async fn dispatch(&self, connection: Connection) -> DispatchOutcome {
        let span = info_span!(
            "dispatch",
            protocol = %connection.scope.protocol,
            method = %connection.scope.method,
            path = %connection.scope.path,
        );
        self.dispatch_inner(connection).instrument(span).await
    }

    async fn dispatch_inner(&self, connection: Connection) -> DispatchOutcome {
        let Connection { mut scope, mut io } = connection;

        if scope.protocol == Protocol::Lifespan {
            return lifecycle::lifespan::run(self.lifespan.clone(), io).await;
        }

        let matched = match self.resolve_connection(&scope) {
            Ok(matched) => matched,
            Err(err) => return reject(&scope, &mut io, err.into()).await,
        };
        let params = match matched.params() {
            Ok(params) => params,
            Err(err) => return reject(&scope, &mut io, err.into()).await,
        };
        trace!(pattern = %matched.route.pattern(), "Route matched");

        scope.path_params = params;
        scope.route = Some(Arc::clone(&matched.route));

        match matched.route.handler().clone() {
            RouteHandler::Http(handler) => lifecycle::http::run(handler, scope, io).await,
            RouteHandler::WebSocket(handler) => lifecycle::websocket::run(handler, scope, io).await,
            RouteHandler::Asgi(handler) => lifecycle::raw::run(handler, scope, io).await,
        }
    }
}

/// Answers a connection that never reached a handler.
async fn reject(scope: &Scope, io: &mut ConnectionIo, err: DispatchError) -> DispatchOutcome {
    debug!(error = %err, "Rejecting connection");
    let sent = match scope.protocol {
        Protocol::WebSocket => {
            lifecycle::websocket::reject(io, err.close_code(), &err.to_string()).await
        }
        _ => lifecycle::http::send_error(io, &err).await,
    };
    if let Err(send_err) = sent {
        warn!(error = %send_err, "Failed to send rejection");
    }
    DispatchOutcome::Rejected(err)
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes)
            .field("lifespan", &self.lifespan.is_some())
            .finish()
    }
}

// =============================================================================
// Tower Service
// =============================================================================

/// A shared router exposed as a [`tower::Service`], so middleware such as
/// timeouts or concurrency limits can wrap dispatch.
#[derive(Debug, Clone)]
pub struct RouterService(Arc<Router>);

impl RouterService {
    /// Wraps a router.
    pub fn new(router: Arc<Router>) -> Self {
        Self(router)
    }

    /// The wrapped router.
    pub fn router(&self) -> &Arc<Router> {
        &self.0
    }
}

impl Service<Connection> for RouterService {
    type Response = DispatchOutcome;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, connection: Connection) -> Self::Future {
        let router = Arc::clone(&self.0);
        Box::pin(async move { Ok(router.dispatch(connection).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerResult;
    use crate::lifecycle::{Request, Response, WebSocket};

    async fn ok(_req: Request) -> HandlerResult<Response> {
        Ok(Response::text("ok"))
    }

    async fn ws(_socket: WebSocket) -> HandlerResult {
        Ok(())
    }

    #[test]
    fn test_static_beats_param_in_any_order() {
        for static_first in [true, false] {
            let mut router = Router::new();
            let stat = Route::get("/users/active", ok).unwrap().with_name("active");
            let param = Route::get("/users/{id}", ok).unwrap().with_name("user");
            if static_first {
                router.register(stat).unwrap();
                router.register(param).unwrap();
            } else {
                router.register(param).unwrap();
                router.register(stat).unwrap();
            }

            let m = router.resolve("/users/active", Method::Get, RouteKind::Http).unwrap();
            assert_eq!(m.route.name(), Some("active"));
            assert!(m.captures.is_empty());

            let m = router.resolve("/users/42", Method::Get, RouteKind::Http).unwrap();
            assert_eq!(m.route.name(), Some("user"));
            assert_eq!(m.captures, vec!["42"]);
        }
    }

    #[test]
    fn test_static_match_with_wrong_method_is_not_allowed() {
        for static_first in [true, false] {
            let mut router = Router::new();
            let stat = Route::get("/users/active", ok).unwrap().with_name("active");
            let param = Route::post("/users/{id}", ok).unwrap().with_name("user");
            if static_first {
                router.register(stat).unwrap();
                router.register(param).unwrap();
            } else {
                router.register(param).unwrap();
                router.register(stat).unwrap();
            }

            let err = router
                .resolve("/users/active", Method::Post, RouteKind::Http)
                .unwrap_err();
            assert_eq!(
                err,
                RoutingError::MethodNotAllowed {
                    path: "/users/active".into(),
                    method: Method::Post,
                    allowed: vec![Method::Get],
                }
            );

            let m = router.resolve("/users/42", Method::Post, RouteKind::Http).unwrap();
            assert_eq!(m.route.name(), Some("user"));
            assert_eq!(m.captures, vec!["42"]);
        }
    }

    #[test]
    fn test_backtracks_from_static_branch() {
        let router = Router::new()
            .route(Route::get("/a/b/c", ok).unwrap().with_name("abc"))
            .unwrap()
            .route(Route::get("/a/{x}/d", ok).unwrap().with_name("axd"))
            .unwrap();
        let m = router.resolve("/a/b/d", Method::Get, RouteKind::Http).unwrap();
        assert_eq!(m.route.name(), Some("axd"));
        assert_eq!(m.captures, vec!["b"]);
    }

    #[test]
    fn test_first_registered_param_wins() {
        let router = Router::new()
            .route(Route::get("/items/{id:int}", ok).unwrap().with_name("int"))
            .unwrap()
            .route(Route::get("/items/{slug}", ok).unwrap().with_name("str"))
            .unwrap();
        let m = router.resolve("/items/abc", Method::Get, RouteKind::Http).unwrap();
        assert_eq!(m.route.name(), Some("int"));
        assert!(m.params().is_err());
    }

    #[test]
    fn test_catch_all() {
        let router = Router::new()
            .route(Route::get("/static/{file:path}", ok).unwrap())
            .unwrap();
        let m = router
            .resolve("/static/css/site.css", Method::Get, RouteKind::Http)
            .unwrap();
        assert_eq!(m.captures, vec!["css/site.css"]);
        assert!(router.resolve("/static", Method::Get, RouteKind::Http).is_err());
    }

    #[test]
    fn test_method_not_allowed() {
        let router = Router::new()
            .route(Route::get("/x", ok).unwrap())
            .unwrap()
            .route(Route::http("/x", [Method::Put, Method::Post], ok).unwrap())
            .unwrap();
        let err = router.resolve("/x", Method::Delete, RouteKind::Http).unwrap_err();
        assert_eq!(
            err,
            RoutingError::MethodNotAllowed {
                path: "/x".into(),
                method: Method::Delete,
                allowed: vec![Method::Get, Method::Post, Method::Put],
            }
        );
    }

    #[test]
    fn test_duplicates_rejected() {
        let mut router = Router::new();
        router.register(Route::get("/u/{id:int}", ok).unwrap()).unwrap();
        assert!(matches!(
            router.register(Route::get("/u/{other:int}", ok).unwrap()),
            Err(RoutingError::DuplicateRoute { .. })
        ));
        router.register(Route::post("/u/{id:int}", ok).unwrap()).unwrap();
        router.register(Route::websocket("/u/{id:int}", ws).unwrap()).unwrap();
    }

    #[test]
    fn test_kinds_are_separate() {
        let router = Router::new()
            .route(Route::websocket("/live", ws).unwrap())
            .unwrap();
        assert!(router.resolve("/live", Method::Get, RouteKind::WebSocket).is_ok());
        assert_eq!(
            router.resolve("/live", Method::Get, RouteKind::Http).unwrap_err(),
            RoutingError::not_found("/live", RouteKind::Http)
        );
    }

    #[test]
    fn test_url_for() {
        let router = Router::new()
            .route(Route::get("/users/{id:int}", ok).unwrap().with_name("user"))
            .unwrap();
        assert_eq!(router.url_for("user", &[("id", "5")]).as_deref(), Some("/users/5"));
        assert_eq!(router.url_for("nope", &[]), None);

        let mut router = router;
        assert!(router
            .register(Route::get("/other", ok).unwrap().with_name("user"))
            .is_err());
    }

    #[tokio::test]
    async fn test_router_service_dispatches() {
        use tower::ServiceExt;

        let router = Router::new().route(Route::get("/x", ok).unwrap()).unwrap();
        let service = RouterService::new(Arc::new(router));

        let (io, peer) = crate::testing::mock_io();
        peer.send(crate::lifecycle::InboundEvent::HttpRequest {
            body: Default::default(),
            more_body: false,
        });
        let outcome = service
            .oneshot(Connection::new(Scope::http(Method::Get, "/x"), io))
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Completed));

        let (io, _peer) = crate::testing::mock_io();
        let outcome = RouterService::new(Arc::new(Router::new()))
            .oneshot(Connection::new(Scope::http(Method::Get, "/x"), io))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::Rejected(DispatchError::Routing(RoutingError::NotFound { .. }))
        ));
    }
}
